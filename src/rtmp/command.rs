use bytes::{Bytes, BytesMut};

use crate::error::Result;
use crate::rtmp::amf0::{self, Amf0Value, object};

pub const COMMAND_CONNECT: &str = "connect";
pub const COMMAND_CREATE_STREAM: &str = "createStream";
pub const COMMAND_PUBLISH: &str = "publish";
pub const COMMAND_PLAY: &str = "play";
pub const COMMAND_DELETE_STREAM: &str = "deleteStream";
pub const COMMAND_CLOSE_STREAM: &str = "closeStream";
pub const COMMAND_FC_UNPUBLISH: &str = "FCUnpublish";
pub const COMMAND_RESULT: &str = "_result";
pub const COMMAND_ON_STATUS: &str = "onStatus";

pub const FMS_VERSION: &str = "FMS/3,0,1,123";
pub const CAPABILITIES: u32 = 31;

/// Message stream id handed out by createStream.
pub const DEFAULT_MESSAGE_STREAM_ID: u32 = 1;

/// Properties of the connect command object. Missing keys keep their defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectInfo {
    pub app: String,
    pub flash_ver: String,
    pub swf_url: String,
    pub tc_url: String,
    pub fpad: bool,
    pub audio_codecs: u32,
    pub video_codecs: u32,
    pub video_function: u32,
    pub page_url: String,
    pub object_encoding: f64,
    pub connection_type: String,
}

impl ConnectInfo {
    pub fn from_command_object(obj: &Amf0Value) -> Self {
        let string = |key: &str| {
            obj.get_property(key)
                .and_then(Amf0Value::as_str)
                .map(str::to_string)
                .unwrap_or_default()
        };
        let number = |key: &str| obj.get_property(key).and_then(Amf0Value::as_f64);

        // Older Flash clients spell it "flashver"
        let flash_ver = obj
            .get_property("flashVer")
            .or_else(|| obj.get_property("flashver"))
            .and_then(Amf0Value::as_str)
            .unwrap_or_default()
            .to_string();

        Self {
            app: string("app"),
            flash_ver,
            swf_url: string("swfUrl"),
            tc_url: string("tcUrl"),
            fpad: obj
                .get_property("fpad")
                .and_then(Amf0Value::as_bool)
                .unwrap_or(false),
            audio_codecs: number("audioCodecs").unwrap_or(0.0) as u32,
            video_codecs: number("videoCodecs").unwrap_or(0.0) as u32,
            video_function: number("videoFunction").unwrap_or(0.0) as u32,
            page_url: string("pageUrl"),
            object_encoding: number("objectEncoding").unwrap_or(0.0),
            connection_type: string("type"),
        }
    }
}

fn encode_command(values: &[Amf0Value]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(256);
    amf0::encode_batch(values, &mut buf)?;
    Ok(buf.freeze())
}

/// `_result` for connect: properties then information object.
pub fn connect_result(transaction_id: f64, object_encoding: f64) -> Result<Bytes> {
    encode_command(&[
        COMMAND_RESULT.into(),
        transaction_id.into(),
        object([
            ("fmsVer", Amf0Value::from(FMS_VERSION)),
            ("capabilities", Amf0Value::from(CAPABILITIES)),
        ]),
        object([
            ("level", Amf0Value::from("status")),
            ("code", Amf0Value::from("NetConnection.Connect.Success")),
            ("description", Amf0Value::from("Connection succeeded.")),
            ("objectEncoding", Amf0Value::from(object_encoding)),
        ]),
    ])
}

pub fn create_stream_result(transaction_id: f64, stream_id: u32) -> Result<Bytes> {
    encode_command(&[
        COMMAND_RESULT.into(),
        transaction_id.into(),
        Amf0Value::Null,
        stream_id.into(),
    ])
}

/// `onStatus` with a status-level info object. Transaction id is always 0.
pub fn on_status(code: &str, description: &str) -> Result<Bytes> {
    encode_command(&[
        COMMAND_ON_STATUS.into(),
        0.into(),
        Amf0Value::Null,
        object([
            ("level", "status"),
            ("code", code),
            ("description", description),
        ]),
    ])
}

pub fn publish_start() -> Result<Bytes> {
    on_status("NetStream.Publish.Start", "Start publishing.")
}

pub fn play_reset() -> Result<Bytes> {
    on_status("NetStream.Play.Reset", "Playing and resetting stream.")
}

pub fn play_start() -> Result<Bytes> {
    on_status("NetStream.Play.Start", "Started playing stream.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_info_reads_known_keys() {
        let obj = object([
            ("app", Amf0Value::from("live")),
            ("flashVer", Amf0Value::from("FMLE/3.0")),
            ("tcUrl", Amf0Value::from("rtmp://localhost/live")),
            ("fpad", Amf0Value::from(false)),
            ("audioCodecs", Amf0Value::from(3575)),
            ("objectEncoding", Amf0Value::from(0)),
        ]);
        let info = ConnectInfo::from_command_object(&obj);
        assert_eq!(info.app, "live");
        assert_eq!(info.flash_ver, "FMLE/3.0");
        assert_eq!(info.tc_url, "rtmp://localhost/live");
        assert_eq!(info.audio_codecs, 3575);
        assert_eq!(info.swf_url, "");
        assert_eq!(info.video_function, 0);
    }

    #[test]
    fn connect_info_tolerates_wrong_types() {
        let obj = object([("app", Amf0Value::from(5)), ("flashver", Amf0Value::from("LNX 9,0"))]);
        let info = ConnectInfo::from_command_object(&obj);
        assert_eq!(info.app, "");
        assert_eq!(info.flash_ver, "LNX 9,0");
    }

    #[test]
    fn connect_result_layout() {
        let values = amf0::decode_batch(&connect_result(1.0, 0.0).unwrap()).unwrap();
        assert_eq!(values.len(), 4);
        assert_eq!(values[0].as_str(), Some("_result"));
        assert_eq!(values[1].as_f64(), Some(1.0));
        assert_eq!(values[2].get_property("fmsVer").and_then(Amf0Value::as_str), Some(FMS_VERSION));
        assert_eq!(
            values[3].get_property("code").and_then(Amf0Value::as_str),
            Some("NetConnection.Connect.Success")
        );
        assert_eq!(values[3].get_property("objectEncoding"), Some(&Amf0Value::Number(0.0)));
    }

    #[test]
    fn on_status_carries_code() {
        let values = amf0::decode_batch(&publish_start().unwrap()).unwrap();
        assert_eq!(values[0].as_str(), Some("onStatus"));
        assert_eq!(values[1].as_f64(), Some(0.0));
        assert!(values[2].is_null());
        assert_eq!(
            values[3].get_property("code").and_then(Amf0Value::as_str),
            Some("NetStream.Publish.Start")
        );
    }
}
