//! FLV tag header parsing for RTMP audio and video payloads.

pub mod audio;
pub mod video;

use bytes::Bytes;
use thiserror::Error;

use crate::av::PacketKind;
use crate::rtmp::amf0::{self, Amf0Value};

pub use audio::{AudioTag, parse_audio_tag};
pub use video::{VideoTag, parse_video_tag};

pub const SET_DATA_FRAME: &str = "@setDataFrame";

#[derive(Debug, Error)]
pub enum TagError {
    #[error("tag too short: want at least {want} bytes, got {got}")]
    TooShort { want: usize, got: usize },

    #[error("invalid tag: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TagInfo {
    Audio(AudioTag),
    Video(VideoTag),
}

impl TagInfo {
    /// AAC or AVC decoder configuration, replayed to late subscribers.
    pub fn is_sequence_header(&self) -> bool {
        match self {
            TagInfo::Audio(tag) => tag.is_sequence_header(),
            TagInfo::Video(tag) => tag.is_sequence_header(),
        }
    }
}

/// Parses the tag header of an audio or video payload. Metadata has no tag
/// header and yields `Ok(None)`.
pub fn parse_tag(kind: PacketKind, payload: &[u8]) -> Result<Option<TagInfo>, TagError> {
    match kind {
        PacketKind::Audio => parse_audio_tag(payload).map(|t| Some(TagInfo::Audio(t))),
        PacketKind::Video => parse_video_tag(payload).map(|t| Some(TagInfo::Video(t))),
        PacketKind::Metadata => Ok(None),
    }
}

/// Name of a metadata payload, i.e. its leading AMF0 string (`onMetaData`,
/// `@setDataFrame`, ...). Payloads that do not start with a string are rejected.
pub fn metadata_name(payload: &[u8]) -> Result<(String, usize), TagError> {
    let (value, consumed) = amf0::decode(payload)
        .map_err(|e| TagError::Invalid(format!("metadata: {e}")))?;
    match value {
        Amf0Value::String(name) => Ok((name, consumed)),
        other => Err(TagError::Invalid(format!(
            "metadata must start with a string, got {other}"
        ))),
    }
}

/// Removes a leading `@setDataFrame` string so the payload starts at `onMetaData`.
pub fn strip_set_data_frame(payload: Bytes) -> Result<Bytes, TagError> {
    let (name, consumed) = metadata_name(&payload)?;
    if name == SET_DATA_FRAME {
        Ok(payload.slice(consumed..))
    } else {
        Ok(payload)
    }
}
