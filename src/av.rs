use std::fmt;

use bytes::Bytes;

use crate::flv::TagInfo;
use crate::rtmp::{CSID_AUDIO, CSID_VIDEO, TYPE_AUDIO, TYPE_DATA_AMF0, TYPE_DATA_AMF3, TYPE_VIDEO};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Audio,
    Video,
    Metadata,
}

impl PacketKind {
    pub fn from_message_type(type_id: u8) -> Option<Self> {
        match type_id {
            TYPE_AUDIO => Some(PacketKind::Audio),
            TYPE_VIDEO => Some(PacketKind::Video),
            TYPE_DATA_AMF0 | TYPE_DATA_AMF3 => Some(PacketKind::Metadata),
            _ => None,
        }
    }

    /// Message type used when the packet is written out. Metadata always goes out as AMF0.
    pub fn message_type(self) -> u8 {
        match self {
            PacketKind::Audio => TYPE_AUDIO,
            PacketKind::Video => TYPE_VIDEO,
            PacketKind::Metadata => TYPE_DATA_AMF0,
        }
    }

    pub fn chunk_stream_id(self) -> u32 {
        match self {
            PacketKind::Audio => CSID_AUDIO,
            PacketKind::Video | PacketKind::Metadata => CSID_VIDEO,
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketKind::Audio => write!(f, "audio"),
            PacketKind::Video => write!(f, "video"),
            PacketKind::Metadata => write!(f, "metadata"),
        }
    }
}

/// A media message handed between a publishing connection and its subscribers.
#[derive(Debug, Clone)]
pub struct Packet {
    pub kind: PacketKind,
    pub stream_id: u32,
    pub timestamp: u32,
    pub payload: Bytes,
    /// Parsed FLV tag header; `None` for metadata or when parsing failed.
    pub tag: Option<TagInfo>,
}

impl Packet {
    pub fn new(kind: PacketKind, stream_id: u32, timestamp: u32, payload: Bytes) -> Self {
        Self {
            kind,
            stream_id,
            timestamp,
            payload,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: Option<TagInfo>) -> Self {
        self.tag = tag;
        self
    }

    pub fn is_audio(&self) -> bool {
        self.kind == PacketKind::Audio
    }

    pub fn is_video(&self) -> bool {
        self.kind == PacketKind::Video
    }

    pub fn is_metadata(&self) -> bool {
        self.kind == PacketKind::Metadata
    }

    pub fn is_sequence_header(&self) -> bool {
        self.tag.is_some_and(|t| t.is_sequence_header())
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packet, stream {}, ts {}, {} bytes",
            self.kind,
            self.stream_id,
            self.timestamp,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flv::parse_tag;

    #[test]
    fn kinds_map_to_message_types() {
        assert_eq!(PacketKind::from_message_type(8), Some(PacketKind::Audio));
        assert_eq!(PacketKind::from_message_type(9), Some(PacketKind::Video));
        assert_eq!(PacketKind::from_message_type(15), Some(PacketKind::Metadata));
        assert_eq!(PacketKind::from_message_type(18), Some(PacketKind::Metadata));
        assert_eq!(PacketKind::from_message_type(20), None);
        assert_eq!(PacketKind::Metadata.message_type(), TYPE_DATA_AMF0);
        assert_eq!(PacketKind::Audio.chunk_stream_id(), 4);
        assert_eq!(PacketKind::Metadata.chunk_stream_id(), 6);
    }

    #[test]
    fn sequence_header_follows_tag() {
        let payload = Bytes::from_static(&[0x17, 0x00, 0, 0, 0]);
        let tag = parse_tag(PacketKind::Video, &payload).unwrap();
        let packet = Packet::new(PacketKind::Video, 1, 0, payload).with_tag(tag);
        assert!(packet.is_sequence_header());
        assert!(!Packet::new(PacketKind::Video, 1, 0, Bytes::new()).is_sequence_header());
    }
}
