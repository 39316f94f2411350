use bytes::{BufMut, Bytes, BytesMut};

use crate::rtmp::chunk::ChunkStream;
use crate::rtmp::*;

/// A fully reassembled RTMP message.
#[derive(Debug, Clone, PartialEq)]
pub struct RtmpMessage {
    pub chunk_stream_id: u32,
    pub timestamp: u32,
    pub type_id: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl RtmpMessage {
    pub fn new(chunk_stream_id: u32, timestamp: u32, type_id: u8, stream_id: u32, payload: Bytes) -> Self {
        Self {
            chunk_stream_id,
            timestamp,
            type_id,
            stream_id,
            payload,
        }
    }

    /// Wraps the message a chunk stream just completed, moving its payload out.
    pub fn from_chunk_stream(cs: &mut ChunkStream) -> Self {
        Self {
            chunk_stream_id: cs.chunk_stream_id,
            timestamp: cs.clock,
            type_id: cs.message_type_id,
            stream_id: cs.message_stream_id,
            payload: cs.take_payload(),
        }
    }

    /// Protocol control message on chunk stream 2, message stream 0, timestamp ignored.
    fn protocol_control(type_id: u8, payload: Bytes) -> Self {
        Self::new(CSID_PROTOCOL_CONTROL, 0, type_id, MSID_CONTROL, payload)
    }

    pub fn set_chunk_size(size: u32) -> Self {
        Self::protocol_control(TYPE_SET_CHUNK_SIZE, Bytes::copy_from_slice(&size.to_be_bytes()))
    }

    pub fn acknowledgement(sequence_number: u32) -> Self {
        Self::protocol_control(
            TYPE_ACKNOWLEDGEMENT,
            Bytes::copy_from_slice(&sequence_number.to_be_bytes()),
        )
    }

    pub fn window_ack_size(size: u32) -> Self {
        Self::protocol_control(TYPE_WINDOW_ACK_SIZE, Bytes::copy_from_slice(&size.to_be_bytes()))
    }

    /// size(4) + limit_type(1)
    pub fn set_peer_bandwidth(size: u32, limit_type: u8) -> Self {
        let mut payload = BytesMut::with_capacity(5);
        payload.put_u32(size);
        payload.put_u8(limit_type);
        Self::protocol_control(TYPE_SET_PEER_BANDWIDTH, payload.freeze())
    }

    /// event_type(2) + event_data
    pub fn user_control(event_type: u16, event_data: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(2 + event_data.len());
        payload.put_u16(event_type);
        payload.put_slice(event_data);
        Self::new(CSID_PROTOCOL_CONTROL, 0, TYPE_USER_CONTROL, MSID_CONTROL, payload.freeze())
    }

    pub fn stream_begin(stream_id: u32) -> Self {
        Self::user_control(EVENT_STREAM_BEGIN, &stream_id.to_be_bytes())
    }

    pub fn stream_eof(stream_id: u32) -> Self {
        Self::user_control(EVENT_STREAM_EOF, &stream_id.to_be_bytes())
    }

    pub fn stream_is_recorded(stream_id: u32) -> Self {
        Self::user_control(EVENT_STREAM_IS_RECORDED, &stream_id.to_be_bytes())
    }

    pub fn ping_response(timestamp: u32) -> Self {
        Self::user_control(EVENT_PING_RESPONSE, &timestamp.to_be_bytes())
    }

    /// AMF0 command message with an already encoded payload.
    pub fn command(chunk_stream_id: u32, stream_id: u32, payload: Bytes) -> Self {
        Self::new(chunk_stream_id, 0, TYPE_COMMAND_AMF0, stream_id, payload)
    }
}
