pub mod amf0;
pub mod amf3;
pub mod chunk;
pub mod command;
pub mod conn;
pub mod handshake;
pub mod message;

pub const RTMP_VERSION: u8 = 3;

pub const MIN_CHUNK_SIZE: u32 = 1;
pub const MAX_CHUNK_SIZE: u32 = 0x7fff_ffff;
/// Chunk size in effect on both directions until SetChunkSize says otherwise.
pub const DEFAULT_CHUNK_SIZE: u32 = 128;
pub const DEFAULT_LOCAL_CHUNK_SIZE: u32 = 1024;
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 2_500_000;

pub const MAX_3B_TIMESTAMP: u32 = 0xff_ffff;

/// Chunk stream reserved for protocol control and user control messages.
pub const CSID_PROTOCOL_CONTROL: u32 = 2;
pub const CSID_AUDIO: u32 = 4;
pub const CSID_VIDEO: u32 = 6;
pub const MSID_CONTROL: u32 = 0;

// Message type ids
pub const TYPE_SET_CHUNK_SIZE: u8 = 1;
pub const TYPE_ABORT: u8 = 2;
pub const TYPE_ACKNOWLEDGEMENT: u8 = 3;
pub const TYPE_USER_CONTROL: u8 = 4;
pub const TYPE_WINDOW_ACK_SIZE: u8 = 5;
pub const TYPE_SET_PEER_BANDWIDTH: u8 = 6;
pub const TYPE_AUDIO: u8 = 8;
pub const TYPE_VIDEO: u8 = 9;
pub const TYPE_DATA_AMF3: u8 = 15;
pub const TYPE_SHARED_OBJECT_AMF3: u8 = 16;
pub const TYPE_COMMAND_AMF3: u8 = 17;
pub const TYPE_DATA_AMF0: u8 = 18;
pub const TYPE_SHARED_OBJECT_AMF0: u8 = 19;
pub const TYPE_COMMAND_AMF0: u8 = 20;
pub const TYPE_AGGREGATE: u8 = 22;

// User control event types
pub const EVENT_STREAM_BEGIN: u16 = 0;
pub const EVENT_STREAM_EOF: u16 = 1;
pub const EVENT_STREAM_IS_RECORDED: u16 = 4;
pub const EVENT_PING_REQUEST: u16 = 6;
pub const EVENT_PING_RESPONSE: u16 = 7;

// SetPeerBandwidth limit types
pub const LIMIT_TYPE_DYNAMIC: u8 = 2;
