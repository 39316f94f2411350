//! Server side RTMP connection.
//!
//! [`RtmpConn`] owns the transport and every piece of per-connection protocol
//! state: the chunk stream table, negotiated chunk sizes, acknowledgement
//! counters and the metadata of the `connect` command. It is driven by a single
//! task:
//!
//! ```text
//! handshake() -> read_header() -> read_packet()*   (publisher)
//!                              -> write_packet()*  (player)
//! ```

use std::collections::HashMap;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, trace, warn};

use crate::av::{Packet, PacketKind};
use crate::error::{Error, Result};
use crate::flv;
use crate::rtmp::amf0::{self, Amf0Value};
use crate::rtmp::chunk::{self, ChunkStream};
use crate::rtmp::command::{self, ConnectInfo, DEFAULT_MESSAGE_STREAM_ID};
use crate::rtmp::handshake::Handshake;
use crate::rtmp::message::RtmpMessage;
use crate::rtmp::*;

const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnConfig {
    /// Chunk size announced with SetChunkSize and used for our writes afterwards.
    pub chunk_size: u32,
    /// Sent as both WindowAckSize and SetPeerBandwidth on connect.
    pub window_ack_size: u32,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_LOCAL_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
        }
    }
}

/// Hook for inspecting traffic on one connection. All methods default to no-ops.
pub trait ConnObserver: Send {
    fn on_chunk(&mut self, _chunk_stream_id: u32, _fmt: u8, _bytes: usize) {}
    fn on_message(&mut self, _msg: &RtmpMessage) {}
    fn on_packet(&mut self, _packet: &Packet) {}
}

pub struct NoopObserver;

impl ConnObserver for NoopObserver {}

/// Dumps every chunk, message and packet at `trace` level.
pub struct TraceObserver;

impl ConnObserver for TraceObserver {
    fn on_chunk(&mut self, chunk_stream_id: u32, fmt: u8, bytes: usize) {
        trace!(csid = chunk_stream_id, fmt, bytes, "chunk");
    }

    fn on_message(&mut self, msg: &RtmpMessage) {
        trace!(
            csid = msg.chunk_stream_id,
            msid = msg.stream_id,
            type_id = msg.type_id,
            timestamp = msg.timestamp,
            len = msg.payload.len(),
            "message"
        );
    }

    fn on_packet(&mut self, packet: &Packet) {
        trace!("{}", packet);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Handshaking,
    /// Exchanging control and command messages until publish or play.
    ReadingHeader,
    Publishing,
    Playing,
    Closed,
}

pub struct RtmpConn<S> {
    stream: BufReader<S>,
    state: ConnState,

    local_chunk_size: u32,
    /// Chunk size for our writes: 128 until we have sent SetChunkSize.
    out_chunk_size: u32,
    remote_chunk_size: u32,
    window_ack_size: u32,
    remote_window_ack_size: u32,

    /// Total bytes received, wrapping. Carried in Acknowledgement messages.
    bytes_received: u32,
    /// Bytes received since the last Acknowledgement.
    window_received: u32,

    chunk_streams: HashMap<u32, ChunkStream>,

    is_publish: bool,
    stream_name: String,
    connect_info: ConnectInfo,

    observer: Box<dyn ConnObserver>,
    write_buf: BytesMut,
}

impl<S> RtmpConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, config: ConnConfig) -> Self {
        Self::with_observer(stream, config, Box::new(NoopObserver))
    }

    pub fn with_observer(stream: S, config: ConnConfig, observer: Box<dyn ConnObserver>) -> Self {
        Self {
            stream: BufReader::with_capacity(READ_BUFFER_SIZE, stream),
            state: ConnState::Handshaking,
            local_chunk_size: config.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
            out_chunk_size: DEFAULT_CHUNK_SIZE,
            remote_chunk_size: DEFAULT_CHUNK_SIZE,
            window_ack_size: config.window_ack_size,
            remote_window_ack_size: 0,
            bytes_received: 0,
            window_received: 0,
            chunk_streams: HashMap::new(),
            is_publish: false,
            stream_name: String::new(),
            connect_info: ConnectInfo::default(),
            observer,
            write_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_publish(&self) -> bool {
        self.is_publish
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn connect_info(&self) -> &ConnectInfo {
        &self.connect_info
    }

    /// Registry key of the negotiated stream: `app/stream_name`.
    pub fn stream_key(&self) -> String {
        format!("{}/{}", self.connect_info.app, self.stream_name)
    }

    pub fn remote_chunk_size(&self) -> u32 {
        self.remote_chunk_size
    }

    pub fn remote_window_ack_size(&self) -> u32 {
        self.remote_window_ack_size
    }

    pub fn bytes_received(&self) -> u32 {
        self.bytes_received
    }

    pub async fn handshake(&mut self) -> Result<()> {
        if self.state != ConnState::Handshaking {
            return Err(Error::protocol("handshake already performed"));
        }
        Handshake::new().perform(&mut self.stream).await?;
        self.state = ConnState::ReadingHeader;
        Ok(())
    }

    /// Processes control and command messages until the peer has issued
    /// `publish` or `play`, or closed the stream.
    pub async fn read_header(&mut self) -> Result<()> {
        if self.state == ConnState::Handshaking {
            return Err(Error::protocol("read_header before handshake"));
        }
        while self.state == ConnState::ReadingHeader {
            let msg = self.read_message().await?;
            self.handle_message(&msg).await?;
        }
        Ok(())
    }

    /// Waits for inbound bytes without consuming any. Returns `false` once the
    /// peer has closed its side. Safe to use as a `select!` branch.
    pub async fn wait_inbound(&mut self) -> Result<bool> {
        Ok(!self.stream.fill_buf().await?.is_empty())
    }

    /// Reads chunks until one chunk stream completes a message.
    pub async fn read_message(&mut self) -> Result<RtmpMessage> {
        loop {
            let (fmt, csid, header_len) = chunk::read_basic_header(&mut self.stream).await?;

            let cs = self.chunk_streams.entry(csid).or_insert_with(|| {
                debug!(csid, "new chunk stream");
                ChunkStream::new(csid)
            });
            let consumed = cs
                .read_chunk(fmt, &mut self.stream, self.remote_chunk_size)
                .await?;
            let message = cs.is_complete().then(|| RtmpMessage::from_chunk_stream(cs));

            let total = header_len + consumed;
            self.observer.on_chunk(csid, fmt, total);
            self.count_received(total).await?;

            if let Some(msg) = message {
                self.observer.on_message(&msg);
                return Ok(msg);
            }
        }
    }

    async fn count_received(&mut self, n: usize) -> Result<()> {
        let n = n as u32;
        self.bytes_received = self.bytes_received.wrapping_add(n);
        self.window_received = self.window_received.saturating_add(n);

        if self.remote_window_ack_size > 0 && self.window_received >= self.remote_window_ack_size {
            self.window_received = 0;
            trace!(total = self.bytes_received, "sending acknowledgement");
            self.write_message(&RtmpMessage::acknowledgement(self.bytes_received))
                .await?;
        }
        Ok(())
    }

    pub async fn handle_message(&mut self, msg: &RtmpMessage) -> Result<()> {
        match msg.type_id {
            TYPE_SET_CHUNK_SIZE
            | TYPE_ABORT
            | TYPE_ACKNOWLEDGEMENT
            | TYPE_WINDOW_ACK_SIZE
            | TYPE_SET_PEER_BANDWIDTH => {
                if msg.chunk_stream_id != CSID_PROTOCOL_CONTROL {
                    return Err(Error::protocol(format!(
                        "protocol control message type {} on chunk stream {}",
                        msg.type_id, msg.chunk_stream_id
                    )));
                }
                if msg.stream_id != MSID_CONTROL {
                    return Err(Error::protocol(format!(
                        "protocol control message type {} on message stream {}",
                        msg.type_id, msg.stream_id
                    )));
                }
                self.handle_protocol_control(msg)
            }
            TYPE_USER_CONTROL => self.handle_user_control(msg).await,
            TYPE_AUDIO | TYPE_VIDEO | TYPE_DATA_AMF0 | TYPE_DATA_AMF3 => {
                trace!(type_id = msg.type_id, "ignoring media before publish or play");
                Ok(())
            }
            TYPE_SHARED_OBJECT_AMF0 | TYPE_SHARED_OBJECT_AMF3 | TYPE_AGGREGATE => {
                debug!(type_id = msg.type_id, "ignoring message");
                Ok(())
            }
            TYPE_COMMAND_AMF0 | TYPE_COMMAND_AMF3 => self.handle_command(msg).await,
            other => Err(Error::Unsupported(format!("message type {other}"))),
        }
    }

    fn handle_protocol_control(&mut self, msg: &RtmpMessage) -> Result<()> {
        let payload = &msg.payload[..];
        let want = if msg.type_id == TYPE_SET_PEER_BANDWIDTH { 5 } else { 4 };
        if payload.len() != want {
            return Err(Error::protocol(format!(
                "protocol control message type {} must carry {} bytes, got {}",
                msg.type_id,
                want,
                payload.len()
            )));
        }
        let value = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);

        match msg.type_id {
            TYPE_SET_CHUNK_SIZE => {
                if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&value) {
                    return Err(Error::protocol(format!("invalid chunk size {value}")));
                }
                debug!(size = value, "peer chunk size");
                self.remote_chunk_size = value;
            }
            TYPE_ABORT => debug!(csid = value, "abort"),
            TYPE_ACKNOWLEDGEMENT => trace!(sequence = value, "acknowledgement"),
            TYPE_WINDOW_ACK_SIZE => {
                debug!(size = value, "peer window ack size");
                self.remote_window_ack_size = value;
            }
            _ => debug!(size = value, limit_type = payload[4], "peer bandwidth"),
        }
        Ok(())
    }

    async fn handle_user_control(&mut self, msg: &RtmpMessage) -> Result<()> {
        let payload = &msg.payload[..];
        if payload.len() < 2 {
            debug!(len = payload.len(), "short user control message");
            return Ok(());
        }
        let event = u16::from_be_bytes([payload[0], payload[1]]);
        if event == EVENT_PING_REQUEST && payload.len() >= 6 {
            let timestamp = u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]);
            return self.write_message(&RtmpMessage::ping_response(timestamp)).await;
        }
        trace!(event, "user control event");
        Ok(())
    }

    async fn handle_command(&mut self, msg: &RtmpMessage) -> Result<()> {
        // AMF3 commands start with a format byte, the rest is AMF0
        let data = if msg.type_id == TYPE_COMMAND_AMF3 {
            msg.payload.get(1..).unwrap_or(&[])
        } else {
            &msg.payload[..]
        };

        let values = amf0::decode_batch(data)?;
        let Some(first) = values.first() else {
            return Err(Error::protocol("empty command message"));
        };
        let Some(name) = first.as_str() else {
            return Err(Error::protocol(format!(
                "command name must be a string, got {first}"
            )));
        };
        let args = &values[1..];

        debug!(command = name, csid = msg.chunk_stream_id, msid = msg.stream_id, "command");
        match name {
            command::COMMAND_CONNECT => self.handle_connect(msg, args).await,
            command::COMMAND_CREATE_STREAM => self.handle_create_stream(msg, args).await,
            command::COMMAND_PUBLISH => self.handle_publish(msg, args).await,
            command::COMMAND_PLAY => self.handle_play(msg, args).await,
            command::COMMAND_DELETE_STREAM
            | command::COMMAND_CLOSE_STREAM
            | command::COMMAND_FC_UNPUBLISH => {
                info!(command = name, stream = %self.stream_name, "stream closed by peer");
                self.state = ConnState::Closed;
                Ok(())
            }
            other => {
                warn!(command = other, "ignoring command");
                Ok(())
            }
        }
    }

    async fn handle_connect(&mut self, msg: &RtmpMessage, args: &[Amf0Value]) -> Result<()> {
        let transaction_id = args.first().and_then(Amf0Value::as_f64);
        if transaction_id != Some(1.0) {
            return Err(Error::protocol(format!(
                "connect transaction id must be 1, got {:?}",
                args.first()
            )));
        }
        let Some(command_object) = args.get(1) else {
            return Err(Error::protocol("connect without command object"));
        };
        self.connect_info = ConnectInfo::from_command_object(command_object);
        info!(
            app = %self.connect_info.app,
            tc_url = %self.connect_info.tc_url,
            flash_ver = %self.connect_info.flash_ver,
            "connect"
        );

        self.write_message(&RtmpMessage::window_ack_size(self.window_ack_size))
            .await?;
        self.write_message(&RtmpMessage::set_peer_bandwidth(
            self.window_ack_size,
            LIMIT_TYPE_DYNAMIC,
        ))
        .await?;
        self.write_message(&RtmpMessage::set_chunk_size(self.local_chunk_size))
            .await?;
        self.write_message(&RtmpMessage::stream_begin(MSID_CONTROL))
            .await?;

        let payload = command::connect_result(1.0, self.connect_info.object_encoding)?;
        self.write_message(&RtmpMessage::command(msg.chunk_stream_id, msg.stream_id, payload))
            .await
    }

    async fn handle_create_stream(&mut self, msg: &RtmpMessage, args: &[Amf0Value]) -> Result<()> {
        let transaction_id = args.first().and_then(Amf0Value::as_f64).unwrap_or(0.0);
        // 4 is what publishers send, 2 what players send
        if transaction_id != 4.0 && transaction_id != 2.0 {
            warn!(transaction_id, "unexpected createStream transaction id");
        }

        self.write_message(&RtmpMessage::stream_begin(DEFAULT_MESSAGE_STREAM_ID))
            .await?;
        let payload = command::create_stream_result(transaction_id, DEFAULT_MESSAGE_STREAM_ID)?;
        self.write_message(&RtmpMessage::command(msg.chunk_stream_id, msg.stream_id, payload))
            .await
    }

    /// `[transaction_id, null, name, ...]`, shared by publish and play.
    fn stream_name_arg(command: &str, want_transaction_id: f64, args: &[Amf0Value]) -> Result<String> {
        let transaction_id = args.first().and_then(Amf0Value::as_f64);
        if transaction_id != Some(want_transaction_id) {
            return Err(Error::protocol(format!(
                "{command} transaction id must be {want_transaction_id}, got {:?}",
                args.first()
            )));
        }
        args.get(2)
            .and_then(Amf0Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::protocol(format!("{command} without stream name")))
    }

    async fn handle_publish(&mut self, msg: &RtmpMessage, args: &[Amf0Value]) -> Result<()> {
        self.stream_name = Self::stream_name_arg(command::COMMAND_PUBLISH, 5.0, args)?;
        self.is_publish = true;
        self.state = ConnState::Publishing;
        info!(stream = %self.stream_key(), "publish");

        let payload = command::publish_start()?;
        self.write_message(&RtmpMessage::command(msg.chunk_stream_id, msg.stream_id, payload))
            .await
    }

    async fn handle_play(&mut self, msg: &RtmpMessage, args: &[Amf0Value]) -> Result<()> {
        self.stream_name = Self::stream_name_arg(command::COMMAND_PLAY, 4.0, args)?;
        self.state = ConnState::Playing;
        info!(stream = %self.stream_key(), "play");

        self.write_message(&RtmpMessage::set_chunk_size(self.local_chunk_size))
            .await?;
        self.write_message(&RtmpMessage::stream_is_recorded(msg.stream_id))
            .await?;
        self.write_message(&RtmpMessage::stream_begin(msg.stream_id))
            .await?;
        for payload in [command::play_reset()?, command::play_start()?] {
            self.write_message(&RtmpMessage::command(msg.chunk_stream_id, msg.stream_id, payload))
                .await?;
        }
        Ok(())
    }

    /// Next audio, video or metadata message as a [`Packet`]. Anything else is
    /// dispatched as usual. Returns `None` once the peer has closed the stream.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if self.state == ConnState::Closed {
                return Ok(None);
            }
            let msg = self.read_message().await?;
            let Some(kind) = PacketKind::from_message_type(msg.type_id) else {
                self.handle_message(&msg).await?;
                continue;
            };

            let payload = if msg.type_id == TYPE_DATA_AMF3 {
                // like AMF3 commands: a format byte, then AMF0
                msg.payload.slice(1usize.min(msg.payload.len())..)
            } else {
                msg.payload
            };
            if kind == PacketKind::Metadata {
                if let Err(e) = flv::metadata_name(&payload) {
                    warn!(error = %e, "dropping metadata");
                    continue;
                }
            }

            let tag = match flv::parse_tag(kind, &payload) {
                Ok(tag) => tag,
                Err(e) => {
                    debug!(error = %e, %kind, "relaying packet without tag");
                    None
                }
            };
            let packet = Packet::new(kind, msg.stream_id, msg.timestamp, payload).with_tag(tag);
            self.observer.on_packet(&packet);
            return Ok(Some(packet));
        }
    }

    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let payload = if packet.is_metadata() {
            flv::strip_set_data_frame(packet.payload.clone()).unwrap_or_else(|e| {
                debug!(error = %e, "writing metadata unchanged");
                packet.payload.clone()
            })
        } else {
            packet.payload.clone()
        };
        let msg = RtmpMessage::new(
            packet.kind.chunk_stream_id(),
            packet.timestamp,
            packet.kind.message_type(),
            packet.stream_id,
            payload,
        );
        self.write_message(&msg).await
    }

    pub async fn write_message(&mut self, msg: &RtmpMessage) -> Result<()> {
        self.write_buf.clear();
        chunk::write_chunks(&mut self.write_buf, msg, self.out_chunk_size)?;
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        if msg.type_id == TYPE_SET_CHUNK_SIZE && msg.payload.len() == 4 {
            let p = &msg.payload;
            self.out_chunk_size = u32::from_be_bytes([p[0], p[1], p[2], p[3]]);
        }
        Ok(())
    }
}
