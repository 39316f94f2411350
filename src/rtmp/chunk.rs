//! Chunk stream framing.
//!
//! ```text
//! +--------------+----------------+---------------------+------------+
//! | Basic Header | Message Header | Extended Timestamp  | Chunk Data |
//! | 1-3 bytes    | 0/3/7/11 bytes | 0 or 4 bytes        |            |
//! +--------------+----------------+---------------------+------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::rtmp::MAX_3B_TIMESTAMP;
use crate::rtmp::message::RtmpMessage;

pub const FMT0: u8 = 0;
pub const FMT1: u8 = 1;
pub const FMT2: u8 = 2;
pub const FMT3: u8 = 3;

pub const MIN_CHUNK_STREAM_ID: u32 = 2;
pub const MAX_CHUNK_STREAM_ID: u32 = 65599;

/// Largest value of the 24-bit message length field.
pub const MAX_MESSAGE_LENGTH: usize = 0xff_ffff;

/// Reads a basic header. Returns `(fmt, chunk_stream_id, bytes_read)`.
pub async fn read_basic_header<R>(reader: &mut R) -> Result<(u8, u32, usize)>
where
    R: AsyncRead + Unpin,
{
    let first_byte = reader.read_u8().await?;
    let fmt = first_byte >> 6;

    match first_byte & 0x3f {
        0 => {
            // 2-byte form: id = byte + 64
            let id = reader.read_u8().await? as u32 + 64;
            Ok((fmt, id, 2))
        }
        1 => {
            // 3-byte form: id = u16 little-endian + 64
            let id = reader.read_u16_le().await? as u32 + 64;
            Ok((fmt, id, 3))
        }
        // id 2 is the protocol control stream; passed through like any other
        raw => Ok((fmt, raw as u32, 1)),
    }
}

/// Writes a basic header using the shortest form that fits `csid`.
pub fn write_basic_header<B: BufMut>(out: &mut B, fmt: u8, csid: u32) -> Result<()> {
    let fmt_bits = (fmt & 0x03) << 6;
    match csid {
        2..=63 => out.put_u8(fmt_bits | csid as u8),
        64..=319 => {
            out.put_u8(fmt_bits);
            out.put_u8((csid - 64) as u8);
        }
        320..=MAX_CHUNK_STREAM_ID => {
            out.put_u8(fmt_bits | 1);
            out.put_u16_le((csid - 64) as u16);
        }
        _ => {
            return Err(Error::protocol(format!(
                "chunk stream id {} cannot be encoded",
                csid
            )));
        }
    }
    Ok(())
}

async fn read_u24<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32> {
    let mut b = [0u8; 3];
    reader.read_exact(&mut b).await?;
    Ok((b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32)
}

fn put_u24<B: BufMut>(out: &mut B, value: u32) {
    out.put_u8((value >> 16) as u8);
    out.put_u8((value >> 8) as u8);
    out.put_u8(value as u8);
}

/// Per-chunk-stream reassembly state. One exists per chunk stream id for the
/// lifetime of a connection.
#[derive(Debug, Clone)]
pub struct ChunkStream {
    pub chunk_stream_id: u32,
    /// Absolute timestamp of the current message.
    pub clock: u32,
    pub message_length: u32,
    pub message_type_id: u8,
    pub message_stream_id: u32,
    /// Format of the chunk that last carried a message header (fmt0..fmt2).
    last_fmt: u8,
    /// Previous header used the 4-byte extended timestamp.
    extended: bool,
    timestamp_delta: u32,
    data: BytesMut,
    data_index: u32,
}

impl ChunkStream {
    pub fn new(chunk_stream_id: u32) -> Self {
        Self {
            chunk_stream_id,
            clock: 0,
            message_length: 0,
            message_type_id: 0,
            message_stream_id: 0,
            last_fmt: FMT0,
            extended: false,
            timestamp_delta: 0,
            data: BytesMut::new(),
            data_index: 0,
        }
    }

    /// A message is complete once every byte of its payload has arrived.
    pub fn is_complete(&self) -> bool {
        self.data_index == self.message_length
    }

    pub fn data_index(&self) -> u32 {
        self.data_index
    }

    fn start_message(&mut self) {
        self.data = BytesMut::zeroed(self.message_length as usize);
        self.data_index = 0;
    }

    /// Consumes one chunk (message header, optional extended timestamp and
    /// payload) for this chunk stream. The basic header has already been read.
    /// Returns the number of bytes consumed from `reader`.
    pub async fn read_chunk<R>(&mut self, fmt: u8, reader: &mut R, chunk_size: u32) -> Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        let mut consumed = 0;

        match fmt {
            FMT0 => {
                let timestamp = read_u24(reader).await?;
                self.message_length = read_u24(reader).await?;
                self.message_type_id = reader.read_u8().await?;
                // The only little-endian field in the protocol
                self.message_stream_id = reader.read_u32_le().await?;
                consumed += 11;

                if timestamp == MAX_3B_TIMESTAMP {
                    self.clock = reader.read_u32().await?;
                    self.extended = true;
                    consumed += 4;
                } else {
                    self.clock = timestamp;
                    self.extended = false;
                }
                self.timestamp_delta = 0;
                self.last_fmt = FMT0;
                self.start_message();
            }
            FMT1 | FMT2 => {
                let mut delta = read_u24(reader).await?;
                consumed += 3;
                if fmt == FMT1 {
                    self.message_length = read_u24(reader).await?;
                    self.message_type_id = reader.read_u8().await?;
                    consumed += 4;
                }

                if delta == MAX_3B_TIMESTAMP {
                    delta = reader.read_u32().await?;
                    self.extended = true;
                    consumed += 4;
                } else {
                    self.extended = false;
                }
                self.clock = self.clock.wrapping_add(delta);
                self.timestamp_delta = delta;
                self.last_fmt = fmt;
                self.start_message();
            }
            FMT3 => {
                let extended_timestamp = if self.extended {
                    consumed += 4;
                    Some(reader.read_u32().await?)
                } else {
                    None
                };

                if self.is_complete() {
                    // fmt3 opening a new message with the previous header
                    match self.last_fmt {
                        FMT0 => {
                            // Without an extended timestamp the clock stays put.
                            if let Some(ts) = extended_timestamp {
                                self.clock = ts;
                            }
                        }
                        _ => {
                            let delta = extended_timestamp.unwrap_or(self.timestamp_delta);
                            self.clock = self.clock.wrapping_add(delta);
                        }
                    }
                    self.start_message();
                }
            }
            _ => {
                return Err(Error::protocol(format!("invalid chunk type {}", fmt)));
            }
        }

        let remaining = self.message_length - self.data_index;
        let read_length = remaining.min(chunk_size);
        let start = self.data_index as usize;
        let end = start + read_length as usize;
        reader.read_exact(&mut self.data[start..end]).await?;
        self.data_index += read_length;
        consumed += read_length as usize;

        Ok(consumed)
    }

    /// Moves the completed payload out of the context.
    pub fn take_payload(&mut self) -> Bytes {
        std::mem::take(&mut self.data).freeze()
    }
}

/// Splits `msg` into chunks of at most `chunk_size` payload bytes. The first
/// chunk carries a full fmt0 header, the rest are fmt3 continuations. A
/// timestamp of 0xFFFFFF or more goes into the extended field, which is then
/// repeated on every continuation.
pub fn write_chunks<B: BufMut>(out: &mut B, msg: &RtmpMessage, chunk_size: u32) -> Result<()> {
    let len = msg.payload.len();
    if len > MAX_MESSAGE_LENGTH {
        return Err(Error::protocol(format!(
            "message of {} bytes exceeds the 24-bit length field",
            len
        )));
    }
    let chunk_size = chunk_size.max(1) as usize;
    let extended = msg.timestamp >= MAX_3B_TIMESTAMP;

    let mut offset = 0;
    loop {
        let end = (offset + chunk_size).min(len);

        if offset == 0 {
            write_basic_header(out, FMT0, msg.chunk_stream_id)?;
            put_u24(out, if extended { MAX_3B_TIMESTAMP } else { msg.timestamp });
            put_u24(out, len as u32);
            out.put_u8(msg.type_id);
            out.put_u32_le(msg.stream_id);
        } else {
            write_basic_header(out, FMT3, msg.chunk_stream_id)?;
        }
        if extended {
            out.put_u32(msg.timestamp);
        }

        out.put_slice(&msg.payload[offset..end]);
        offset = end;

        if offset >= len {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_one(cs: &mut ChunkStream, fmt: u8, bytes: &[u8], chunk_size: u32) -> Result<usize> {
        let mut reader = bytes;
        cs.read_chunk(fmt, &mut reader, chunk_size).await
    }

    /// Reads chunks until the context on `csid` completes a message.
    async fn reassemble(bytes: &[u8], chunk_size: u32) -> RtmpMessage {
        let mut reader = bytes;
        let mut streams = std::collections::HashMap::new();
        loop {
            let (fmt, csid, _) = read_basic_header(&mut reader).await.unwrap();
            let cs = streams.entry(csid).or_insert_with(|| ChunkStream::new(csid));
            cs.read_chunk(fmt, &mut reader, chunk_size).await.unwrap();
            if cs.is_complete() {
                assert!(reader.is_empty(), "trailing bytes after message");
                return RtmpMessage::from_chunk_stream(cs);
            }
        }
    }

    #[tokio::test]
    async fn fmt0_then_fmt3_continuation_completes_message() {
        let mut cs = ChunkStream::new(3);
        let first = [
            0x00, 0x00, 0x00, // timestamp
            0x00, 0x00, 0x08, // message length
            0x00, // type id
            0x00, 0x00, 0x00, 0x00, // stream id
            0x01, 0x02, 0x03, 0x04,
        ];
        let used = read_one(&mut cs, FMT0, &first, 4).await.unwrap();
        assert_eq!(used, 15);
        assert_eq!(cs.message_length, 8);
        assert_eq!(cs.data_index(), 4);
        assert_eq!(&cs.data[..], &[1, 2, 3, 4, 0, 0, 0, 0]);
        assert!(!cs.is_complete());

        read_one(&mut cs, FMT3, &[0x05, 0x06, 0x07, 0x08], 4).await.unwrap();
        assert!(cs.is_complete());
        assert_eq!(&cs.take_payload()[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn fmt0_extended_timestamp_sets_clock() {
        let mut cs = ChunkStream::new(3);
        let bytes = [
            0xff, 0xff, 0xff, 0x00, 0x00, 0x01, 0x09, 0x01, 0x00, 0x00, 0x00, //
            0x01, 0x00, 0x00, 0x00, // extended timestamp
            0xaa,
        ];
        read_one(&mut cs, FMT0, &bytes, 128).await.unwrap();
        assert_eq!(cs.clock, 0x0100_0000);
        assert_eq!(cs.message_type_id, 9);
        assert_eq!(cs.message_stream_id, 1);
        assert!(cs.extended);
        assert!(cs.is_complete());
    }

    #[tokio::test]
    async fn fmt1_and_fmt2_add_deltas() {
        let mut cs = ChunkStream::new(4);
        read_one(&mut cs, FMT0, &[0, 0, 100, 0, 0, 1, 8, 1, 0, 0, 0, 0xaf], 128)
            .await
            .unwrap();
        assert_eq!(cs.clock, 100);

        read_one(&mut cs, FMT1, &[0, 0, 23, 0, 0, 2, 8, 0xaf, 0x01], 128)
            .await
            .unwrap();
        assert_eq!(cs.clock, 123);
        assert_eq!(cs.message_length, 2);
        assert_eq!(cs.message_stream_id, 1);

        read_one(&mut cs, FMT2, &[0, 0, 23, 0xaf, 0x01], 128).await.unwrap();
        assert_eq!(cs.clock, 146);
        assert!(cs.is_complete());

        // fmt3 starting a new message reuses the cached delta
        read_one(&mut cs, FMT3, &[0xaf, 0x01], 128).await.unwrap();
        assert_eq!(cs.clock, 169);
        assert_eq!(cs.last_fmt, FMT2);
    }

    #[tokio::test]
    async fn extended_delta_is_added_and_cached() {
        let mut cs = ChunkStream::new(4);
        read_one(&mut cs, FMT0, &[0, 0, 10, 0, 0, 0, 8, 0, 0, 0, 0], 128)
            .await
            .unwrap();
        read_one(&mut cs, FMT1, &[0xff, 0xff, 0xff, 0, 0, 0, 8, 0x01, 0x00, 0x00, 0x00], 128)
            .await
            .unwrap();
        assert_eq!(cs.clock, 10 + 0x0100_0000);
        assert_eq!(cs.timestamp_delta, 0x0100_0000);

        // A new message via fmt3 carries its own extended delta on the wire
        read_one(&mut cs, FMT3, &[0x00, 0x00, 0x00, 0x05], 128).await.unwrap();
        assert_eq!(cs.clock, 10 + 0x0100_0000 + 5);
    }

    #[tokio::test]
    async fn fmt3_after_fmt0_keeps_clock() {
        let mut cs = ChunkStream::new(3);
        read_one(&mut cs, FMT0, &[0, 0, 40, 0, 0, 1, 8, 0, 0, 0, 0, 0xaf], 128)
            .await
            .unwrap();
        read_one(&mut cs, FMT3, &[0xaf], 128).await.unwrap();
        assert_eq!(cs.clock, 40);
        assert!(cs.is_complete());
    }

    #[tokio::test]
    async fn fmt3_after_extended_fmt0_replaces_clock() {
        let mut cs = ChunkStream::new(3);
        read_one(
            &mut cs,
            FMT0,
            &[0xff, 0xff, 0xff, 0, 0, 1, 8, 0, 0, 0, 0, 0x01, 0x00, 0x00, 0x00, 0xaf],
            128,
        )
        .await
        .unwrap();
        read_one(&mut cs, FMT3, &[0x02, 0x00, 0x00, 0x00, 0xaf], 128).await.unwrap();
        assert_eq!(cs.clock, 0x0200_0000);
    }

    #[tokio::test]
    async fn extended_continuation_consumes_timestamp() {
        let mut cs = ChunkStream::new(3);
        read_one(
            &mut cs,
            FMT0,
            &[0xff, 0xff, 0xff, 0, 0, 2, 9, 0, 0, 0, 0, 0x01, 0x00, 0x00, 0x00, 0x11],
            1,
        )
        .await
        .unwrap();
        assert!(!cs.is_complete());
        let used = read_one(&mut cs, FMT3, &[0x01, 0x00, 0x00, 0x00, 0x22], 1).await.unwrap();
        assert_eq!(used, 5);
        assert_eq!(cs.clock, 0x0100_0000);
        assert_eq!(&cs.take_payload()[..], &[0x11, 0x22]);
    }

    #[tokio::test]
    async fn short_read_is_an_io_error() {
        let mut cs = ChunkStream::new(3);
        let err = read_one(&mut cs, FMT0, &[0x00, 0x00, 0x00, 0x00], 128).await.unwrap_err();
        assert!(err.is_disconnect());

        let mut cs = ChunkStream::new(3);
        let err = read_one(&mut cs, FMT0, &[0, 0, 0, 0, 0, 4, 8, 0, 0, 0, 0, 1, 2], 128)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn basic_header_round_trips_every_id() {
        for csid in MIN_CHUNK_STREAM_ID..=MAX_CHUNK_STREAM_ID {
            let fmt = (csid % 4) as u8;
            let mut buf = Vec::new();
            write_basic_header(&mut buf, fmt, csid).unwrap();
            let expected_len = match csid {
                0..=63 => 1,
                64..=319 => 2,
                _ => 3,
            };
            assert_eq!(buf.len(), expected_len, "csid {}", csid);
            let mut reader = &buf[..];
            let (got_fmt, got_csid, used) = read_basic_header(&mut reader).await.unwrap();
            assert_eq!((got_fmt, got_csid, used), (fmt, csid, expected_len));
        }
    }

    #[test]
    fn basic_header_rejects_unencodable_ids() {
        let mut buf = Vec::new();
        assert!(write_basic_header(&mut buf, 0, 0).is_err());
        assert!(write_basic_header(&mut buf, 0, 1).is_err());
        assert!(write_basic_header(&mut buf, 0, MAX_CHUNK_STREAM_ID + 1).is_err());
    }

    #[tokio::test]
    async fn written_chunks_reassemble_for_any_chunk_size() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        for chunk_size in [1, 7, 128, 999, 1000, 1001, 4096] {
            let msg = RtmpMessage::new(5, 1234, 9, 1, Bytes::from(payload.clone()));
            let mut buf = BytesMut::new();
            write_chunks(&mut buf, &msg, chunk_size).unwrap();

            let got = reassemble(&buf, chunk_size).await;
            assert_eq!(got.chunk_stream_id, 5);
            assert_eq!(got.timestamp, 1234);
            assert_eq!(got.type_id, 9);
            assert_eq!(got.stream_id, 1);
            assert_eq!(got.payload, msg.payload);
        }
    }

    #[test]
    fn chunk_count_is_ceiling_of_length() {
        let msg = RtmpMessage::new(3, 0, 20, 0, Bytes::from(vec![0u8; 256]));
        let mut buf = Vec::new();
        write_chunks(&mut buf, &msg, 128).unwrap();
        // one fmt0 header (12 bytes), one fmt3 header (1 byte), no trailing empty chunk
        assert_eq!(buf.len(), 12 + 128 + 1 + 128);

        let empty = RtmpMessage::new(3, 0, 20, 0, Bytes::new());
        let mut buf = Vec::new();
        write_chunks(&mut buf, &empty, 128).unwrap();
        assert_eq!(buf.len(), 12);
    }

    #[tokio::test]
    async fn timestamp_at_three_byte_limit_uses_extended_form() {
        let msg = RtmpMessage::new(6, MAX_3B_TIMESTAMP, 8, 1, Bytes::from_static(&[1, 2, 3]));
        let mut buf = Vec::new();
        write_chunks(&mut buf, &msg, 2).unwrap();
        assert_eq!(&buf[1..4], &[0xff, 0xff, 0xff]);
        assert_eq!(&buf[12..16], &MAX_3B_TIMESTAMP.to_be_bytes());
        // continuation: basic header + extended timestamp + 1 byte
        assert_eq!(buf.len(), 16 + 2 + 1 + 4 + 1);

        let got = reassemble(&buf, 2).await;
        assert_eq!(got.timestamp, MAX_3B_TIMESTAMP);
        assert_eq!(&got.payload[..], &[1, 2, 3]);

        let below = RtmpMessage::new(6, MAX_3B_TIMESTAMP - 1, 8, 1, Bytes::from_static(&[1]));
        let mut buf = Vec::new();
        write_chunks(&mut buf, &below, 128).unwrap();
        assert_eq!(buf.len(), 12 + 1);
    }

    #[tokio::test]
    async fn interleaved_chunk_streams_keep_separate_state() {
        let audio = RtmpMessage::new(4, 10, 8, 1, Bytes::from(vec![0xaa; 6]));
        let video = RtmpMessage::new(6, 20, 9, 1, Bytes::from(vec![0xbb; 6]));
        let mut a = BytesMut::new();
        let mut v = BytesMut::new();
        write_chunks(&mut a, &audio, 4).unwrap();
        write_chunks(&mut v, &video, 4).unwrap();
        // a: 12 + 4 | 1 + 2, v: 12 + 4 | 1 + 2
        let mut wire = Vec::new();
        wire.extend_from_slice(&a[..16]);
        wire.extend_from_slice(&v[..16]);
        wire.extend_from_slice(&a[16..]);
        wire.extend_from_slice(&v[16..]);

        let mut reader = &wire[..];
        let mut streams = std::collections::HashMap::new();
        let mut done = Vec::new();
        while !reader.is_empty() {
            let (fmt, csid, _) = read_basic_header(&mut reader).await.unwrap();
            let cs = streams.entry(csid).or_insert_with(|| ChunkStream::new(csid));
            cs.read_chunk(fmt, &mut reader, 4).await.unwrap();
            if cs.is_complete() {
                done.push(RtmpMessage::from_chunk_stream(cs));
            }
        }
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].payload, audio.payload);
        assert_eq!(done[0].timestamp, 10);
        assert_eq!(done[1].payload, video.payload);
        assert_eq!(done[1].timestamp, 20);
    }
}
