use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{Level, debug, info, warn};

use crate::av::Packet;
use crate::error::Result;
use crate::flv::{TagInfo, audio, video};
use crate::relay::Relay;
use crate::rtmp::command::DEFAULT_MESSAGE_STREAM_ID;
use crate::rtmp::conn::{ConnConfig, ConnObserver, ConnState, NoopObserver, RtmpConn, TraceObserver};
use crate::rtmp::message::RtmpMessage;

pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    config: ConnConfig,
    relay: Arc<Relay>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %addr, error = %e, "failed to set TCP_NODELAY");
    }
    info!(peer = %addr, "connection accepted");

    match serve(stream, config, relay).await {
        Ok(()) => info!(peer = %addr, "connection closed"),
        Err(e) if e.is_disconnect() => debug!(peer = %addr, error = %e, "peer disconnected"),
        Err(e) => warn!(peer = %addr, error = %e, "connection failed"),
    }
}

/// Handshake, header negotiation, then either the publish or the play loop.
pub async fn serve<S>(stream: S, config: ConnConfig, relay: Arc<Relay>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let observer: Box<dyn ConnObserver> = if tracing::enabled!(Level::TRACE) {
        Box::new(TraceObserver)
    } else {
        Box::new(NoopObserver)
    };
    let mut conn = RtmpConn::with_observer(stream, config, observer);

    conn.handshake().await?;
    conn.read_header().await?;

    match conn.state() {
        ConnState::Publishing => publish(&mut conn, &relay).await,
        ConnState::Playing => play(&mut conn, &relay).await,
        _ => Ok(()),
    }
}

async fn publish<S>(conn: &mut RtmpConn<S>, relay: &Arc<Relay>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let publisher = relay.publish(&conn.stream_key())?;
    while let Some(packet) = conn.read_packet().await? {
        log_sequence_header(publisher.key(), &packet);
        publisher.send(packet);
    }
    Ok(())
}

async fn play<S>(conn: &mut RtmpConn<S>, relay: &Arc<Relay>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut subscriber = relay.subscribe(&conn.stream_key());
    loop {
        tokio::select! {
            packet = subscriber.recv() => match packet {
                Some(packet) => conn.write_packet(&packet).await?,
                None => break,
            },
            inbound = conn.wait_inbound() => {
                if !inbound? {
                    debug!(stream = subscriber.key(), "player hung up");
                    return Ok(());
                }
                // acknowledgements, pings and teardown commands from the player
                let msg = conn.read_message().await?;
                conn.handle_message(&msg).await?;
                if conn.state() == ConnState::Closed {
                    return Ok(());
                }
            }
        }
    }
    debug!(stream = subscriber.key(), "publisher gone, ending playback");
    conn.write_message(&RtmpMessage::stream_eof(DEFAULT_MESSAGE_STREAM_ID))
        .await
}

fn log_sequence_header(key: &str, packet: &Packet) {
    match packet.tag {
        Some(TagInfo::Audio(tag)) if tag.is_sequence_header() => {
            if let Some(config) = audio::parse_aac_config(packet.payload.get(2..).unwrap_or(&[])) {
                info!(
                    stream = key,
                    profile = %config.profile,
                    sample_rate = ?config.sample_rate,
                    channels = config.channels,
                    "AAC sequence header"
                );
            }
        }
        Some(TagInfo::Video(tag)) if tag.is_sequence_header() => {
            if let Some(config) = video::parse_avc_config(packet.payload.get(5..).unwrap_or(&[])) {
                info!(
                    stream = key,
                    profile = %config.profile,
                    level = %config.level,
                    "AVC sequence header"
                );
            }
        }
        _ => {}
    }
}
