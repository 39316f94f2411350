use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod av;
mod config;
mod connection;
mod error;
mod flv;
mod relay;
mod rtmp;

use config::{Args, Config};
use relay::Relay;

#[tokio::main]
async fn main() {
    let config = Config::from(Args::parse());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let listener = match TcpListener::bind(&config.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %config.bind_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(
        addr = %config.bind_addr,
        chunk_size = config.conn.chunk_size,
        window_ack_size = config.conn.window_ack_size,
        "listening for RTMP connections"
    );

    let relay = Relay::new(config.sink_buffer);

    // Handle Ctrl+C for clean shutdown
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        tokio::spawn(connection::handle_connection(
                            stream,
                            peer_addr,
                            config.conn,
                            relay.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept error");
                    }
                }
            }
            _ = &mut shutdown => {
                info!(streams = relay.stream_count(), "shutting down");
                break;
            }
        }
    }
}
