use clap::Parser;

use crate::rtmp::conn::ConnConfig;
use crate::rtmp::{DEFAULT_LOCAL_CHUNK_SIZE, DEFAULT_WINDOW_ACK_SIZE};

#[derive(Parser, Debug)]
#[command(name = "rustmp", version, about = "RTMP live relay server")]
pub struct Args {
    /// Network interface to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub interface: String,
    /// Port to listen on (e.g., 1935)
    pub port: u16,

    /// Chunk size announced to peers with SetChunkSize
    #[arg(long, default_value_t = DEFAULT_LOCAL_CHUNK_SIZE,
          value_parser = clap::value_parser!(u32).range(1..=0x7fff_ffff))]
    pub chunk_size: u32,

    /// Window acknowledgement size and peer bandwidth announced on connect
    #[arg(long, default_value_t = DEFAULT_WINDOW_ACK_SIZE)]
    pub window_ack_size: u32,

    /// Packets buffered per subscriber before packets are dropped
    #[arg(long, default_value_t = 1000)]
    pub sink_buffer: usize,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub conn: ConnConfig,
    pub sink_buffer: usize,
    pub log_level: String,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: format!("{}:{}", args.interface, args.port),
            conn: ConnConfig {
                chunk_size: args.chunk_size,
                window_ack_size: args.window_ack_size,
            },
            sink_buffer: args.sink_buffer,
            log_level: args.log_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config: Config = Args::parse_from(["rustmp", "0.0.0.0", "1935"]).into();
        assert_eq!(config.bind_addr, "0.0.0.0:1935");
        assert_eq!(config.conn, ConnConfig::default());
        assert_eq!(config.sink_buffer, 1000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn overrides() {
        let config: Config = Args::parse_from([
            "rustmp",
            "127.0.0.1",
            "1936",
            "--chunk-size",
            "4096",
            "--window-ack-size",
            "5000000",
            "--sink-buffer",
            "64",
        ])
        .into();
        assert_eq!(config.conn.chunk_size, 4096);
        assert_eq!(config.conn.window_ack_size, 5_000_000);
        assert_eq!(config.sink_buffer, 64);
    }

    #[test]
    fn chunk_size_must_be_positive() {
        assert!(Args::try_parse_from(["rustmp", "0.0.0.0", "1935", "--chunk-size", "0"]).is_err());
    }
}
