use std::io;

use thiserror::Error;

use crate::flv::TagError;
use crate::relay::RelayError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while encoding or decoding AMF values.
#[derive(Debug, Error)]
pub enum AmfError {
    #[error("unexpected end of AMF data")]
    UnexpectedEof,

    #[error("unsupported AMF type marker 0x{0:02x}")]
    UnsupportedType(u8),

    #[error("AMF {0} is not implemented")]
    NotImplemented(&'static str),

    #[error("invalid AMF marker 0x{0:02x}")]
    InvalidMarker(u8),

    #[error("invalid AMF3 reference index {0}")]
    InvalidReference(usize),

    #[error("AMF values nested deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("value cannot be encoded as AMF0: {0}")]
    Unencodable(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("AMF error: {0}")]
    Amf(#[from] AmfError),

    #[error("FLV tag error: {0}")]
    Tag(#[from] TagError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// True when the peer went away (EOF or reset) rather than sending bad data.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
