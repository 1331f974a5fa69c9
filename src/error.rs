//! Error types for scp-runtime.

use std::fmt;
use std::io;

/// Result type for scp-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// A UDP send or socket setup failed
    Io(io::Error),
    /// Configuration error
    Config(ConfigError),
    /// Retry budget exhausted without a matching response
    Timeout,
    /// The connection was closed while the request was pending or in flight
    Cancelled,
    /// The request was submitted after the connection shut down
    ConnectionClosed,
    /// A bulk-transfer segment was rejected by the machine; carries the
    /// response code so the caller can inspect it
    Remote { cmd_rc: u16 },
    /// A response violated the protocol (e.g. a read segment of the wrong length)
    Protocol(ProtocolError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Timeout => write!(f, "No response within the retry budget"),
            Error::Cancelled => write!(f, "Request cancelled by connection shutdown"),
            Error::ConnectionClosed => write!(f, "Connection has shut down"),
            Error::Remote { cmd_rc } => write!(f, "Machine returned error code {:#04x}", cmd_rc),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Configuration error
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Protocol-level error
#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
}

impl ProtocolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
