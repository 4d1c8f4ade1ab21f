use std::io;

use jtag_proxy_protocol::error::ProtocolError;
use thiserror::Error;

/// Errors returned by the cable operations.
///
/// `ShortWrite` and `ShortRead` leave the stream out of sync with the bridge.
/// The connection should be closed and opened again after either of them.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Connection to the debug bridge timed out")]
    ConnectTimeout,
    #[error("Could not connect to the debug bridge: {0}")]
    Connect(#[source] io::Error),
    #[error("No connection to the debug bridge")]
    NotConnected,
    #[error("Capture buffer too small: need {expected} bytes, got {got}")]
    CaptureBufferTooSmall { expected: usize, got: usize },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Short write to the debug bridge: sent {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },
    #[error("Short read from the debug bridge: got {read} of {expected} bytes")]
    ShortRead { expected: usize, read: usize },
    #[error("{0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
