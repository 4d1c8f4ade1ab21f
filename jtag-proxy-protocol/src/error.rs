use std::io;

use thiserror::Error;

use crate::protocol::MAX_SCAN_BITS;

/// Errors raised while building a request, before anything touches the wire.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum ProtocolError {
    #[error("Scan of {bits} bits is too long! Maximum is {}", MAX_SCAN_BITS - 1)]
    TooManyBits { bits: u32 },
}

/// Errors that may occur when reading a request from a stream.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("{0}")]
    IoError(#[from] io::Error),
    #[error("Received invalid request type {0}")]
    InvalidRequestType(u32),
    #[error("Invalid value {value} for flag {field}")]
    InvalidFlag { field: &'static str, value: u32 },
    #[error("Scan of {got} bits is too long! Maximum is {}", MAX_SCAN_BITS - 1)]
    TooManyBits { got: u32 },
}
