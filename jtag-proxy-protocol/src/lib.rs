//! # JTAG Proxy Protocol Library
//!
//! This crate implements the wire format used to tunnel JTAG scan-chain operations to a
//! remote debug bridge over a byte stream (usually TCP).
//!
//! ## Overview
//!
//! Every request starts with a fixed 12 byte header. Two request types exist:
//!
//! - **Scan**: clock `bit_count` cycles. The header is followed by one control byte per
//!   cycle. If capture was requested, the bridge answers with `⌈bit_count / 8⌉` bytes of
//!   TDO data, packed LSB first.
//! - **ChipReset**: drive the chip reset line. No payload, no response.
//!
//! ## Message Format
//!
//! All header fields are little-endian `u32` words:
//!
//! - **Scan**: `0 <bit_count> <capture>` followed by `bit_count` control bytes
//! - **ChipReset**: `1 <active> 0`
//!
//! Each control byte drives one cycle: bit 0 is TDI, bit 1 is TRST (active low, held high
//! unless TRST itself is being driven) and bit 2 is TMS.
//!
//! ## Basic Usage
//!
//! ### Encoding a scan
//!
//! ```
//! use jtag_proxy_protocol::{ControlBytes, ControlLine, RequestHeader};
//!
//! // Shift 0b101 on TDI and leave the shift state on the last cycle
//! let control = ControlBytes::encode(Some(&[0b101]), 3, true, ControlLine::Tdi)
//!     .expect("3 bits are within the limit");
//! assert_eq!(control.as_bytes(), &[0b011, 0b010, 0b111]);
//!
//! let header = RequestHeader::scan(3, true).expect("3 bits are within the limit");
//! let mut buffer = Vec::new();
//! header.write_to(&mut buffer).expect("Writing to vector shouldn't fail");
//! assert_eq!(buffer, [0, 0, 0, 0, 3, 0, 0, 0, 1, 0, 0, 0]);
//! assert_eq!(header.response_len(), 1);
//! ```
//!
//! ### Reading requests on the bridge side
//!
//! ```
//! use jtag_proxy_protocol::Request;
//! use std::io::Cursor;
//!
//! let wire = [1_u8, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0];
//! let request = Request::from_reader(&mut Cursor::new(wire)).expect("Request should parse");
//! assert_eq!(request, Request::ChipReset { active: true });
//! ```
//!
//! ## Limits
//!
//! A scan must clock fewer than [`MAX_SCAN_BITS`] cycles. Longer scans are rejected with
//! [`error::ProtocolError::TooManyBits`] before any byte is produced.
//!
//! ## Features
//!
//! - `tokio`: adds [`framed::RequestCodec`], a `tokio_util` codec for asynchronous bridges.

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
#[cfg(feature = "tokio")]
pub mod framed;
