/// Read and write implementations for the protocol requests
use std::io::{self, Read, Write};

use crate::{
    error::ReadError,
    protocol::{ControlBytes, MAX_SCAN_BITS, Request, RequestHeader},
};

fn word(bytes: &[u8; RequestHeader::LEN], index: usize) -> u32 {
    let mut buf = [0_u8; 4];
    buf.copy_from_slice(&bytes[4 * index..4 * index + 4]);
    u32::from_le_bytes(buf)
}

fn flag(field: &'static str, value: u32) -> Result<bool, ReadError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(ReadError::InvalidFlag { field, value }),
    }
}

impl RequestHeader {
    /// Serializes the header as three little-endian words: type, then two type-specific fields.
    pub fn to_bytes(&self) -> [u8; RequestHeader::LEN] {
        let words = match *self {
            RequestHeader::Scan { bit_count, capture } => {
                [Self::TAG_SCAN, bit_count, capture as u32]
            }
            RequestHeader::ChipReset { active } => [Self::TAG_CHIP_RESET, active as u32, 0],
        };
        let mut out = [0_u8; RequestHeader::LEN];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; RequestHeader::LEN]) -> Result<RequestHeader, ReadError> {
        match word(bytes, 0) {
            Self::TAG_SCAN => {
                let bit_count = word(bytes, 1);
                if bit_count >= MAX_SCAN_BITS {
                    return Err(ReadError::TooManyBits { got: bit_count });
                }
                Ok(RequestHeader::Scan {
                    bit_count,
                    capture: flag("capture", word(bytes, 2))?,
                })
            }
            Self::TAG_CHIP_RESET => Ok(RequestHeader::ChipReset {
                active: flag("active", word(bytes, 1))?,
            }),
            other => Err(ReadError::InvalidRequestType(other)),
        }
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    pub fn from_reader(reader: &mut impl Read) -> Result<RequestHeader, ReadError> {
        let mut buf = [0_u8; RequestHeader::LEN];
        reader.read_exact(&mut buf)?;
        RequestHeader::from_bytes(&buf)
    }
}

impl Request {
    pub fn from_reader(reader: &mut impl Read) -> Result<Request, ReadError> {
        match RequestHeader::from_reader(reader)? {
            RequestHeader::Scan { bit_count, capture } => {
                let mut control = vec![0_u8; bit_count as usize].into_boxed_slice();
                reader.read_exact(&mut control)?;
                Ok(Request::Scan {
                    capture,
                    control: ControlBytes::from_raw(control),
                })
            }
            RequestHeader::ChipReset { active } => Ok(Request::ChipReset { active }),
        }
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        self.header().write_to(writer)?;
        match self {
            Request::Scan { control, .. } => writer.write_all(control.as_bytes()),
            Request::ChipReset { .. } => Ok(()),
        }
    }
}
