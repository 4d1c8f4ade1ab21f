use crate::error::ProtocolError;

/// Scan requests carry a 16 bit cycle count on the bridge side.
/// Any `bit_count` at or above this value is rejected before anything is sent.
pub const MAX_SCAN_BITS: u32 = 1 << 16;

/// Returns the number of bytes needed to hold `bit_count` packed bits.
pub fn packed_len(bit_count: u32) -> usize {
    bit_count.div_ceil(8) as usize
}

/// The JTAG lines that the debug bridge drives on each scan cycle.
///
/// Every cycle of a scan request carries one control byte in which each line
/// occupies a fixed bit position.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ControlLine {
    /// Test Data In, the primary data line.
    Tdi,
    /// Test Reset. Active low on the wire.
    TapReset,
    /// Test Mode Select.
    Tms,
}

impl ControlLine {
    /// Bit position of this line inside a control byte.
    pub const fn bit(self) -> u8 {
        match self {
            ControlLine::Tdi => 0,
            ControlLine::TapReset => 1,
            ControlLine::Tms => 2,
        }
    }

    pub const fn mask(self) -> u8 {
        1 << self.bit()
    }
}

/// Fixed-size header preceding every request on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestHeader {
    /// Clock `bit_count` cycles. The header is followed by one control byte per cycle and,
    /// if `capture` is set, the bridge answers with the captured TDO bits.
    Scan { bit_count: u32, capture: bool },
    /// Drive the chip reset line. There is no payload and no response.
    ChipReset { active: bool },
}

impl RequestHeader {
    /// Encoded size of every header, independent of its type.
    pub const LEN: usize = 12;

    pub(crate) const TAG_SCAN: u32 = 0;
    pub(crate) const TAG_CHIP_RESET: u32 = 1;

    /// Creates a scan header, rejecting cycle counts the bridge cannot represent.
    pub fn scan(bit_count: u32, capture: bool) -> Result<RequestHeader, ProtocolError> {
        if bit_count >= MAX_SCAN_BITS {
            return Err(ProtocolError::TooManyBits { bits: bit_count });
        }
        Ok(RequestHeader::Scan { bit_count, capture })
    }

    pub fn chip_reset(active: bool) -> RequestHeader {
        RequestHeader::ChipReset { active }
    }

    /// Number of control bytes that follow this header.
    pub fn payload_len(&self) -> usize {
        match self {
            RequestHeader::Scan { bit_count, .. } => *bit_count as usize,
            RequestHeader::ChipReset { .. } => 0,
        }
    }

    /// Number of bytes the bridge sends back in response to this header.
    pub fn response_len(&self) -> usize {
        match self {
            RequestHeader::Scan {
                bit_count,
                capture: true,
            } => packed_len(*bit_count),
            _ => 0,
        }
    }
}

/// The per-cycle control bytes of a scan request.
///
/// Byte `i` drives cycle `i`: the selected line carries the drive bit, TRST is held
/// deasserted (high) unless it is the selected line and TMS is raised on the final
/// cycle of a chain-terminating scan.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ControlBytes(Box<[u8]>);

impl ControlBytes {
    /// Encodes `bit_count` cycles driving `line` from the LSB-first packed `drive` bits.
    ///
    /// A missing `drive` buffer drives zeroes, as does any byte past its end.
    pub fn encode(
        drive: Option<&[u8]>,
        bit_count: u32,
        chain_terminate: bool,
        line: ControlLine,
    ) -> Result<ControlBytes, ProtocolError> {
        if bit_count >= MAX_SCAN_BITS {
            return Err(ProtocolError::TooManyBits { bits: bit_count });
        }
        let hold_trst = if line == ControlLine::TapReset {
            0
        } else {
            ControlLine::TapReset.mask()
        };

        let mut cycles = vec![0_u8; bit_count as usize].into_boxed_slice();
        let mut value = 0_u8;
        for (i, cycle) in cycles.iter_mut().enumerate() {
            if i % 8 == 0 {
                value = drive.and_then(|d| d.get(i / 8)).copied().unwrap_or(0);
            }
            *cycle = ((value & 1) << line.bit()) | hold_trst;
            value >>= 1;
        }

        if chain_terminate && let Some(last) = cycles.last_mut() {
            *last |= ControlLine::Tms.mask();
        }
        Ok(ControlBytes(cycles))
    }

    /// Wraps control bytes received from the wire without interpreting them.
    pub fn from_raw(bytes: Box<[u8]>) -> ControlBytes {
        ControlBytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The number of scan cycles
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Collects the value driven on `line` in every cycle, packed LSB first.
    pub fn line_bits(&self, line: ControlLine) -> Box<[u8]> {
        pack_bits(self.0.iter().map(|cycle| cycle & line.mask() != 0))
    }
}

/// Packs a sequence of bits into bytes, LSB first, the layout used for both drive and
/// captured bit vectors.
pub fn pack_bits(bits: impl IntoIterator<Item = bool>) -> Box<[u8]> {
    let mut packed = Vec::new();
    for (i, bit) in bits.into_iter().enumerate() {
        if i % 8 == 0 {
            packed.push(0);
        }
        if bit && let Some(byte) = packed.last_mut() {
            *byte |= 1 << (i % 8);
        }
    }
    packed.into_boxed_slice()
}

/// A complete request as seen by the debug bridge.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    Scan {
        capture: bool,
        control: ControlBytes,
    },
    ChipReset {
        active: bool,
    },
}

impl Request {
    /// The header that announces this request on the wire.
    pub fn header(&self) -> RequestHeader {
        match self {
            Request::Scan { capture, control } => RequestHeader::Scan {
                bit_count: control.len() as u32,
                capture: *capture,
            },
            Request::ChipReset { active } => RequestHeader::ChipReset { active: *active },
        }
    }
}
