//! Request/response exchanges with the debug bridge.
//!
//! Each function performs one complete round trip on the given transport and never
//! pipelines requests. Any failure leaves the stream position unknown to the bridge, so
//! nothing is retried here.
use jtag_proxy_protocol::{ControlBytes, ControlLine, RequestHeader, packed_len};

use crate::{
    error::{ProxyError, Result},
    transport::Transport,
};

fn send(transport: &impl Transport, bytes: &[u8]) -> Result<()> {
    let written = transport.write_immediate(bytes)?;
    if written != bytes.len() {
        return Err(ProxyError::ShortWrite {
            expected: bytes.len(),
            written,
        });
    }
    Ok(())
}

/// Clocks `bit_count` cycles driving `line`, optionally capturing TDO into `capture`.
///
/// `drive` holds the values for `line`, LSB first; cycles past its end drive zero.
/// `capture` must hold at least `⌈bit_count / 8⌉` bytes, which are zeroed before reading.
pub fn scan(
    transport: Option<&impl Transport>,
    capture: Option<&mut [u8]>,
    drive: Option<&[u8]>,
    bit_count: u32,
    chain_terminate: bool,
    line: ControlLine,
) -> Result<()> {
    let transport = transport.ok_or(ProxyError::NotConnected)?;
    let header = RequestHeader::scan(bit_count, capture.is_some())?;
    let control = ControlBytes::encode(drive, bit_count, chain_terminate, line)?;
    let response_len = packed_len(bit_count);
    if let Some(capture) = &capture
        && capture.len() < response_len
    {
        return Err(ProxyError::CaptureBufferTooSmall {
            expected: response_len,
            got: capture.len(),
        });
    }

    log::debug!(
        "Scan: bits={}, line={:?}, capture={}, last={}",
        bit_count,
        line,
        capture.is_some(),
        chain_terminate
    );
    log::trace!("Scan control bytes: {:02x?}", control.as_bytes());

    send(transport, &header.to_bytes())?;
    send(transport, control.as_bytes())?;

    if let Some(capture) = capture {
        let capture = &mut capture[..response_len];
        capture.fill(0);
        let read = transport.read_immediate(capture)?;
        if read != response_len {
            return Err(ProxyError::ShortRead {
                expected: response_len,
                read,
            });
        }
        log::trace!("Scan captured bytes: {:02x?}", capture);
    }
    Ok(())
}

/// Drives the chip reset line. The bridge does not answer.
pub fn chip_reset(transport: Option<&impl Transport>, active: bool) -> Result<()> {
    let transport = transport.ok_or(ProxyError::NotConnected)?;
    log::debug!("Chip reset: active={}", active);
    send(transport, &RequestHeader::chip_reset(active).to_bytes())
}
