use std::{
    collections::VecDeque,
    io::{self, Cursor},
    sync::{Mutex, MutexGuard},
};

use jtag_proxy_protocol::{ControlLine, Request};

use crate::transport::Transport;

#[derive(Default)]
pub(crate) struct Wire {
    written: Vec<u8>,
    parsed: usize,
    requests: Vec<Request>,
    responses: VecDeque<u8>,
}

/// In-memory bridge that answers every capturing scan with the bits it drove on TDI.
#[derive(Default)]
pub struct LoopbackTransport {
    pub(crate) wire: Mutex<Wire>,
    /// Total number of bytes accepted before the stream "ends"
    pub write_limit: Option<usize>,
    /// Drop this many bytes from the end of every response
    pub truncate_responses: usize,
}

impl LoopbackTransport {
    fn wire(&self) -> MutexGuard<'_, Wire> {
        self.wire.lock().unwrap()
    }

    pub fn written(&self) -> Vec<u8> {
        self.wire().written.clone()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.wire().requests.clone()
    }
}

impl Transport for LoopbackTransport {
    fn write_immediate(&self, buf: &[u8]) -> io::Result<usize> {
        let mut wire = self.wire();
        let accepted = match self.write_limit {
            Some(limit) => buf.len().min(limit.saturating_sub(wire.written.len())),
            None => buf.len(),
        };
        wire.written.extend_from_slice(&buf[..accepted]);

        loop {
            let mut cursor = Cursor::new(&wire.written[wire.parsed..]);
            let Ok(request) = Request::from_reader(&mut cursor) else {
                break;
            };
            let consumed = cursor.position() as usize;
            wire.parsed += consumed;
            if let Request::Scan {
                capture: true,
                control,
            } = &request
            {
                let tdo = control.line_bits(ControlLine::Tdi);
                let keep = tdo.len().saturating_sub(self.truncate_responses);
                wire.responses.extend(&tdo[..keep]);
            }
            wire.requests.push(request);
        }
        Ok(accepted)
    }

    fn read_immediate(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut wire = self.wire();
        let mut read = 0;
        while read < buf.len() {
            let Some(byte) = wire.responses.pop_front() else {
                break;
            };
            buf[read] = byte;
            read += 1;
        }
        Ok(read)
    }

    fn close(&self) {}
}
