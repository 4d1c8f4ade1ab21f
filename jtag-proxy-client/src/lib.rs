//! # JTAG Proxy Client
//!
//! A JTAG cable driver that has no local adapter. Every scan-chain operation is sent to
//! a remote debug bridge, which drives the physical JTAG lines of the target.
//!
//! ## Overview
//!
//! The crate is built around three parts:
//!
//! - **[`connection::Connection`]**: owns the transport to the bridge, reconnects timed out
//!   attempts and reports connectivity changes through a single state callback
//! - **[`exchange`]**: encodes one scan or chip reset, sends it and reads the captured bits
//! - **[`JtagProxy`]**: the [`ScanChain`] operations exposed to the debugger
//!
//! Scan operations are blocking and there is never more than one request in flight.
//! Connection events arrive asynchronously from the transport, so each operation fetches
//! the live transport anew and fails with [`error::ProxyError::NotConnected`] when there is
//! none.
//!
//! For the wire format, see the `jtag_proxy_protocol` crate.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use jtag_proxy_client::{JtagProxy, ScanChain, config::Config, connection::CableState};
//!
//! let mut cable = JtagProxy::tcp(Config::new(4567), Box::new(|state: CableState| {
//!     println!("Cable is now {:?}", state);
//! }));
//! cable.connect()?;
//!
//! cable.tap_reset(true)?;
//! cable.tap_reset(false)?;
//!
//! // Shift 32 bits out of the data register
//! let mut idcode = [0_u8; 4];
//! cable.shift_stream(Some(&mut idcode[..]), None, 32, true)?;
//! ```
//!
//! ## Error Handling
//!
//! Every failure is returned to the caller and nothing is retried, with one exception:
//! timed out asynchronous connection attempts are repeated until one succeeds.
//! After a short read or write the bridge may be out of sync with the stream; the caller
//! should reconnect.
//!
//! ## Logging
//!
//! This crate uses the `log` crate. Connection changes are logged at `info`, every request
//! at `debug` and the raw control and capture bytes at `trace`.
pub mod config;
pub mod connection;
pub mod error;
pub mod exchange;
#[cfg(test)]
mod testing;
pub mod transport;

use jtag_proxy_protocol::ControlLine;

use crate::{
    config::Config,
    connection::{CableState, Connection, StateCallback},
    error::Result,
    transport::{Connector, TcpConnector},
};

/// The operations a debugger needs from a JTAG cable.
pub trait ScanChain {
    type Error;

    /// Clocks a single cycle on TDI, optionally capturing TDO.
    fn shift_bit(
        &mut self,
        capture: Option<&mut bool>,
        drive: bool,
        chain_terminate: bool,
    ) -> std::result::Result<(), Self::Error>;

    /// Clocks `bit_count` cycles on TDI.
    ///
    /// `drive` and `capture` are packed LSB first. TMS is raised on the last cycle if
    /// `chain_terminate` is set.
    fn shift_stream(
        &mut self,
        capture: Option<&mut [u8]>,
        drive: Option<&[u8]>,
        bit_count: u32,
        chain_terminate: bool,
    ) -> std::result::Result<(), Self::Error>;

    /// Asserts or releases the TAP reset line.
    fn tap_reset(&mut self, active: bool) -> std::result::Result<(), Self::Error>;

    /// Asserts or releases the chip reset line.
    fn chip_reset(&mut self, active: bool) -> std::result::Result<(), Self::Error>;

    /// Pushes out buffered operations.
    fn flush(&mut self) -> std::result::Result<(), Self::Error>;
}

/// JTAG cable backed by a remote debug bridge.
pub struct JtagProxy<C: Connector> {
    config: Config,
    connection: Connection<C>,
}

impl JtagProxy<TcpConnector> {
    /// Creates a cable that reaches the bridge over TCP.
    pub fn tcp(config: Config, on_state: StateCallback) -> JtagProxy<TcpConnector> {
        JtagProxy::new(config, TcpConnector::default(), on_state)
    }
}

impl<C: Connector> JtagProxy<C> {
    pub fn new(config: Config, connector: C, on_state: StateCallback) -> JtagProxy<C> {
        JtagProxy {
            config,
            connection: Connection::new(connector, on_state),
        }
    }

    /// Connects to the configured bridge, blocking for at most the configured timeout.
    pub fn connect(&mut self) -> Result<()> {
        self.connection.open(&self.config.endpoint, self.config.connect_timeout)
    }

    /// Connects to the configured bridge in the background, retrying timed out attempts.
    pub fn connect_async(&mut self) {
        self.connection.start(&self.config.endpoint)
    }

    pub fn disconnect(&mut self) {
        self.connection.close()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.transport().is_some()
    }

    pub fn state(&self) -> CableState {
        self.connection.state()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection(&self) -> &Connection<C> {
        &self.connection
    }

    fn scan(
        &mut self,
        capture: Option<&mut [u8]>,
        drive: Option<&[u8]>,
        bit_count: u32,
        chain_terminate: bool,
        line: ControlLine,
    ) -> Result<()> {
        let transport = self.connection.transport();
        let result = exchange::scan(
            transport.as_deref(),
            capture,
            drive,
            bit_count,
            chain_terminate,
            line,
        );
        if let Err(e) = &result {
            log::error!("JTAG Proxy: Scan of {} bits failed: {}", bit_count, e);
        }
        result
    }
}

impl<C: Connector> ScanChain for JtagProxy<C> {
    type Error = error::ProxyError;

    fn shift_bit(
        &mut self,
        capture: Option<&mut bool>,
        drive: bool,
        chain_terminate: bool,
    ) -> Result<()> {
        let drive = [drive as u8];
        match capture {
            Some(bit) => {
                let mut captured = [0_u8; 1];
                self.scan(
                    Some(&mut captured[..]),
                    Some(&drive[..]),
                    1,
                    chain_terminate,
                    ControlLine::Tdi,
                )?;
                *bit = captured[0] & 1 != 0;
                Ok(())
            }
            None => self.scan(None, Some(&drive[..]), 1, chain_terminate, ControlLine::Tdi),
        }
    }

    fn shift_stream(
        &mut self,
        capture: Option<&mut [u8]>,
        drive: Option<&[u8]>,
        bit_count: u32,
        chain_terminate: bool,
    ) -> Result<()> {
        self.scan(capture, drive, bit_count, chain_terminate, ControlLine::Tdi)
    }

    fn tap_reset(&mut self, active: bool) -> Result<()> {
        // TRST is active low
        let drive = [!active as u8];
        self.scan(None, Some(&drive[..]), 1, false, ControlLine::TapReset)
    }

    fn chip_reset(&mut self, active: bool) -> Result<()> {
        let transport = self.connection.transport();
        exchange::chip_reset(transport.as_deref(), active)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
