//! The byte stream that carries requests to the debug bridge.
//!
//! The cable only needs blocking reads and writes of exact byte counts plus asynchronous
//! connect/disconnect notifications. [`TcpConnector`] provides both on top of
//! [`std::net::TcpStream`]; other transports implement [`Connector`] and [`Transport`].
use std::{
    io::{self, ErrorKind, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crate::config::Endpoint;

/// A connected byte stream.
pub trait Transport: Send + Sync + 'static {
    /// Writes `buf`, blocking until every byte is sent or the stream ends.
    ///
    /// Returns the number of bytes actually sent. A count below `buf.len()` means the stream
    /// was closed part way through.
    fn write_immediate(&self, buf: &[u8]) -> io::Result<usize>;

    /// Fills `buf`, blocking until every byte is received or the stream ends.
    ///
    /// Returns the number of bytes actually received.
    fn read_immediate(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Shuts the stream down. Pending and future I/O fails.
    fn close(&self);
}

/// Receiver of transport lifecycle events.
pub trait TransportEvents<T>: Send + Sync {
    /// An asynchronous connection attempt finished. `None` means it did not complete in time.
    fn on_transport_connected(&self, transport: Option<T>);

    /// The peer closed a previously connected transport.
    ///
    /// Not reported for transports closed through [`Transport::close`].
    fn on_transport_disconnected(&self);
}

/// Connectors only hold a weak reference to whoever listens for events.
pub type EventSink<T> = Weak<dyn TransportEvents<T>>;

/// Opens transports to a debug bridge.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Connects and blocks until the handshake completes or `timeout` expires.
    ///
    /// A later close by the peer is reported through `events`.
    fn connect_blocking(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
        events: EventSink<Self::Transport>,
    ) -> io::Result<Self::Transport>;

    /// Starts a connection attempt and returns immediately.
    ///
    /// The outcome is delivered through [`TransportEvents::on_transport_connected`].
    fn connect(&self, endpoint: &Endpoint, events: EventSink<Self::Transport>);
}

/// TCP implementation of [`Connector`].
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Timeout of each asynchronous connection attempt.
    pub attempt_timeout: Duration,
    /// How often the disconnect monitor polls a socket that has unread data.
    pub poll_interval: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl TcpConnector {
    /// Tries every resolved address until one connects, all within `timeout`.
    fn dial(endpoint: &Endpoint, timeout: Duration) -> io::Result<TcpStream> {
        let deadline = Instant::now().checked_add(timeout);
        let mut last_error = None;
        for addr in (endpoint.host.as_str(), endpoint.port).to_socket_addrs()? {
            let remaining = deadline.map_or(timeout, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            });
            if remaining.is_zero() {
                last_error = Some(io::Error::new(
                    ErrorKind::TimedOut,
                    format!("connecting to {} timed out", endpoint),
                ));
                break;
            }
            match TcpStream::connect_timeout(&addr, remaining) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    log::debug!("Connecting to {} failed: {}", addr, e);
                    last_error = Some(e)
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                ErrorKind::AddrNotAvailable,
                format!("{} did not resolve to any address", endpoint.host),
            )
        }))
    }

    fn establish(
        &self,
        stream: TcpStream,
        events: EventSink<TcpTransport>,
    ) -> io::Result<TcpTransport> {
        stream.set_nodelay(true)?;
        let probe = stream.try_clone()?;
        let liveness = Arc::new(Liveness {
            closed: AtomicBool::new(false),
            reported: AtomicBool::new(false),
            events,
        });
        let watched = liveness.clone();
        let poll_interval = self.poll_interval;
        thread::Builder::new()
            .name("jtag-proxy-monitor".to_string())
            .spawn(move || monitor(probe, watched, poll_interval))?;
        Ok(TcpTransport { stream, liveness })
    }
}

/// End-of-life bookkeeping shared by a [`TcpTransport`] and its monitor thread.
struct Liveness {
    /// Set once the transport is shut down locally
    closed: AtomicBool,
    /// Set once a close by the peer was reported
    reported: AtomicBool,
    events: EventSink<TcpTransport>,
}

impl Liveness {
    fn ended(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.reported.load(Ordering::Acquire)
    }

    /// Reports a close by the peer at most once. Local closes are never reported.
    fn peer_closed(&self) {
        if self.closed.load(Ordering::Acquire) || self.reported.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(events) = self.events.upgrade() {
            events.on_transport_disconnected();
        }
    }
}

/// Blocks until `stream` closes, then reports the disconnect unless it was closed locally.
///
/// `peek` cannot see a close by the peer while unread data is queued in front of it. In
/// that case the read path reports the close once it runs into the end of the stream.
fn monitor(stream: TcpStream, liveness: Arc<Liveness>, poll_interval: Duration) {
    let mut probe = [0_u8; 1];
    loop {
        match stream.peek(&mut probe) {
            Ok(0) => break,
            Ok(_) if liveness.ended() => return,
            // Response data waiting for the scan path
            Ok(_) => thread::sleep(poll_interval),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                log::debug!("Monitored connection failed: {}", e);
                break;
            }
        }
    }
    liveness.peer_closed();
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    fn connect_blocking(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
        events: EventSink<TcpTransport>,
    ) -> io::Result<TcpTransport> {
        let stream = Self::dial(endpoint, timeout)?;
        self.establish(stream, events)
    }

    fn connect(&self, endpoint: &Endpoint, events: EventSink<TcpTransport>) {
        let connector = self.clone();
        let target = endpoint.clone();
        let spawned = thread::Builder::new()
            .name("jtag-proxy-connect".to_string())
            .spawn(move || {
                let transport = Self::dial(&target, connector.attempt_timeout)
                    .and_then(|stream| connector.establish(stream, events.clone()));
                let transport = match transport {
                    Ok(transport) => Some(transport),
                    Err(e) => {
                        log::debug!("Connection attempt to {} failed: {}", target, e);
                        None
                    }
                };
                if let Some(events) = events.upgrade() {
                    events.on_transport_connected(transport);
                }
            });
        if let Err(e) = spawned {
            log::error!("Could not start connection attempt to {}: {}", endpoint, e);
        }
    }
}

/// A connected TCP stream to the debug bridge.
pub struct TcpTransport {
    stream: TcpStream,
    liveness: Arc<Liveness>,
}

impl TcpTransport {
    fn shutdown(&self) -> io::Result<()> {
        self.liveness.closed.store(true, Ordering::Release);
        self.stream.shutdown(Shutdown::Both)
    }
}

impl Transport for TcpTransport {
    fn write_immediate(&self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            match (&self.stream).write(&buf[written..]) {
                Ok(0) => {
                    self.liveness.peer_closed();
                    break;
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.liveness.peer_closed();
                    if written == 0 {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        Ok(written)
    }

    fn read_immediate(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut read = 0;
        while read < buf.len() {
            match (&self.stream).read(&mut buf[read..]) {
                Ok(0) => {
                    self.liveness.peer_closed();
                    break;
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.liveness.peer_closed();
                    if read == 0 {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        Ok(read)
    }

    fn close(&self) {
        if let Err(e) = self.shutdown() {
            log::debug!("Shutting down connection failed: {}", e);
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        // Wakes up the monitor, which holds its own handle to the socket
        let _ = self.shutdown();
    }
}
