//! Connection lifecycle of the cable.
//!
//! [`Connection`] owns the live transport and turns transport events into
//! [`CableState`] transitions. The caller learns about transitions only through the
//! state callback given to [`Connection::new`].
//!
//! Every call to [`Connection::open`] or [`Connection::start`] begins a new attempt with
//! its own event sink. Starting another attempt or closing the connection retires the
//! previous sink, so late events from an abandoned attempt or an old transport are
//! dropped instead of touching the current link.
use std::{
    io::ErrorKind,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::{
    config::Endpoint,
    error::{ProxyError, Result},
    transport::{Connector, EventSink, Transport, TransportEvents},
};

/// Connectivity of the cable as seen by the caller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CableState {
    Disconnected,
    Connecting,
    Connected,
}

/// Invoked with `Connected` or `Disconnected` whenever the connectivity changes.
pub type StateCallback = Box<dyn Fn(CableState) + Send + Sync>;

struct Link<C: Connector> {
    state: CableState,
    /// Last state handed to the callback
    reported: CableState,
    endpoint: Option<Endpoint>,
    transport: Option<Arc<C::Transport>>,
    /// Sink of the current attempt. Connectors only hold it weakly.
    attempt: Option<Arc<Attempt<C>>>,
    generation: u64,
}

struct Shared<C: Connector> {
    connector: C,
    link: Mutex<Link<C>>,
    on_state: StateCallback,
    retries: AtomicUsize,
    me: Weak<Shared<C>>,
}

/// Event sink for one connection attempt and the transport it produces.
struct Attempt<C: Connector> {
    shared: Weak<Shared<C>>,
    generation: u64,
}

fn sink<C: Connector>(attempt: &Arc<Attempt<C>>) -> EventSink<C::Transport> {
    let weak: Weak<Attempt<C>> = Arc::downgrade(attempt);
    weak
}

impl<C: Connector> Shared<C> {
    fn link(&self) -> MutexGuard<'_, Link<C>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retires the current attempt and returns the sink of a fresh one.
    fn next_attempt(&self, link: &mut Link<C>) -> EventSink<C::Transport> {
        link.generation += 1;
        let attempt = Arc::new(Attempt {
            shared: self.me.clone(),
            generation: link.generation,
        });
        let events = sink(&attempt);
        link.attempt = Some(attempt);
        events
    }

    /// Applies `state` and notifies the callback if the caller-visible state changed.
    ///
    /// Consumes the guard so the callback runs with the link unlocked.
    fn apply(
        &self,
        mut link: MutexGuard<'_, Link<C>>,
        state: CableState,
        transport: Option<Arc<C::Transport>>,
    ) {
        link.state = state;
        link.transport = transport;
        let notify = state != CableState::Connecting && state != link.reported;
        if notify {
            link.reported = state;
        }
        drop(link);
        if notify {
            (self.on_state)(state);
        }
    }

    fn endpoint_name(&self) -> String {
        self.link()
            .endpoint
            .as_ref()
            .map_or_else(|| "<unknown>".to_string(), Endpoint::to_string)
    }
}

impl<C: Connector> TransportEvents<C::Transport> for Attempt<C> {
    fn on_transport_connected(&self, transport: Option<C::Transport>) {
        let Some(shared) = self.shared.upgrade() else {
            if let Some(transport) = transport {
                transport.close();
            }
            return;
        };
        let link = shared.link();
        let current = link.generation == self.generation && link.state == CableState::Connecting;
        match transport {
            Some(transport) if current => {
                let name = link.endpoint.as_ref().map(Endpoint::to_string);
                shared.apply(link, CableState::Connected, Some(Arc::new(transport)));
                log::info!(
                    "JTAG Proxy: Connected to ({})",
                    name.as_deref().unwrap_or("<unknown>")
                );
            }
            Some(transport) => {
                drop(link);
                log::debug!("JTAG Proxy: Dropping connection of an abandoned attempt");
                transport.close();
            }
            None if current => {
                let (Some(endpoint), Some(attempt)) = (link.endpoint.clone(), &link.attempt)
                else {
                    log::error!("JTAG Proxy: Connection attempt timed out without an endpoint");
                    return;
                };
                let events = sink(attempt);
                drop(link);
                log::info!(
                    "JTAG Proxy: Connection to ({}) timed out - retrying",
                    endpoint
                );
                shared.retries.fetch_add(1, Ordering::Relaxed);
                shared.connector.connect(&endpoint, events);
            }
            None => log::debug!("JTAG Proxy: Abandoned connection attempt timed out"),
        }
    }

    fn on_transport_disconnected(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let link = shared.link();
        if link.generation != self.generation || link.state != CableState::Connected {
            log::debug!("JTAG Proxy: Ignoring disconnect of a replaced connection");
            return;
        }
        let name = link.endpoint.as_ref().map(Endpoint::to_string);
        shared.apply(link, CableState::Disconnected, None);
        log::info!(
            "JTAG Proxy: Disconnected from ({})",
            name.as_deref().unwrap_or("<unknown>")
        );
    }
}

/// Owner of the transport handle and of the cable connectivity state.
pub struct Connection<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Connection<C> {
    pub fn new(connector: C, on_state: StateCallback) -> Connection<C> {
        let shared = Arc::new_cyclic(|me| Shared {
            connector,
            link: Mutex::new(Link {
                state: CableState::Disconnected,
                reported: CableState::Disconnected,
                endpoint: None,
                transport: None,
                attempt: None,
                generation: 0,
            }),
            on_state,
            retries: AtomicUsize::new(0),
            me: me.clone(),
        });
        Connection { shared }
    }

    /// Drops any live transport and starts a new attempt against `endpoint`.
    ///
    /// Returns the generation and the event sink of the new attempt.
    fn begin(&self, endpoint: &Endpoint) -> (u64, EventSink<C::Transport>) {
        log::info!("JTAG Proxy: Connecting to ({})", endpoint);
        let (generation, events, previous, torn_down) = {
            let mut link = self.shared.link();
            link.endpoint = Some(endpoint.clone());
            let events = self.shared.next_attempt(&mut link);
            link.state = CableState::Connecting;
            // Replacing a live link counts as a disconnect even though it is closed locally
            let torn_down = link.reported == CableState::Connected;
            if torn_down {
                link.reported = CableState::Disconnected;
            }
            (link.generation, events, link.transport.take(), torn_down)
        };
        if let Some(previous) = previous {
            previous.close();
        }
        if torn_down {
            (self.shared.on_state)(CableState::Disconnected);
        }
        (generation, events)
    }

    /// Connects to `endpoint`, blocking for at most `timeout`.
    pub fn open(&self, endpoint: &Endpoint, timeout: Duration) -> Result<()> {
        let (generation, events) = self.begin(endpoint);
        match self.shared.connector.connect_blocking(endpoint, timeout, events) {
            Ok(transport) => {
                let link = self.shared.link();
                if link.generation != generation {
                    drop(link);
                    log::info!(
                        "JTAG Proxy: Connection to ({}) closed while opening",
                        endpoint
                    );
                    transport.close();
                    return Err(ProxyError::NotConnected);
                }
                self.shared.apply(link, CableState::Connected, Some(Arc::new(transport)));
                log::info!("JTAG Proxy: Connected to ({})", endpoint);
                Ok(())
            }
            Err(e) => {
                log::error!("JTAG Proxy: Connection to ({}) failed: {}", endpoint, e);
                let link = self.shared.link();
                if link.generation == generation {
                    self.shared.apply(link, CableState::Disconnected, None);
                }
                Err(match e.kind() {
                    ErrorKind::TimedOut => ProxyError::ConnectTimeout,
                    _ => ProxyError::Connect(e),
                })
            }
        }
    }

    /// Starts connecting to `endpoint` without blocking.
    ///
    /// Timed out attempts are retried until one succeeds or [`Connection::close`] is called.
    pub fn start(&self, endpoint: &Endpoint) {
        let (_, events) = self.begin(endpoint);
        self.shared.connector.connect(endpoint, events);
    }

    /// Closes the live transport, if any, and abandons pending connection attempts.
    pub fn close(&self) {
        let mut link = self.shared.link();
        link.generation += 1;
        link.attempt = None;
        let transport = link.transport.take();
        self.shared.apply(link, CableState::Disconnected, None);
        if let Some(transport) = transport {
            log::info!(
                "JTAG Proxy: Closing connection to ({})",
                self.shared.endpoint_name()
            );
            transport.close();
        }
    }

    /// The transport to use for the next operation, or `None` while disconnected.
    ///
    /// Callers must not hold on to the handle across operations.
    pub fn transport(&self) -> Option<Arc<C::Transport>> {
        self.shared.link().transport.clone()
    }

    pub fn state(&self) -> CableState {
        self.shared.link().state
    }

    /// Number of automatic reconnects issued after timed out attempts.
    pub fn retries(&self) -> usize {
        self.shared.retries.load(Ordering::Relaxed)
    }
}

impl<C: Connector> Drop for Connection<C> {
    fn drop(&mut self) {
        let transport = {
            let mut link = self.shared.link();
            link.attempt = None;
            link.transport.take()
        };
        if let Some(transport) = transport {
            transport.close();
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        io,
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
            mpsc,
        },
        time::Duration,
    };

    use super::{CableState, Connection, StateCallback};
    use crate::{
        config::Endpoint,
        error::ProxyError,
        transport::{Connector, EventSink, Transport, TransportEvents},
    };

    #[derive(Default)]
    struct NullTransport {
        closed: Arc<AtomicBool>,
    }

    impl Transport for NullTransport {
        fn write_immediate(&self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn read_immediate(&self, buf: &mut [u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Times out the first `failures` asynchronous attempts, then connects.
    struct FlakyConnector {
        failures: Mutex<usize>,
        attempts: Arc<Mutex<Vec<Endpoint>>>,
        blocking: io::ErrorKind,
    }

    impl FlakyConnector {
        fn new(failures: usize) -> (FlakyConnector, Arc<Mutex<Vec<Endpoint>>>) {
            let attempts = Arc::new(Mutex::new(Vec::new()));
            let connector = FlakyConnector {
                failures: Mutex::new(failures),
                attempts: attempts.clone(),
                blocking: io::ErrorKind::TimedOut,
            };
            (connector, attempts)
        }
    }

    impl Connector for FlakyConnector {
        type Transport = NullTransport;

        fn connect_blocking(
            &self,
            _endpoint: &Endpoint,
            _timeout: Duration,
            _events: EventSink<NullTransport>,
        ) -> io::Result<NullTransport> {
            Err(io::Error::from(self.blocking))
        }

        fn connect(&self, endpoint: &Endpoint, events: EventSink<NullTransport>) {
            self.attempts.lock().unwrap().push(endpoint.clone());
            let transport = {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    None
                } else {
                    Some(NullTransport::default())
                }
            };
            std::thread::spawn(move || {
                if let Some(events) = events.upgrade() {
                    events.on_transport_connected(transport);
                }
            });
        }
    }

    type Pending = Arc<Mutex<Vec<EventSink<NullTransport>>>>;

    /// Leaves every asynchronous attempt pending until the test answers it.
    #[derive(Default)]
    struct ParkedConnector {
        pending: Pending,
    }

    impl Connector for ParkedConnector {
        type Transport = NullTransport;

        fn connect_blocking(
            &self,
            _endpoint: &Endpoint,
            _timeout: Duration,
            _events: EventSink<NullTransport>,
        ) -> io::Result<NullTransport> {
            Ok(NullTransport::default())
        }

        fn connect(&self, _endpoint: &Endpoint, events: EventSink<NullTransport>) {
            self.pending.lock().unwrap().push(events);
        }
    }

    fn parked(callback: StateCallback) -> (Connection<ParkedConnector>, Pending) {
        let connector = ParkedConnector::default();
        let pending = connector.pending.clone();
        (Connection::new(connector, callback), pending)
    }

    fn attempt(pending: &Pending, index: usize) -> Arc<dyn TransportEvents<NullTransport>> {
        pending.lock().unwrap()[index].upgrade().unwrap()
    }

    fn recording_callback() -> (StateCallback, mpsc::Receiver<CableState>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let callback: StateCallback = Box::new(move |state: CableState| {
            let _ = tx.lock().unwrap().send(state);
        });
        (callback, rx)
    }

    #[test]
    fn retries_timed_out_connect() {
        let (connector, attempts) = FlakyConnector::new(1);
        let (callback, states) = recording_callback();
        let connection = Connection::new(connector, callback);
        let endpoint = Endpoint::new("bridge", 4567);

        connection.start(&endpoint);
        let state = states.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(state, CableState::Connected);
        assert!(states.recv_timeout(Duration::from_millis(100)).is_err());

        assert_eq!(connection.retries(), 1);
        assert_eq!(*attempts.lock().unwrap(), vec![endpoint.clone(), endpoint]);
        assert_eq!(connection.state(), CableState::Connected);
        assert!(connection.transport().is_some());
    }

    #[test]
    fn disconnect_clears_transport() {
        let (callback, states) = recording_callback();
        let (connection, pending) = parked(callback);

        connection.start(&Endpoint::new("bridge", 4567));
        assert_eq!(connection.state(), CableState::Connecting);
        let events = attempt(&pending, 0);
        events.on_transport_connected(Some(NullTransport::default()));
        assert_eq!(states.try_recv().unwrap(), CableState::Connected);

        events.on_transport_disconnected();
        assert_eq!(states.try_recv().unwrap(), CableState::Disconnected);
        assert!(connection.transport().is_none());
        assert_eq!(connection.state(), CableState::Disconnected);

        // Repeated events do not repeat the notification
        events.on_transport_disconnected();
        assert!(states.try_recv().is_err());
    }

    #[test]
    fn failed_open_reports_timeout() {
        let (connector, _) = FlakyConnector::new(0);
        let (callback, states) = recording_callback();
        let connection = Connection::new(connector, callback);

        let result = connection.open(&Endpoint::new("bridge", 1), Duration::from_millis(10));
        assert!(matches!(result, Err(ProxyError::ConnectTimeout)));
        assert_eq!(connection.state(), CableState::Disconnected);
        assert!(states.try_recv().is_err());
    }

    #[test]
    fn failed_open_reports_connect_error() {
        let (mut connector, _) = FlakyConnector::new(0);
        connector.blocking = io::ErrorKind::ConnectionRefused;
        let (callback, _states) = recording_callback();
        let connection = Connection::new(connector, callback);

        let result = connection.open(&Endpoint::new("bridge", 1), Duration::from_millis(10));
        assert!(matches!(result, Err(ProxyError::Connect(_))));
    }

    #[test]
    fn close_stops_retrying() {
        let (callback, states) = recording_callback();
        let (connection, pending) = parked(callback);

        connection.start(&Endpoint::new("bridge", 4567));
        let events = attempt(&pending, 0);
        connection.close();
        assert_eq!(connection.state(), CableState::Disconnected);

        // A timeout arriving after closing must not start another attempt
        events.on_transport_connected(None);
        assert_eq!(pending.lock().unwrap().len(), 1);
        assert_eq!(connection.retries(), 0);
        assert!(states.try_recv().is_err());
    }

    #[test]
    fn late_connect_after_close_is_dropped() {
        let (callback, states) = recording_callback();
        let (connection, pending) = parked(callback);

        connection.start(&Endpoint::new("bridge", 4567));
        let events = attempt(&pending, 0);
        connection.close();

        let transport = NullTransport::default();
        let closed = transport.closed.clone();
        events.on_transport_connected(Some(transport));

        assert_eq!(connection.state(), CableState::Disconnected);
        assert!(connection.transport().is_none());
        assert!(closed.load(Ordering::SeqCst));
        assert!(states.try_recv().is_err());
        // The retired sink is gone once the last in-flight handle drops
        drop(events);
        assert!(pending.lock().unwrap()[0].upgrade().is_none());
    }

    #[test]
    fn stale_disconnect_is_ignored() {
        let (callback, states) = recording_callback();
        let (connection, pending) = parked(callback);
        let endpoint = Endpoint::new("bridge", 4567);

        connection.start(&endpoint);
        let first = attempt(&pending, 0);
        let old = NullTransport::default();
        let old_closed = old.closed.clone();
        first.on_transport_connected(Some(old));
        assert_eq!(states.try_recv().unwrap(), CableState::Connected);

        connection.start(&endpoint);
        assert!(old_closed.load(Ordering::SeqCst));
        assert_eq!(states.try_recv().unwrap(), CableState::Disconnected);
        attempt(&pending, 1).on_transport_connected(Some(NullTransport::default()));
        assert_eq!(states.try_recv().unwrap(), CableState::Connected);

        // The monitor of the replaced transport reports late
        first.on_transport_disconnected();
        assert_eq!(connection.state(), CableState::Connected);
        assert!(connection.transport().is_some());
        assert!(states.try_recv().is_err());
    }

    #[test]
    fn reopen_replaces_live_link() {
        let (callback, states) = recording_callback();
        let (connection, _) = parked(callback);
        let endpoint = Endpoint::new("bridge", 4567);

        connection.open(&endpoint, Duration::from_millis(10)).unwrap();
        connection.open(&endpoint, Duration::from_millis(10)).unwrap();
        assert_eq!(
            states.try_iter().collect::<Vec<_>>(),
            vec![
                CableState::Connected,
                CableState::Disconnected,
                CableState::Connected
            ]
        );
    }
}
