//! A loopback debug bridge for end-to-end tests of the JTAG proxy.
//!
//! The bridge answers every capturing scan with the bits that were driven on TDI and
//! records every request it receives.
use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use futures::StreamExt;
use jtag_proxy_protocol::{ControlLine, Request, framed::RequestCodec};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::watch,
};
use tokio_util::codec::FramedRead;

type Requests = Arc<Mutex<Vec<Request>>>;

pub struct LoopbackBridge {
    addr: SocketAddr,
    requests: Requests,
    /// Number of client connections accepted so far
    clients: Arc<AtomicUsize>,
    /// Bumped to drop all open connections; dropping it stops the bridge
    kick: watch::Sender<u32>,
}

impl LoopbackBridge {
    /// Starts a bridge on an ephemeral localhost port.
    pub fn spawn() -> io::Result<LoopbackBridge> {
        LoopbackBridge::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    pub fn bind(addr: SocketAddr) -> io::Result<LoopbackBridge> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        let listener = runtime.block_on(TcpListener::bind(addr))?;
        let addr = listener.local_addr()?;
        let requests = Requests::default();
        let clients = Arc::new(AtomicUsize::new(0));
        let (kick, kicked) = watch::channel(0);

        let served = requests.clone();
        let accepted = clients.clone();
        thread::Builder::new()
            .name("loopback-bridge".to_string())
            .spawn(move || runtime.block_on(serve(listener, served, accepted, kicked)))?;

        Ok(LoopbackBridge {
            addr,
            requests,
            clients,
            kick,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Request>> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.lock().clone()
    }

    /// Waits until at least `count` requests arrived and returns all of them.
    pub fn wait_for_requests(&self, count: usize, timeout: Duration) -> Vec<Request> {
        let deadline = Instant::now() + timeout;
        loop {
            let requests = self.requests();
            if requests.len() >= count || Instant::now() >= deadline {
                return requests;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Waits until at least `count` clients were accepted and returns how many were.
    ///
    /// A client connect can complete in the kernel before the bridge accepts it. Wait for
    /// the accept before [`LoopbackBridge::drop_connections`], which only reaches
    /// connections the bridge already serves.
    pub fn wait_for_clients(&self, count: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let clients = self.clients.load(Ordering::SeqCst);
            if clients >= count || Instant::now() >= deadline {
                return clients;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Closes every client connection accepted so far. The bridge keeps accepting new ones.
    pub fn drop_connections(&self) {
        self.kick.send_modify(|generation| *generation += 1);
    }
}

async fn serve(
    listener: TcpListener,
    requests: Requests,
    clients: Arc<AtomicUsize>,
    mut kicked: watch::Receiver<u32>,
) {
    log::info!("Loopback bridge listening on {:?}", listener.local_addr());
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    log::info!("New client connection from {}", peer);
                    let mut connection_kicked = kicked.clone();
                    connection_kicked.borrow_and_update();
                    tokio::spawn(handle_client(stream, requests.clone(), connection_kicked));
                    clients.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => log::error!("Connection error: {}", e),
            },
            changed = kicked.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

async fn handle_client(stream: TcpStream, requests: Requests, mut kicked: watch::Receiver<u32>) {
    let (read, mut write) = stream.into_split();
    let mut framed = FramedRead::new(read, RequestCodec);
    loop {
        tokio::select! {
            request = framed.next() => match request {
                Some(Ok(request)) => {
                    log::debug!("Bridge received {:?}", request.header());
                    let response = match &request {
                        Request::Scan { capture: true, control } => {
                            Some(control.line_bits(ControlLine::Tdi))
                        }
                        _ => None,
                    };
                    requests
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .push(request);
                    if let Some(tdo) = response
                        && let Err(e) = write.write_all(&tdo).await
                    {
                        log::error!("Client error: {}", e);
                        break;
                    }
                }
                Some(Err(e)) => {
                    log::error!("Client error: {}", e);
                    break;
                }
                None => break,
            },
            _ = kicked.changed() => {
                log::info!("Dropping client connection");
                break;
            }
        }
    }
}
