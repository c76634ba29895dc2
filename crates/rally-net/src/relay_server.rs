//! TCP rendezvous relay.
//!
//! Clients register an endpoint address, dial other addresses, and exchange
//! payloads through the relay. Routing state lives in [`RelayState`], which
//! is driven synchronously by decoded [`ClientFrame`]s; the async server only
//! moves frames between sockets and that state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

use crate::address::EndpointAddress;
use crate::transport::DIALED_LINK_BIT;
use crate::wire::{
    ClientFrame, ConnectFailure, FrameConfig, RejectReason, RelayFrame, WireError, read_frame,
    write_frame,
};

/// Unique identifier for a client connection within a relay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// Atomic generator for monotonically increasing [`ClientId`]s.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ClientId {
        ClientId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Routing state
// ---------------------------------------------------------------------------

/// One side of a route: a client connection and its link id.
type LinkEnd = (ClientId, u64);

struct Route {
    dialer: LinkEnd,
    listener: LinkEnd,
    opened: bool,
}

impl Route {
    fn other(&self, end: LinkEnd) -> LinkEnd {
        if end == self.dialer { self.listener } else { self.dialer }
    }
}

struct ClientEntry {
    outbound: mpsc::UnboundedSender<RelayFrame>,
    address: Option<EndpointAddress>,
}

/// Registered addresses and the routes between them.
#[derive(Default)]
pub struct RelayState {
    clients: HashMap<ClientId, ClientEntry>,
    addresses: HashMap<EndpointAddress, ClientId>,
    ends: HashMap<LinkEnd, u64>,
    routes: HashMap<u64, Route>,
    next_route: u64,
    next_offer: u64,
}

impl RelayState {
    /// Track a new client connection. Frames for it are pushed to `outbound`.
    pub fn add_client(&mut self, id: ClientId, outbound: mpsc::UnboundedSender<RelayFrame>) {
        self.clients.insert(
            id,
            ClientEntry {
                outbound,
                address: None,
            },
        );
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_registered(&self, address: &EndpointAddress) -> bool {
        self.addresses.contains_key(address)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    fn send(&self, to: ClientId, frame: RelayFrame) {
        if let Some(client) = self.clients.get(&to) {
            let _ = client.outbound.send(frame);
        }
    }

    /// Apply one frame received from `client`.
    pub fn handle(&mut self, client: ClientId, frame: ClientFrame) {
        match frame {
            ClientFrame::Register { address } => self.register(client, address),
            ClientFrame::Connect {
                link,
                remote,
                reliable,
            } => self.connect(client, link, remote, reliable),
            ClientFrame::Accept { link } => self.accept((client, link)),
            ClientFrame::Data { link, payload } => self.forward((client, link), payload),
            ClientFrame::Close { link } => self.close_end((client, link)),
        }
    }

    fn register(&mut self, client: ClientId, address: EndpointAddress) {
        let reason = match self.clients.get(&client) {
            None => return,
            Some(entry) if entry.address.is_some() => Some(RejectReason::AlreadyRegistered),
            Some(_) if self.addresses.contains_key(&address) => Some(RejectReason::AddressInUse),
            Some(_) => None,
        };

        if let Some(reason) = reason {
            tracing::debug!("Client {client:?} refused {address}: {reason:?}");
            self.send(client, RelayFrame::RegisterRejected { address, reason });
            return;
        }

        self.addresses.insert(address.clone(), client);
        if let Some(entry) = self.clients.get_mut(&client) {
            entry.address = Some(address.clone());
        }
        tracing::info!("Client {client:?} registered {address}");
        self.send(client, RelayFrame::Registered { address });
    }

    fn connect(&mut self, client: ClientId, link: u64, remote: EndpointAddress, reliable: bool) {
        let Some(from) = self.clients.get(&client).and_then(|c| c.address.clone()) else {
            self.send(
                client,
                RelayFrame::ConnectFailed {
                    link,
                    reason: ConnectFailure::NotRegistered,
                },
            );
            return;
        };
        if self.ends.contains_key(&(client, link)) {
            tracing::warn!("Client {client:?} reused link {link}, closing its old route");
            self.close_end((client, link));
        }
        let Some(&listener) = self.addresses.get(&remote) else {
            tracing::debug!("{from} dialed unknown address {remote}");
            self.send(
                client,
                RelayFrame::ConnectFailed {
                    link,
                    reason: ConnectFailure::NotFound,
                },
            );
            return;
        };

        self.next_offer = (self.next_offer + 1) & !DIALED_LINK_BIT;
        let offer = self.next_offer;
        self.next_route += 1;
        let route_id = self.next_route;

        let route = Route {
            dialer: (client, link),
            listener: (listener, offer),
            opened: false,
        };
        self.ends.insert(route.dialer, route_id);
        self.ends.insert(route.listener, route_id);
        self.routes.insert(route_id, route);

        tracing::debug!("{from} dialing {remote} (route {route_id})");
        self.send(
            listener,
            RelayFrame::Incoming {
                link: offer,
                from,
                reliable,
            },
        );
    }

    fn accept(&mut self, end: LinkEnd) {
        let Some(route) = self.ends.get(&end).and_then(|id| self.routes.get_mut(id)) else {
            return;
        };
        if route.listener != end || route.opened {
            return;
        }
        route.opened = true;
        let (dialer, listener) = (route.dialer, route.listener);
        self.send(dialer.0, RelayFrame::Opened { link: dialer.1 });
        self.send(listener.0, RelayFrame::Opened { link: listener.1 });
    }

    fn forward(&mut self, end: LinkEnd, payload: Vec<u8>) {
        let Some(route) = self.ends.get(&end).and_then(|id| self.routes.get(id)) else {
            return;
        };
        if !route.opened {
            return;
        }
        let (peer, link) = route.other(end);
        self.send(peer, RelayFrame::Data { link, payload });
    }

    fn close_end(&mut self, end: LinkEnd) {
        let Some(route_id) = self.ends.remove(&end) else {
            return;
        };
        let Some(route) = self.routes.remove(&route_id) else {
            return;
        };
        let other = route.other(end);
        self.ends.remove(&other);

        let frame = if !route.opened && other == route.dialer {
            RelayFrame::ConnectFailed {
                link: other.1,
                reason: ConnectFailure::Rejected,
            }
        } else {
            RelayFrame::Closed { link: other.1 }
        };
        self.send(other.0, frame);
    }

    /// Drop a client: release its address and close every route it is part of.
    pub fn remove_client(&mut self, client: ClientId) {
        let owned: Vec<LinkEnd> = self
            .ends
            .keys()
            .filter(|(owner, _)| *owner == client)
            .copied()
            .collect();
        for end in owned {
            self.close_end(end);
        }

        if let Some(entry) = self.clients.remove(&client)
            && let Some(address) = entry.address
        {
            self.addresses.remove(&address);
            tracing::info!("Client {client:?} released {address}");
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Configuration for [`RelayServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to. Default: `0.0.0.0:7878`.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent client connections. Default: 256.
    pub max_connections: usize,
    /// Frame size limit applied to every client.
    pub frame: FrameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7878)),
            max_connections: 256,
            frame: FrameConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build from the persisted relay settings.
    pub fn from_config(
        config: &rally_config::RelayConfig,
    ) -> Result<Self, std::net::AddrParseError> {
        Ok(Self {
            bind_addr: config.bind_address.parse()?,
            max_connections: config.max_connections,
            frame: FrameConfig {
                max_payload_size: config.max_frame_bytes,
            },
        })
    }
}

/// Pause after a failed `accept` so a full descriptor table does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Relay server accepting client endpoints over TCP.
pub struct RelayServer {
    config: ServerConfig,
    state: Arc<Mutex<RelayState>>,
    id_gen: Arc<IdGenerator>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

fn lock(state: &Mutex<RelayState>) -> MutexGuard<'_, RelayState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            state: Arc::new(Mutex::new(RelayState::default())),
            id_gen: Arc::new(IdGenerator::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        lock(&self.state).client_count()
    }

    /// Whether some client currently holds `address`.
    pub fn is_registered(&self, address: &EndpointAddress) -> bool {
        lock(&self.state).is_registered(address)
    }

    /// Bind to the configured address and run the accept loop.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("Relay listening on {}", self.config.bind_addr);
        self.run_with_listener(listener).await
    }

    /// Run the accept loop with a pre-bound listener (useful for tests).
    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {e}");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::warn!("Dropping {peer_addr}: {e}");
                        continue;
                    }

                    let id = self.id_gen.next_id();
                    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
                    {
                        let mut state = lock(&self.state);
                        if state.client_count() >= self.config.max_connections {
                            tracing::warn!("Connection limit reached, rejecting {peer_addr}");
                            continue;
                        }
                        state.add_client(id, frame_tx);
                    }

                    tracing::info!("Accepted client {id:?} from {peer_addr}");

                    let (reader, writer) = stream.into_split();
                    let frame = self.config.frame.clone();
                    tokio::spawn(write_loop(writer, frame_rx, frame.clone()));

                    let state = Arc::clone(&self.state);
                    let mut task_shutdown = self.shutdown_rx.clone();
                    tokio::spawn(async move {
                        read_loop(id, reader, &state, &frame, &mut task_shutdown).await;
                        lock(&state).remove_client(id);
                        tracing::info!("Client {id:?} disconnected");
                    });
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Relay shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal the server and every client task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Decode client frames and apply them until the client leaves or shutdown.
async fn read_loop(
    id: ClientId,
    mut reader: OwnedReadHalf,
    state: &Mutex<RelayState>,
    frame: &FrameConfig,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = read_frame::<ClientFrame, _>(&mut reader, frame) => {
                match result {
                    Ok(client_frame) => {
                        lock(state).handle(id, client_frame);
                    }
                    Err(WireError::ConnectionClosed) => break,
                    Err(e) => {
                        tracing::warn!("Client {id:?} sent a bad frame: {e}");
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// Write queued relay frames until the client entry is dropped.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<RelayFrame>,
    frame: FrameConfig,
) {
    while let Some(relay_frame) = frames.recv().await {
        match write_frame(&mut writer, &relay_frame, &frame).await {
            Ok(()) => {}
            Err(e @ (WireError::PayloadTooLarge { .. } | WireError::Postcard(_))) => {
                tracing::warn!("Dropping frame that cannot be sent: {e}");
            }
            Err(e) => {
                tracing::debug!("Relay write failed: {e}");
                break;
            }
        }
    }
}
