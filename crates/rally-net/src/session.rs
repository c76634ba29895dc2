//! The connection state machine.
//!
//! A [`ConnectionSession`] owns one endpoint and at most one peer connection:
//!
//! ```text
//! Idle ──host()/join()──▶ Connecting ──Opened──▶ Connected
//!   │                         │                      │
//!   └─────────────────────────┴──── Disconnected ◀───┘
//! ```
//!
//! `Disconnected` is terminal. Provider events are applied by background
//! tasks, each tagged with the generation of the attempt that spawned it.
//! Every teardown bumps the generation, so events from an abandoned attempt
//! are dropped instead of resurrecting the session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use crate::address::AddressScheme;
use crate::error::SessionError;
use crate::message::Message;
use crate::room_code::RoomCode;
use crate::transport::{
    ConnectOptions, ConnectionEvent, ConnectionHandle, EndpointControl, Incoming, LinkEvents,
    LinkSender, Transport, TransportError,
};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing attempted yet.
    Idle,
    /// Endpoint opening or waiting for the peer.
    Connecting,
    /// Peer connection open.
    Connected,
    /// Torn down. Terminal.
    Disconnected,
}

/// Which side of the rendezvous this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Unset,
    Host,
    Join,
}

/// Runtime settings for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Address prefixes for both roles.
    pub scheme: AddressScheme,
    /// Ask the provider for reliable delivery.
    pub reliable: bool,
    /// How long `join` waits for the host. `None` waits forever.
    pub join_timeout: Option<Duration>,
    /// How long a host waits for a joiner. `None` waits forever.
    pub host_timeout: Option<Duration>,
    /// Maximum undrained inbound messages. 0 means unbounded.
    pub max_inbound: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scheme: AddressScheme::default(),
            reliable: true,
            join_timeout: Some(Duration::from_secs(10)),
            host_timeout: None,
            max_inbound: 1024,
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl From<&rally_config::NetworkConfig> for SessionConfig {
    fn from(config: &rally_config::NetworkConfig) -> Self {
        Self {
            scheme: AddressScheme {
                host_prefix: config.host_prefix.clone(),
                join_prefix: config.join_prefix.clone(),
            },
            reliable: config.reliable,
            join_timeout: millis(config.join_timeout_ms),
            host_timeout: millis(config.host_timeout_ms),
            max_inbound: config.max_inbound,
        }
    }
}

/// Observable session state backed by a [`watch`] channel.
struct StateWatch {
    tx: watch::Sender<SessionState>,
    rx: watch::Receiver<SessionState>,
}

impl StateWatch {
    fn new() -> Self {
        let (tx, rx) = watch::channel(SessionState::Idle);
        Self { tx, rx }
    }

    fn set(&self, state: SessionState) {
        let _ = self.tx.send(state);
    }

    fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.rx.clone()
    }
}

/// Result of applying a provider event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventOutcome {
    Applied,
    /// The event belongs to an attempt that has since been torn down.
    Stale,
}

/// What the listener did with an inbound handle.
enum BindOutcome {
    Bound(LinkEvents),
    Refused,
    Stale,
}

struct Inner {
    state: SessionState,
    role: Role,
    room_code: Option<RoomCode>,
    generation: u64,
    endpoint: Option<EndpointControl>,
    link: Option<LinkSender>,
    inbound: VecDeque<Message>,
    dropped: u64,
    last_error: Option<SessionError>,
}

struct Shared {
    inner: Mutex<Inner>,
    watch: StateWatch,
    max_inbound: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        self.watch.set(state);
    }

    /// Move from Idle to Connecting for `role`. Returns the attempt's generation.
    fn begin(&self, role: Role, code: &RoomCode) -> Result<u64, SessionError> {
        let mut inner = self.lock();
        if inner.state != SessionState::Idle {
            return Err(SessionError::InvalidState(inner.state));
        }
        inner.generation += 1;
        inner.role = role;
        inner.room_code = Some(code.clone());
        inner.last_error = None;
        self.set_state(&mut inner, SessionState::Connecting);
        Ok(inner.generation)
    }

    /// Store the endpoint (and for joiners, the dialed link) of a live attempt.
    /// Returns `false` if the attempt was abandoned meanwhile.
    fn attach(&self, generation: u64, endpoint: EndpointControl, link: Option<LinkSender>) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.endpoint = Some(endpoint);
        inner.link = link;
        true
    }

    /// Bind the first inbound connection of a hosting attempt.
    fn bind(&self, generation: u64, handle: ConnectionHandle) -> BindOutcome {
        let mut inner = self.lock();
        if inner.generation != generation {
            return BindOutcome::Stale;
        }
        if inner.link.is_some() || inner.state != SessionState::Connecting {
            return BindOutcome::Refused;
        }
        handle.accept();
        let (sender, events) = handle.split();
        inner.link = Some(sender);
        BindOutcome::Bound(events)
    }

    /// Release everything held by the current attempt.
    fn teardown(&self, inner: &mut Inner, error: Option<SessionError>) {
        inner.generation += 1;
        if let Some(link) = inner.link.take() {
            link.close();
        }
        if let Some(endpoint) = inner.endpoint.take() {
            endpoint.close();
        }
        inner.last_error = error;
        self.set_state(inner, SessionState::Disconnected);
    }

    /// Tear down a failed attempt, if it is still current, and hand back the error.
    fn fail(&self, generation: u64, error: SessionError) -> SessionError {
        let mut inner = self.lock();
        if inner.generation == generation {
            tracing::warn!("Session attempt failed: {error}");
            self.teardown(&mut inner, Some(error.clone()));
        }
        error
    }

    fn on_event(&self, generation: u64, event: ConnectionEvent) -> EventOutcome {
        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::trace!(
                "Discarding stale event {event:?} (generation {generation}, current {})",
                inner.generation
            );
            return EventOutcome::Stale;
        }

        match event {
            ConnectionEvent::Opened => {
                if inner.state == SessionState::Connecting {
                    tracing::info!(
                        "Session connected as {:?} in room {}",
                        inner.role,
                        inner.room_code.as_ref().map(RoomCode::as_str).unwrap_or("-")
                    );
                    self.set_state(&mut inner, SessionState::Connected);
                }
            }
            ConnectionEvent::Data(payload) => {
                if inner.state != SessionState::Connected {
                    tracing::debug!("Discarding {} bytes received before open", payload.len());
                    return EventOutcome::Applied;
                }
                if self.max_inbound > 0 && inner.inbound.len() >= self.max_inbound {
                    inner.inbound.pop_front();
                    inner.dropped += 1;
                    tracing::warn!(
                        "Inbound queue full ({}), dropped oldest message ({} total)",
                        self.max_inbound,
                        inner.dropped
                    );
                }
                inner.inbound.push_back(Message::from(payload));
            }
            ConnectionEvent::Closed => {
                let error = (inner.state == SessionState::Connecting)
                    .then_some(SessionError::PeerUnreachable(TransportError::EndpointClosed));
                tracing::info!("Peer closed the connection");
                self.teardown(&mut inner, error);
            }
            ConnectionEvent::Error(err) => {
                tracing::warn!("Connection failed: {err}");
                self.teardown(&mut inner, Some(SessionError::PeerUnreachable(err)));
            }
        }
        EventOutcome::Applied
    }

    /// Give up on an attempt that is still connecting.
    fn expire(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == SessionState::Connecting {
            tracing::warn!("Timed out waiting for peer");
            self.teardown(
                &mut inner,
                Some(SessionError::PeerUnreachable(TransportError::Timeout)),
            );
        }
    }
}

/// Apply one connection's events until the attempt goes stale.
async fn pump(shared: Arc<Shared>, generation: u64, mut events: LinkEvents) {
    while let Some(event) = events.recv().await {
        if shared.on_event(generation, event) == EventOutcome::Stale {
            return;
        }
    }
    // The provider dropped the link without a final event.
    shared.on_event(generation, ConnectionEvent::Closed);
}

/// Accept the first inbound connection and refuse the rest.
async fn listen(shared: Arc<Shared>, generation: u64, mut incoming: Incoming) {
    while let Some(handle) = incoming.next().await {
        let peer = handle.peer().clone();
        match shared.bind(generation, handle) {
            BindOutcome::Bound(events) => {
                tracing::info!("Accepted connection from {peer}");
                tokio::spawn(pump(Arc::clone(&shared), generation, events));
            }
            BindOutcome::Refused => {
                tracing::info!("Refusing extra connection from {peer}");
            }
            BindOutcome::Stale => return,
        }
    }
}

fn spawn_timeout(shared: &Arc<Shared>, generation: u64, timeout: Option<Duration>) {
    if let Some(timeout) = timeout {
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            shared.expire(generation);
        });
    }
}

/// One logical connection to one peer. Not reusable after teardown.
pub struct ConnectionSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    shared: Arc<Shared>,
}

impl<T: Transport> ConnectionSession<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                role: Role::Unset,
                room_code: None,
                generation: 0,
                endpoint: None,
                link: None,
                inbound: VecDeque::new(),
                dropped: 0,
                last_error: None,
            }),
            watch: StateWatch::new(),
            max_inbound: config.max_inbound,
        });
        Self {
            transport,
            config,
            shared,
        }
    }

    /// Host under a freshly generated room code.
    ///
    /// Returns once the endpoint is registered; the session stays
    /// `Connecting` until a joiner's connection opens.
    pub async fn host(&self) -> Result<RoomCode, SessionError> {
        self.host_with_code(RoomCode::generate()).await
    }

    /// Host under a caller-chosen room code.
    pub async fn host_with_code(&self, code: RoomCode) -> Result<RoomCode, SessionError> {
        let generation = self.shared.begin(Role::Host, &code)?;
        let address = self.config.scheme.host_address(&code);
        tracing::info!("Hosting room {code} at {address}");

        let endpoint = match self.transport.open_endpoint(&address).await {
            Ok(endpoint) => endpoint,
            Err(err) => {
                return Err(self
                    .shared
                    .fail(generation, SessionError::TransportUnavailable(err)));
            }
        };

        let (control, incoming) = endpoint.split();
        if !self.shared.attach(generation, control, None) {
            return Err(SessionError::Cancelled);
        }
        tokio::spawn(listen(Arc::clone(&self.shared), generation, incoming));
        spawn_timeout(&self.shared, generation, self.config.host_timeout);
        Ok(code)
    }

    /// Join the room `code` and wait until the connection opens or fails.
    pub async fn join(&self, code: &str) -> Result<(), SessionError> {
        let code = RoomCode::parse(code).map_err(|e| SessionError::InvalidRoomCode(e.0))?;
        let generation = self.shared.begin(Role::Join, &code)?;
        let mut state_rx = self.subscribe();

        let local = self.config.scheme.join_address(&code);
        let remote = self.config.scheme.host_address(&code);
        tracing::info!("Joining room {code} at {remote} as {local}");

        let endpoint = match self.transport.open_endpoint(&local).await {
            Ok(endpoint) => endpoint,
            Err(err) => {
                return Err(self
                    .shared
                    .fail(generation, SessionError::PeerUnreachable(err)));
            }
        };

        let options = ConnectOptions {
            reliable: self.config.reliable,
        };
        let handle = endpoint.connect_to(&remote, options);
        // A joiner never listens; the inbound stream is dropped here.
        let (control, _) = endpoint.split();
        let (sender, events) = handle.split();
        if !self.shared.attach(generation, control, Some(sender)) {
            return Err(SessionError::Cancelled);
        }
        tokio::spawn(pump(Arc::clone(&self.shared), generation, events));
        spawn_timeout(&self.shared, generation, self.config.join_timeout);

        let settled = state_rx
            .wait_for(|state| *state != SessionState::Connecting)
            .await
            .map(|state| *state);
        if matches!(settled, Ok(SessionState::Connected)) {
            return Ok(());
        }
        Err(self.last_error().unwrap_or(SessionError::Cancelled))
    }

    /// Send a payload to the peer.
    pub fn send(&self, message: Message) -> Result<(), SessionError> {
        let inner = self.shared.lock();
        if inner.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let link = inner.link.as_ref().ok_or(SessionError::NotConnected)?;
        link.send(message.into_bytes()).map_err(|err| match err {
            TransportError::PayloadTooLarge { size, max } => {
                SessionError::MessageTooLarge { size, max }
            }
            _ => SessionError::NotConnected,
        })
    }

    /// Take every message received since the last drain, oldest first.
    pub fn drain_inbound(&self) -> Vec<Message> {
        self.shared.lock().inbound.drain(..).collect()
    }

    /// Tear down the session from any state. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let mut inner = self.shared.lock();
        if inner.state != SessionState::Disconnected {
            tracing::info!("Disconnecting session (was {:?})", inner.state);
        }
        self.shared.teardown(&mut inner, None);
        inner.role = Role::Unset;
        inner.room_code = None;
        inner.inbound.clear();
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn role(&self) -> Role {
        self.shared.lock().role
    }

    pub fn is_host(&self) -> bool {
        self.role() == Role::Host
    }

    pub fn room_code(&self) -> Option<RoomCode> {
        self.shared.lock().room_code.clone()
    }

    /// Why the session ended, if it ended on an error.
    pub fn last_error(&self) -> Option<SessionError> {
        self.shared.lock().last_error.clone()
    }

    /// Number of messages evicted from a full inbound queue.
    pub fn dropped_messages(&self) -> u64 {
        self.shared.lock().dropped
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.watch.subscribe()
    }

    #[cfg(test)]
    fn generation(&self) -> u64 {
        self.shared.lock().generation
    }
}

impl<T: Transport> Drop for ConnectionSession<T> {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if inner.state != SessionState::Disconnected {
            self.shared.teardown(&mut inner, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::EndpointAddress;
    use crate::memory::MemoryTransport;

    fn session(net: &MemoryTransport) -> ConnectionSession<MemoryTransport> {
        ConnectionSession::new(net.clone(), SessionConfig::default())
    }

    fn code(s: &str) -> RoomCode {
        RoomCode::parse(s).unwrap()
    }

    async fn wait_for_state(session: &ConnectionSession<MemoryTransport>, want: SessionState) {
        let mut rx = session.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
            .await
            .expect("state change timed out")
            .unwrap();
    }

    #[tokio::test]
    async fn test_host_registers_and_waits() {
        let net = MemoryTransport::new();
        let host = session(&net);
        assert_eq!(host.state(), SessionState::Idle);

        let room = host.host_with_code(code("4821")).await.unwrap();
        assert_eq!(room.as_str(), "4821");
        assert_eq!(host.state(), SessionState::Connecting);
        assert!(host.is_host());
        assert_eq!(host.room_code(), Some(code("4821")));
        assert!(net.is_registered(&EndpointAddress::new("rally-host-4821")));
    }

    #[tokio::test]
    async fn test_generated_code_in_range() {
        let net = MemoryTransport::new();
        let host = session(&net);
        let room = host.host().await.unwrap();
        let n: u16 = room.as_str().parse().unwrap();
        assert!((1000..=9999).contains(&n));
    }

    #[tokio::test]
    async fn test_second_host_call_is_invalid() {
        let net = MemoryTransport::new();
        let host = session(&net);
        host.host().await.unwrap();
        assert!(matches!(
            host.host().await,
            Err(SessionError::InvalidState(SessionState::Connecting))
        ));
        assert!(matches!(
            host.join("1234").await,
            Err(SessionError::InvalidState(SessionState::Connecting))
        ));
    }

    #[tokio::test]
    async fn test_taken_address_is_transport_unavailable() {
        let net = MemoryTransport::new();
        let _squatter = net
            .open_endpoint(&EndpointAddress::new("rally-host-4821"))
            .await
            .unwrap();

        let host = session(&net);
        let result = host.host_with_code(code("4821")).await;
        assert!(matches!(
            result,
            Err(SessionError::TransportUnavailable(TransportError::AddressInUse(_)))
        ));
        assert_eq!(host.state(), SessionState::Disconnected);
        assert!(host.last_error().is_some());
    }

    #[tokio::test]
    async fn test_join_and_exchange() {
        let net = MemoryTransport::new();
        let host = session(&net);
        let joiner = session(&net);

        host.host_with_code(code("4821")).await.unwrap();
        joiner.join("4821").await.unwrap();
        assert_eq!(joiner.state(), SessionState::Connected);
        assert_eq!(joiner.role(), Role::Join);
        wait_for_state(&host, SessionState::Connected).await;

        joiner.send(Message::from("ping")).unwrap();
        joiner.send(Message::from("ping2")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let received = host.drain_inbound();
        assert_eq!(received, vec![Message::from("ping"), Message::from("ping2")]);
        assert!(host.drain_inbound().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_code_rejected_without_state_change() {
        let net = MemoryTransport::new();
        let joiner = session(&net);
        assert!(matches!(
            joiner.join("48a1").await,
            Err(SessionError::InvalidRoomCode(_))
        ));
        assert_eq!(joiner.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let net = MemoryTransport::new();
        let host = session(&net);
        assert!(matches!(
            host.send(Message::from("x")),
            Err(SessionError::NotConnected)
        ));
        host.host().await.unwrap();
        assert!(matches!(
            host.send(Message::from("x")),
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_join_times_out_when_host_never_accepts() {
        let net = MemoryTransport::new();
        // Registered but never polled for inbound connections.
        let _silent = net
            .open_endpoint(&EndpointAddress::new("rally-host-4821"))
            .await
            .unwrap();

        let joiner = ConnectionSession::new(
            net.clone(),
            SessionConfig {
                join_timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        );
        let result = joiner.join("4821").await;
        assert!(matches!(
            result,
            Err(SessionError::PeerUnreachable(TransportError::Timeout))
        ));
        assert_eq!(joiner.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_host_timeout_expires() {
        let net = MemoryTransport::new();
        let host = ConnectionSession::new(
            net.clone(),
            SessionConfig {
                host_timeout: Some(Duration::from_millis(30)),
                ..Default::default()
            },
        );
        host.host_with_code(code("4821")).await.unwrap();
        wait_for_state(&host, SessionState::Disconnected).await;
        assert!(matches!(
            host.last_error(),
            Some(SessionError::PeerUnreachable(TransportError::Timeout))
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!net.is_registered(&EndpointAddress::new("rally-host-4821")));
    }

    #[tokio::test]
    async fn test_stale_open_after_disconnect_is_ignored() {
        let net = MemoryTransport::new();
        let host = session(&net);
        host.host().await.unwrap();
        let attempt = host.generation();

        host.disconnect();
        assert_eq!(host.shared.on_event(attempt, ConnectionEvent::Opened), EventOutcome::Stale);
        assert_eq!(host.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_during_join_cancels_it() {
        let net = MemoryTransport::new();
        let mut host_side = net
            .open_endpoint(&EndpointAddress::new("rally-host-4821"))
            .await
            .unwrap();
        let joiner = session(&net);

        let (result, late) = tokio::join!(joiner.join("4821"), async {
            let offer = host_side.next_incoming().await.unwrap();
            joiner.disconnect();
            offer
        });
        assert!(matches!(result, Err(SessionError::Cancelled)));
        assert_eq!(joiner.state(), SessionState::Disconnected);

        late.accept();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(joiner.state(), SessionState::Disconnected);
        assert!(joiner.last_error().is_none());
        assert!(joiner.send(Message::from("x")).is_err());
    }

    #[tokio::test]
    async fn test_data_before_open_is_discarded() {
        let net = MemoryTransport::new();
        let host = session(&net);
        host.host().await.unwrap();
        let attempt = host.generation();

        host.shared.on_event(attempt, ConnectionEvent::Data(b"early".to_vec()));
        host.shared.on_event(attempt, ConnectionEvent::Opened);
        host.shared.on_event(attempt, ConnectionEvent::Data(b"late".to_vec()));
        assert_eq!(host.drain_inbound(), vec![Message::from("late")]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let net = MemoryTransport::new();
        let host = ConnectionSession::new(
            net.clone(),
            SessionConfig {
                max_inbound: 2,
                ..Default::default()
            },
        );
        host.host().await.unwrap();
        let attempt = host.generation();
        host.shared.on_event(attempt, ConnectionEvent::Opened);
        for payload in ["a", "b", "c"] {
            host.shared.on_event(attempt, ConnectionEvent::Data(payload.as_bytes().to_vec()));
        }

        assert_eq!(host.drain_inbound(), vec![Message::from("b"), Message::from("c")]);
        assert_eq!(host.dropped_messages(), 1);
    }

    #[tokio::test]
    async fn test_peer_close_disconnects() {
        let net = MemoryTransport::new();
        let host = session(&net);
        let joiner = session(&net);
        host.host_with_code(code("1111")).await.unwrap();
        joiner.join("1111").await.unwrap();
        wait_for_state(&host, SessionState::Connected).await;

        joiner.disconnect();
        wait_for_state(&host, SessionState::Disconnected).await;
        assert!(host.last_error().is_none());
        assert!(matches!(
            host.send(Message::from("x")),
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_terminal() {
        let net = MemoryTransport::new();
        let host = session(&net);
        host.host_with_code(code("2222")).await.unwrap();

        host.disconnect();
        host.disconnect();
        assert_eq!(host.state(), SessionState::Disconnected);
        assert_eq!(host.role(), Role::Unset);
        assert_eq!(host.room_code(), None);
        assert!(host.drain_inbound().is_empty());
        assert!(matches!(
            host.host().await,
            Err(SessionError::InvalidState(SessionState::Disconnected))
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(net.endpoint_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_from_idle() {
        let net = MemoryTransport::new();
        let session = session(&net);
        session.disconnect();
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_config_from_network_settings() {
        let settings = rally_config::NetworkConfig {
            join_timeout_ms: 0,
            host_timeout_ms: 1500,
            reliable: false,
            ..Default::default()
        };
        let config = SessionConfig::from(&settings);
        assert_eq!(config.join_timeout, None);
        assert_eq!(config.host_timeout, Some(Duration::from_millis(1500)));
        assert!(!config.reliable);
        assert_eq!(config.scheme, AddressScheme::default());
        assert_eq!(config.max_inbound, 1024);
    }
}
