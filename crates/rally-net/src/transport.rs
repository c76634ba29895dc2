//! Uniform transport capability.
//!
//! A provider (in-process, relay, ...) implements [`Transport`]. Everything
//! above this module sees only [`Endpoint`]s and [`ConnectionHandle`]s, which
//! are thin channel pairs: commands flow down to the provider task, events
//! flow back up.
//!
//! ```text
//!   session ── LinkCommand::{Send, Accept, Close} ──▶ provider
//!   session ◀── ConnectionEvent::{Opened, Data, Closed, Error} ── provider
//! ```
//!
//! An inbound handle must be accepted before either side sees `Opened`.
//! Dropping an inbound handle without accepting rejects the attempt.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::address::EndpointAddress;

/// Set on the ids of links dialed from this side.
pub const DIALED_LINK_BIT: u64 = 1 << 63;

/// Opaque payload bytes.
pub type Payload = Vec<u8>;

/// Identifier of one connection on one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u64);

impl LinkId {
    /// Whether this link was dialed locally rather than offered by the provider.
    pub fn is_dialed(self) -> bool {
        self.0 & DIALED_LINK_BIT != 0
    }
}

/// Errors reported by a transport provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Another endpoint already holds the address.
    #[error("address {0} is already registered")]
    AddressInUse(EndpointAddress),

    /// Nothing is registered at the remote address.
    #[error("no endpoint registered at {0}")]
    PeerNotFound(EndpointAddress),

    /// The remote endpoint turned the connection down.
    #[error("connection rejected by remote endpoint")]
    Rejected,

    /// The provider did not answer in time.
    #[error("transport operation timed out")]
    Timeout,

    /// The endpoint or its provider has gone away.
    #[error("endpoint closed")]
    EndpointClosed,

    /// The payload is larger than the provider can carry in one message.
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// The provider sent something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Events observable on a single connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Both sides may now exchange data.
    Opened,
    /// A payload from the peer.
    Data(Payload),
    /// The connection ended normally.
    Closed,
    /// The connection failed.
    Error(TransportError),
}

/// Per-connection options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectOptions {
    /// Ask the provider for reliable, ordered delivery.
    pub reliable: bool,
}

/// Commands a connection handle sends to its provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Send(Payload),
    Accept,
    Close,
}

// ---------------------------------------------------------------------------
// Caller side
// ---------------------------------------------------------------------------

/// One connection, inbound or outbound.
pub struct ConnectionHandle {
    id: LinkId,
    peer: EndpointAddress,
    options: ConnectOptions,
    inbound: bool,
    sender: LinkSender,
    events: LinkEvents,
}

impl ConnectionHandle {
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Address of the other side.
    pub fn peer(&self) -> &EndpointAddress {
        &self.peer
    }

    pub fn options(&self) -> ConnectOptions {
        self.options
    }

    /// Whether the provider offered this connection to a listening endpoint.
    pub fn is_inbound(&self) -> bool {
        self.inbound
    }

    /// Complete the handshake of an inbound connection. No-op for outbound.
    pub fn accept(&self) {
        if self.inbound {
            self.sender.accept();
        }
    }

    /// Refuse payloads over `max` bytes at [`send`](Self::send) time.
    pub fn with_max_payload(mut self, max: usize) -> Self {
        self.sender.max_payload = Some(max);
        self
    }

    /// Queue a payload for the peer.
    pub fn send(&self, payload: Payload) -> Result<(), TransportError> {
        self.sender.send(payload)
    }

    /// Wait for the next event. `None` once the provider dropped the link.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Split into the sending half and the event stream.
    pub fn split(self) -> (LinkSender, LinkEvents) {
        (self.sender, self.events)
    }
}

/// Sending half of a connection handle.
pub struct LinkSender {
    commands: mpsc::UnboundedSender<LinkCommand>,
    max_payload: Option<usize>,
}

impl LinkSender {
    /// Queue a payload. Oversized payloads are refused here rather than
    /// failing later inside the provider.
    pub fn send(&self, payload: Payload) -> Result<(), TransportError> {
        if let Some(max) = self.max_payload
            && payload.len() > max
        {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }
        self.commands
            .send(LinkCommand::Send(payload))
            .map_err(|_| TransportError::EndpointClosed)
    }

    fn accept(&self) {
        let _ = self.commands.send(LinkCommand::Accept);
    }

    /// Close the connection. Dropping the sender has the same effect.
    pub fn close(self) {
        let _ = self.commands.send(LinkCommand::Close);
    }
}

/// Event stream of a connection handle.
pub struct LinkEvents {
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl LinkEvents {
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }
}

/// A registered endpoint: dials out and yields inbound connections.
pub struct Endpoint {
    control: EndpointControl,
    incoming: Incoming,
}

impl Endpoint {
    pub fn address(&self) -> &EndpointAddress {
        &self.control.address
    }

    /// Start connecting to `remote`. Completion arrives as an event on the handle.
    pub fn connect_to(&self, remote: &EndpointAddress, options: ConnectOptions) -> ConnectionHandle {
        self.control.connect_to(remote, options)
    }

    /// Wait for the next inbound connection attempt.
    pub async fn next_incoming(&mut self) -> Option<ConnectionHandle> {
        self.incoming.next().await
    }

    /// Limit the payload size of every connection dialed from this endpoint.
    pub fn with_max_payload(mut self, max: usize) -> Self {
        self.control.max_payload = Some(max);
        self
    }

    /// Split into the control half and the inbound stream, so the stream
    /// can be moved into a listening task.
    pub fn split(self) -> (EndpointControl, Incoming) {
        (self.control, self.incoming)
    }

    /// Release the registration.
    pub fn close(self) {
        self.control.close();
    }
}

/// Control half of an endpoint.
pub struct EndpointControl {
    address: EndpointAddress,
    commands: mpsc::UnboundedSender<EndpointCommand>,
    next_link: AtomicU64,
    max_payload: Option<usize>,
}

impl EndpointControl {
    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    pub fn connect_to(&self, remote: &EndpointAddress, options: ConnectOptions) -> ConnectionHandle {
        let id = LinkId(self.next_link.fetch_add(1, Ordering::Relaxed) | DIALED_LINK_BIT);
        let (mut handle, driver) = link(id, remote.clone(), options, false);
        if let Some(max) = self.max_payload {
            handle = handle.with_max_payload(max);
        }
        if let Err(mpsc::error::SendError(EndpointCommand::Connect(driver))) =
            self.commands.send(EndpointCommand::Connect(driver))
        {
            driver.emit(ConnectionEvent::Error(TransportError::EndpointClosed));
        }
        handle
    }

    /// Release the registration. Dropping the control has the same effect.
    pub fn close(self) {
        let _ = self.commands.send(EndpointCommand::Close);
    }
}

/// Lazy stream of inbound connection attempts. Not restartable.
pub struct Incoming {
    handles: mpsc::UnboundedReceiver<ConnectionHandle>,
}

impl Incoming {
    pub async fn next(&mut self) -> Option<ConnectionHandle> {
        self.handles.recv().await
    }
}

// ---------------------------------------------------------------------------
// Provider side
// ---------------------------------------------------------------------------

/// A transport provider.
pub trait Transport: Send + Sync + 'static {
    /// Register `address` and return the endpoint once the provider confirms it.
    fn open_endpoint(
        &self,
        address: &EndpointAddress,
    ) -> impl Future<Output = Result<Endpoint, TransportError>> + Send;
}

/// Requests from an endpoint to its provider.
pub enum EndpointCommand {
    /// Dial the link's peer address.
    Connect(LinkDriver),
    /// Release the registration.
    Close,
}

/// Provider half of an endpoint.
pub struct EndpointDriver {
    pub address: EndpointAddress,
    pub commands: mpsc::UnboundedReceiver<EndpointCommand>,
    pub incoming: mpsc::UnboundedSender<ConnectionHandle>,
}

/// Provider half of a connection.
pub struct LinkDriver {
    pub id: LinkId,
    pub peer: EndpointAddress,
    pub options: ConnectOptions,
    pub commands: mpsc::UnboundedReceiver<LinkCommand>,
    pub events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl LinkDriver {
    /// Deliver an event to the caller side. Ignored once the handle is gone.
    pub fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

/// Create a connected endpoint/driver pair for `address`.
pub fn endpoint(address: EndpointAddress) -> (Endpoint, EndpointDriver) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    let endpoint = Endpoint {
        control: EndpointControl {
            address: address.clone(),
            commands: command_tx,
            next_link: AtomicU64::new(1),
            max_payload: None,
        },
        incoming: Incoming {
            handles: incoming_rx,
        },
    };
    let driver = EndpointDriver {
        address,
        commands: command_rx,
        incoming: incoming_tx,
    };
    (endpoint, driver)
}

/// Create a connected handle/driver pair.
pub fn link(
    id: LinkId,
    peer: EndpointAddress,
    options: ConnectOptions,
    inbound: bool,
) -> (ConnectionHandle, LinkDriver) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle {
        id,
        peer: peer.clone(),
        options,
        inbound,
        sender: LinkSender {
            commands: command_tx,
            max_payload: None,
        },
        events: LinkEvents { events: event_rx },
    };
    let driver = LinkDriver {
        id,
        peer,
        options,
        commands: command_rx,
        events: event_tx,
    };
    (handle, driver)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> EndpointAddress {
        EndpointAddress::new(s)
    }

    #[tokio::test]
    async fn test_dialed_links_are_tagged() {
        let (endpoint, mut driver) = endpoint(addr("a"));
        let first = endpoint.connect_to(&addr("b"), ConnectOptions::default());
        let second = endpoint.connect_to(&addr("b"), ConnectOptions::default());
        assert!(first.id().is_dialed());
        assert_ne!(first.id(), second.id());
        assert!(!LinkId(5).is_dialed());

        match driver.commands.recv().await {
            Some(EndpointCommand::Connect(link)) => assert_eq!(link.peer, addr("b")),
            _ => panic!("expected connect request"),
        }
    }

    #[tokio::test]
    async fn test_connect_after_provider_gone_reports_error() {
        let (endpoint, driver) = endpoint(addr("a"));
        drop(driver);

        let mut handle = endpoint.connect_to(&addr("b"), ConnectOptions::default());
        assert!(matches!(
            handle.next_event().await,
            Some(ConnectionEvent::Error(TransportError::EndpointClosed))
        ));
        assert!(handle.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_payload_refused_before_queueing() {
        let (endpoint, mut driver) = endpoint(addr("a"));
        let endpoint = endpoint.with_max_payload(4);
        let handle = endpoint.connect_to(&addr("b"), ConnectOptions::default());
        let Some(EndpointCommand::Connect(mut link)) = driver.commands.recv().await else {
            panic!("expected connect request");
        };

        assert!(matches!(
            handle.send(vec![0; 5]),
            Err(TransportError::PayloadTooLarge { size: 5, max: 4 })
        ));
        handle.send(vec![1; 4]).unwrap();
        assert_eq!(link.commands.recv().await, Some(LinkCommand::Send(vec![1; 4])));
        assert!(link.commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_accept_only_sent_for_inbound() {
        let (outbound, mut out_driver) = link(LinkId(1), addr("b"), ConnectOptions::default(), false);
        outbound.accept();
        drop(outbound);
        assert_eq!(out_driver.commands.recv().await, None);

        let (inbound, mut in_driver) = link(LinkId(2), addr("a"), ConnectOptions::default(), true);
        inbound.accept();
        assert_eq!(in_driver.commands.recv().await, Some(LinkCommand::Accept));
    }

    #[tokio::test]
    async fn test_send_and_close_reach_driver() {
        let (handle, mut driver) = link(LinkId(1), addr("b"), ConnectOptions { reliable: true }, false);
        assert!(handle.options().reliable);
        handle.send(b"hi".to_vec()).unwrap();
        let (sender, _events) = handle.split();
        sender.close();

        assert_eq!(driver.commands.recv().await, Some(LinkCommand::Send(b"hi".to_vec())));
        assert_eq!(driver.commands.recv().await, Some(LinkCommand::Close));
    }

    #[tokio::test]
    async fn test_send_after_driver_dropped_fails() {
        let (handle, driver) = link(LinkId(1), addr("b"), ConnectOptions::default(), false);
        drop(driver);
        assert!(matches!(
            handle.send(vec![1]),
            Err(TransportError::EndpointClosed)
        ));
    }
}
