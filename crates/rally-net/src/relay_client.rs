//! Relay-backed transport provider.
//!
//! Each endpoint owns one TCP connection to a [`RelayServer`](crate::relay_server::RelayServer).
//! A reader task decodes relay frames, a writer task encodes client frames,
//! and a routing task sits between them and the endpoint's link handles.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};

use crate::address::EndpointAddress;
use crate::transport::{
    self, ConnectOptions, ConnectionEvent, Endpoint, EndpointCommand, EndpointDriver,
    LinkCommand, LinkId, Transport, TransportError,
};
use crate::wire::{
    ClientFrame, ConnectFailure, FrameConfig, RejectReason, RelayFrame, WireError, read_frame,
    write_frame,
};

impl From<WireError> for TransportError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(e) => e.into(),
            WireError::ConnectionClosed => TransportError::EndpointClosed,
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

/// Transport provider that reaches peers through a relay server.
#[derive(Debug, Clone)]
pub struct RelayTransport {
    relay_addr: String,
    frame: FrameConfig,
    register_timeout: Duration,
}

impl RelayTransport {
    /// Provider for the relay at `relay_addr` (`host:port`).
    pub fn new(relay_addr: impl Into<String>) -> Self {
        Self {
            relay_addr: relay_addr.into(),
            frame: FrameConfig::default(),
            register_timeout: Duration::from_secs(5),
        }
    }

    /// Provider configured from persisted settings.
    pub fn from_config(config: &rally_config::Config) -> Self {
        Self {
            relay_addr: config.network.relay_address.clone(),
            frame: FrameConfig {
                max_payload_size: config.relay.max_frame_bytes,
            },
            register_timeout: Duration::from_millis(config.relay.register_timeout_ms),
        }
    }

    /// Override how long registration may take.
    pub fn with_register_timeout(mut self, timeout: Duration) -> Self {
        self.register_timeout = timeout;
        self
    }

    pub fn relay_addr(&self) -> &str {
        &self.relay_addr
    }

    async fn register(&self, address: EndpointAddress) -> Result<Endpoint, TransportError> {
        let mut stream = TcpStream::connect(self.relay_addr.as_str()).await?;
        stream.set_nodelay(true)?;

        let request = ClientFrame::Register {
            address: address.clone(),
        };
        write_frame(&mut stream, &request, &self.frame).await?;

        let reply = tokio::time::timeout(
            self.register_timeout,
            read_frame::<RelayFrame, _>(&mut stream, &self.frame),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        match reply {
            RelayFrame::Registered { address: confirmed } if confirmed == address => {}
            RelayFrame::RegisterRejected {
                reason: RejectReason::AddressInUse,
                ..
            } => return Err(TransportError::AddressInUse(address)),
            other => {
                return Err(TransportError::Protocol(format!(
                    "unexpected registration reply: {other:?}"
                )));
            }
        }

        tracing::debug!("Registered {address} with relay {}", self.relay_addr);

        let max_payload = self.frame.max_data_payload();
        let (endpoint, driver) = transport::endpoint(address);
        let endpoint = endpoint.with_max_payload(max_payload);
        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (released_tx, released_rx) = oneshot::channel();

        tokio::spawn(read_loop(reader, ops_tx.clone(), self.frame.clone()));
        tokio::spawn(write_loop(writer, outbound_rx, released_rx, self.frame.clone()));
        tokio::spawn(
            Router {
                driver,
                links: HashMap::new(),
                max_payload,
                outbound: outbound_tx,
                ops: ops_tx,
                _released: released_tx,
            }
            .run(ops_rx),
        );

        Ok(endpoint)
    }
}

impl Transport for RelayTransport {
    fn open_endpoint(
        &self,
        address: &EndpointAddress,
    ) -> impl Future<Output = Result<Endpoint, TransportError>> + Send {
        let transport = self.clone();
        let address = address.clone();
        async move { transport.register(address).await }
    }
}

/// Inputs to the routing task besides endpoint commands.
enum Op {
    Relay(RelayFrame),
    RelayLost(TransportError),
    Forget(u64),
}

struct LinkRoute {
    peer: EndpointAddress,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl LinkRoute {
    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

struct Router {
    driver: EndpointDriver,
    links: HashMap<u64, LinkRoute>,
    max_payload: usize,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    ops: mpsc::UnboundedSender<Op>,
    /// Dropped when routing stops, which ends the writer and the relay connection.
    _released: oneshot::Sender<()>,
}

impl Router {
    async fn run(mut self, mut ops: mpsc::UnboundedReceiver<Op>) {
        loop {
            tokio::select! {
                command = self.driver.commands.recv() => match command {
                    Some(EndpointCommand::Connect(link)) => {
                        let id = link.id.0;
                        let _ = self.outbound.send(ClientFrame::Connect {
                            link: id,
                            remote: link.peer.clone(),
                            reliable: link.options.reliable,
                        });
                        self.links.insert(id, LinkRoute { peer: link.peer, events: link.events });
                        tokio::spawn(forward_link(id, link.commands, self.outbound.clone(), self.ops.clone()));
                    }
                    Some(EndpointCommand::Close) | None => break,
                },
                op = ops.recv() => match op {
                    Some(Op::Relay(frame)) => self.apply(frame),
                    Some(Op::Forget(link)) => {
                        self.links.remove(&link);
                    }
                    Some(Op::RelayLost(err)) => {
                        tracing::warn!("Lost relay connection for {}: {err}", self.driver.address);
                        for route in self.links.values() {
                            route.emit(ConnectionEvent::Error(err.clone()));
                        }
                        break;
                    }
                    None => break,
                },
            }
        }
        tracing::debug!("Endpoint {} released", self.driver.address);
    }

    fn apply(&mut self, frame: RelayFrame) {
        match frame {
            RelayFrame::Incoming {
                link,
                from,
                reliable,
            } => {
                let (handle, driver) =
                    transport::link(LinkId(link), from.clone(), ConnectOptions { reliable }, true);
                let handle = handle.with_max_payload(self.max_payload);
                self.links.insert(
                    link,
                    LinkRoute {
                        peer: from,
                        events: driver.events,
                    },
                );
                tokio::spawn(forward_link(
                    link,
                    driver.commands,
                    self.outbound.clone(),
                    self.ops.clone(),
                ));
                // A closed inbound stream drops the handle, which rejects the offer.
                let _ = self.driver.incoming.send(handle);
            }
            RelayFrame::Opened { link } => {
                if let Some(route) = self.links.get(&link) {
                    route.emit(ConnectionEvent::Opened);
                }
            }
            RelayFrame::Data { link, payload } => {
                if let Some(route) = self.links.get(&link) {
                    route.emit(ConnectionEvent::Data(payload));
                }
            }
            RelayFrame::Closed { link } => {
                if let Some(route) = self.links.remove(&link) {
                    route.emit(ConnectionEvent::Closed);
                }
            }
            RelayFrame::ConnectFailed { link, reason } => {
                if let Some(route) = self.links.remove(&link) {
                    let err = match reason {
                        ConnectFailure::NotFound => TransportError::PeerNotFound(route.peer.clone()),
                        ConnectFailure::Rejected => TransportError::Rejected,
                        ConnectFailure::NotRegistered => {
                            TransportError::Protocol("endpoint not registered".to_string())
                        }
                    };
                    route.emit(ConnectionEvent::Error(err));
                }
            }
            other => {
                tracing::warn!("Ignoring unexpected relay frame: {other:?}");
            }
        }
    }
}

/// Turn one link's commands into client frames. Ends with a `Close`.
async fn forward_link(
    link: u64,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    ops: mpsc::UnboundedSender<Op>,
) {
    while let Some(command) = commands.recv().await {
        let frame = match command {
            LinkCommand::Send(payload) => ClientFrame::Data { link, payload },
            LinkCommand::Accept => ClientFrame::Accept { link },
            LinkCommand::Close => break,
        };
        if outbound.send(frame).is_err() {
            return;
        }
    }
    let _ = outbound.send(ClientFrame::Close { link });
    let _ = ops.send(Op::Forget(link));
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    ops: mpsc::UnboundedSender<Op>,
    frame: FrameConfig,
) {
    loop {
        match read_frame::<RelayFrame, _>(&mut reader, &frame).await {
            Ok(relay_frame) => {
                if ops.send(Op::Relay(relay_frame)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = ops.send(Op::RelayLost(e.into()));
                break;
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<ClientFrame>,
    mut released: oneshot::Receiver<()>,
    frame: FrameConfig,
) {
    loop {
        tokio::select! {
            next = frames.recv() => {
                let Some(client_frame) = next else { break };
                match write_frame(&mut writer, &client_frame, &frame).await {
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
            _ = &mut released => break,
        }
    }
}
