//! In-process transport provider.
//!
//! Endpoints live in a shared registry keyed by address. Each connection is
//! serviced by one task that holds back data until the listening side
//! accepts, then forwards payloads in both directions.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::address::EndpointAddress;
use crate::transport::{
    self, ConnectionEvent, ConnectionHandle, Endpoint, EndpointCommand, EndpointDriver,
    LinkCommand, LinkDriver, LinkId, Transport, TransportError,
};

#[derive(Default)]
struct Registry {
    endpoints: HashMap<EndpointAddress, mpsc::UnboundedSender<ConnectionHandle>>,
    next_link: u64,
}

/// Cloneable handle to one in-process network. Clones share endpoints.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.registry().endpoints.len()
    }

    /// Whether `address` is currently registered.
    pub fn is_registered(&self, address: &EndpointAddress) -> bool {
        self.registry().endpoints.contains_key(address)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, driver: &EndpointDriver) -> Result<(), TransportError> {
        let mut registry = self.registry();
        if registry.endpoints.contains_key(&driver.address) {
            return Err(TransportError::AddressInUse(driver.address.clone()));
        }
        registry
            .endpoints
            .insert(driver.address.clone(), driver.incoming.clone());
        Ok(())
    }

    /// Serve one endpoint's commands until it is closed or dropped.
    async fn run_endpoint(self, mut driver: EndpointDriver) {
        while let Some(command) = driver.commands.recv().await {
            match command {
                EndpointCommand::Connect(dialer) => self.dial(&driver.address, dialer),
                EndpointCommand::Close => break,
            }
        }
        self.registry().endpoints.remove(&driver.address);
        tracing::debug!("Endpoint {} released", driver.address);
    }

    fn dial(&self, from: &EndpointAddress, dialer: LinkDriver) {
        let target = {
            let mut registry = self.registry();
            registry.next_link += 1;
            let id = LinkId(registry.next_link);
            registry
                .endpoints
                .get(&dialer.peer)
                .cloned()
                .map(|incoming| (id, incoming))
        };

        let Some((id, incoming)) = target else {
            tracing::debug!("{from} dialed unknown address {}", dialer.peer);
            dialer.emit(ConnectionEvent::Error(TransportError::PeerNotFound(
                dialer.peer.clone(),
            )));
            return;
        };

        let (handle, listener) = transport::link(id, from.clone(), dialer.options, true);
        if incoming.send(handle).is_err() {
            dialer.emit(ConnectionEvent::Error(TransportError::PeerNotFound(
                dialer.peer.clone(),
            )));
            return;
        }

        tokio::spawn(pipe(dialer, listener));
    }
}

impl Transport for MemoryTransport {
    fn open_endpoint(
        &self,
        address: &EndpointAddress,
    ) -> impl Future<Output = Result<Endpoint, TransportError>> + Send {
        let transport = self.clone();
        let address = address.clone();
        async move {
            let (endpoint, driver) = transport::endpoint(address);
            transport.register(&driver)?;
            tracing::debug!("Endpoint {} registered", driver.address);
            tokio::spawn(transport.run_endpoint(driver));
            Ok(endpoint)
        }
    }
}

/// Shuttle commands between the two halves of one connection.
async fn pipe(mut dialer: LinkDriver, mut listener: LinkDriver) {
    let mut opened = false;

    loop {
        tokio::select! {
            command = dialer.commands.recv() => match command {
                Some(LinkCommand::Send(payload)) => {
                    if opened {
                        listener.emit(ConnectionEvent::Data(payload));
                    }
                }
                Some(LinkCommand::Accept) => {}
                Some(LinkCommand::Close) | None => {
                    listener.emit(ConnectionEvent::Closed);
                    break;
                }
            },
            command = listener.commands.recv() => match command {
                Some(LinkCommand::Send(payload)) => {
                    if opened {
                        dialer.emit(ConnectionEvent::Data(payload));
                    }
                }
                Some(LinkCommand::Accept) => {
                    if !opened {
                        opened = true;
                        dialer.emit(ConnectionEvent::Opened);
                        listener.emit(ConnectionEvent::Opened);
                    }
                }
                Some(LinkCommand::Close) | None => {
                    if opened {
                        dialer.emit(ConnectionEvent::Closed);
                    } else {
                        dialer.emit(ConnectionEvent::Error(TransportError::Rejected));
                    }
                    break;
                }
            },
        }
    }
}
