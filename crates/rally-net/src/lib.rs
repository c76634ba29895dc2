//! Two-player session layer: room codes, a pluggable transport, the
//! connection state machine, and a relay server to route through.
//!
//! Games talk to [`SessionFacade`]. Providers implement [`Transport`];
//! [`MemoryTransport`] runs in-process and [`RelayTransport`] goes through a
//! [`RelayServer`].

pub mod address;
pub mod error;
pub mod facade;
pub mod memory;
pub mod message;
pub mod relay_client;
pub mod relay_server;
pub mod room_code;
pub mod session;
pub mod transport;
pub mod wire;

pub use address::{AddressScheme, EndpointAddress};
pub use error::SessionError;
pub use facade::{ConnectionState, SessionFacade};
pub use memory::MemoryTransport;
pub use message::Message;
pub use relay_client::RelayTransport;
pub use relay_server::{ClientId, RelayServer, ServerConfig};
pub use room_code::{InvalidRoomCode, RoomCode};
pub use session::{ConnectionSession, Role, SessionConfig, SessionState};
pub use transport::{
    ConnectOptions, ConnectionEvent, ConnectionHandle, Endpoint, LinkId, Transport, TransportError,
};
pub use wire::{FrameConfig, WireError};
