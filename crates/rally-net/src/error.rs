//! Session-level error types.

use crate::session::SessionState;
use crate::transport::TransportError;

/// Errors returned by [`ConnectionSession`](crate::session::ConnectionSession)
/// and [`SessionFacade`](crate::facade::SessionFacade).
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// The local endpoint could not be registered.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(#[source] TransportError),

    /// The remote side could not be reached, refused us, or went away.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(#[source] TransportError),

    /// The session has no open connection.
    #[error("not connected")]
    NotConnected,

    /// The message is larger than the transport can carry. The connection stays open.
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    /// The operation is not allowed in the current state.
    #[error("invalid session state: {0:?}")]
    InvalidState(SessionState),

    /// The room code is not 1 to 8 digits.
    #[error("invalid room code: {0:?}")]
    InvalidRoomCode(String),

    /// A session is already connecting or connected.
    #[error("a session is already active")]
    AlreadyActive,

    /// The attempt was abandoned by a local disconnect.
    #[error("cancelled by disconnect")]
    Cancelled,
}
