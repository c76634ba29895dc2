//! The game-facing API.
//!
//! [`SessionFacade`] owns at most one live [`ConnectionSession`] and exposes
//! the handful of calls a game loop needs: host, join, send, drain, status.

use std::fmt;

use tokio::sync::watch;

use crate::error::SessionError;
use crate::message::Message;
use crate::room_code::RoomCode;
use crate::session::{ConnectionSession, SessionConfig, SessionState};
use crate::transport::Transport;

/// Coarse status reported to the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SessionState> for ConnectionState {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Idle | SessionState::Disconnected => ConnectionState::Disconnected,
            SessionState::Connecting => ConnectionState::Connecting,
            SessionState::Connected => ConnectionState::Connected,
        }
    }
}

/// Single entry point for hosting, joining and exchanging messages.
pub struct SessionFacade<T: Transport + Clone> {
    transport: T,
    config: SessionConfig,
    session: Option<ConnectionSession<T>>,
}

impl<T: Transport + Clone> SessionFacade<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            session: None,
        }
    }

    /// Replace a finished session with a fresh one.
    fn fresh_session(&mut self) -> Result<&ConnectionSession<T>, SessionError> {
        if let Some(session) = &self.session
            && matches!(
                session.state(),
                SessionState::Connecting | SessionState::Connected
            )
        {
            return Err(SessionError::AlreadyActive);
        }
        let session = ConnectionSession::new(self.transport.clone(), self.config.clone());
        Ok(self.session.insert(session))
    }

    /// Start hosting. Returns the room code to share with the other player.
    pub async fn host_game(&mut self) -> Result<RoomCode, SessionError> {
        self.fresh_session()?.host().await
    }

    /// Join the room `code`. Returns whether the connection opened.
    pub async fn join_game(&mut self, code: &str) -> bool {
        match self.try_join_game(code).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("Could not join room {code:?}: {err}");
                false
            }
        }
    }

    /// Join the room `code`, reporting why it failed.
    pub async fn try_join_game(&mut self, code: &str) -> Result<(), SessionError> {
        self.fresh_session()?.join(code).await
    }

    /// Send a message to the peer. Returns `false` when not connected.
    pub fn send(&self, message: impl Into<Message>) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.send(message.into()).is_ok())
    }

    /// Take all messages received since the last call.
    pub fn drain_inbound(&self) -> Vec<Message> {
        self.session
            .as_ref()
            .map(ConnectionSession::drain_inbound)
            .unwrap_or_default()
    }

    pub fn status(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map_or(ConnectionState::Disconnected, |session| session.state().into())
    }

    pub fn room_code(&self) -> Option<RoomCode> {
        self.session.as_ref().and_then(ConnectionSession::room_code)
    }

    pub fn is_host(&self) -> bool {
        self.session.as_ref().is_some_and(ConnectionSession::is_host)
    }

    /// Why the last session ended, if it ended on an error.
    pub fn last_error(&self) -> Option<SessionError> {
        self.session.as_ref().and_then(ConnectionSession::last_error)
    }

    /// State updates of the current session.
    pub fn subscribe(&self) -> Option<watch::Receiver<SessionState>> {
        self.session.as_ref().map(ConnectionSession::subscribe)
    }

    pub fn session(&self) -> Option<&ConnectionSession<T>> {
        self.session.as_ref()
    }

    /// Tear down the current session, if any.
    pub fn disconnect(&self) {
        if let Some(session) = &self.session {
            session.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::transport::TransportError;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Packet {
        #[serde(rename = "type")]
        kind: String,
    }

    fn packet(kind: &str) -> Message {
        Message::json(&Packet {
            kind: kind.to_string(),
        })
        .unwrap()
    }

    fn facade(net: &MemoryTransport) -> SessionFacade<MemoryTransport> {
        SessionFacade::new(net.clone(), SessionConfig::default())
    }

    async fn wait_connected(facade: &SessionFacade<MemoryTransport>) {
        let mut rx = facade.subscribe().expect("no session");
        tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| *s == SessionState::Connected),
        )
        .await
        .expect("never connected")
        .unwrap();
    }

    async fn drain_one(facade: &SessionFacade<MemoryTransport>) -> Vec<Message> {
        for _ in 0..100 {
            let messages = facade.drain_inbound();
            if !messages.is_empty() {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Vec::new()
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let net = MemoryTransport::new();
        let mut host = facade(&net);
        let mut joiner = facade(&net);

        let code = host.host_game().await.unwrap();
        assert_eq!(host.status(), ConnectionState::Connecting);
        assert!(host.is_host());

        assert!(joiner.join_game(code.as_str()).await);
        assert_eq!(joiner.status(), ConnectionState::Connected);
        assert!(!joiner.is_host());
        assert_eq!(joiner.room_code(), Some(code.clone()));
        wait_connected(&host).await;

        assert!(joiner.send(packet("ping")));
        let received = drain_one(&host).await;
        assert_eq!(received.len(), 1);
        assert_eq!(
            received[0].decode_json::<Packet>().unwrap().kind,
            "ping"
        );

        assert!(host.send(packet("pong")));
        let received = drain_one(&joiner).await;
        assert_eq!(received, vec![packet("pong")]);
    }

    #[tokio::test]
    async fn test_join_without_host_fails() {
        let net = MemoryTransport::new();
        let mut joiner = facade(&net);

        assert!(!joiner.join_game("9999").await);
        assert_eq!(joiner.status(), ConnectionState::Disconnected);
        assert!(matches!(
            joiner.last_error(),
            Some(SessionError::PeerUnreachable(TransportError::PeerNotFound(_)))
        ));
        assert!(!joiner.send("hello"));
    }

    #[tokio::test]
    async fn test_only_first_joiner_connects() {
        let net = MemoryTransport::new();
        let mut host = facade(&net);
        let mut first = facade(&net);
        let mut second = facade(&net);

        let code = host.host_game().await.unwrap();
        assert!(first.join_game(code.as_str()).await);
        wait_connected(&host).await;

        let result = second.try_join_game(code.as_str()).await;
        assert!(matches!(
            result,
            Err(SessionError::PeerUnreachable(TransportError::Rejected))
        ));
        assert_eq!(second.status(), ConnectionState::Disconnected);

        // The original pair is untouched.
        assert_eq!(host.status(), ConnectionState::Connected);
        assert!(first.send("still here"));
        assert_eq!(drain_one(&host).await, vec![Message::from("still here")]);
    }

    #[tokio::test]
    async fn test_concurrent_joiners_one_wins() {
        let net = MemoryTransport::new();
        let mut host = facade(&net);
        let mut a = facade(&net);
        let mut b = facade(&net);

        let code = host.host_game().await.unwrap();
        let (joined_a, joined_b) =
            tokio::join!(a.join_game(code.as_str()), b.join_game(code.as_str()));
        assert!(joined_a ^ joined_b, "exactly one joiner should connect");
        wait_connected(&host).await;
    }

    #[tokio::test]
    async fn test_active_session_blocks_new_one() {
        let net = MemoryTransport::new();
        let mut host = facade(&net);

        let first = host.host_game().await.unwrap();
        assert!(matches!(host.host_game().await, Err(SessionError::AlreadyActive)));
        assert!(matches!(
            host.try_join_game("1234").await,
            Err(SessionError::AlreadyActive)
        ));
        assert_eq!(host.room_code(), Some(first));

        host.disconnect();
        assert_eq!(host.status(), ConnectionState::Disconnected);
        assert_eq!(host.room_code(), None);

        // A new session can start once the old one is gone.
        host.host_game().await.unwrap();
        assert_eq!(host.status(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_invalid_code() {
        let net = MemoryTransport::new();
        let mut joiner = facade(&net);
        assert!(matches!(
            joiner.try_join_game("abcd").await,
            Err(SessionError::InvalidRoomCode(_))
        ));
        assert!(!joiner.join_game("").await);
        assert_eq!(joiner.status(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_no_session_defaults() {
        let net = MemoryTransport::new();
        let idle = facade(&net);
        assert_eq!(idle.status(), ConnectionState::Disconnected);
        assert!(idle.drain_inbound().is_empty());
        assert!(!idle.send("x"));
        assert!(!idle.is_host());
        assert!(idle.room_code().is_none());
        assert!(idle.subscribe().is_none());
        idle.disconnect();
    }

    #[tokio::test]
    async fn test_remote_disconnect_reported() {
        let net = MemoryTransport::new();
        let mut host = facade(&net);
        let mut joiner = facade(&net);

        let code = host.host_game().await.unwrap();
        assert!(joiner.join_game(code.as_str()).await);
        wait_connected(&host).await;

        host.disconnect();
        let mut rx = joiner.subscribe().unwrap();
        tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| *s == SessionState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(joiner.status(), ConnectionState::Disconnected);
        assert!(!joiner.send("anyone?"));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(ConnectionState::from(SessionState::Idle).as_str(), "disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::from(SessionState::Connected), ConnectionState::Connected);
    }
}
