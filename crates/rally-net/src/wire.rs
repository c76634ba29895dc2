//! Relay wire protocol: length-prefixed frames carrying versioned postcard messages.
//!
//! ```text
//! +-------------------+---------+---------------------------+
//! | length (4 bytes)  | version | postcard-encoded frame    |
//! | u32 little-endian | u8      | ClientFrame / RelayFrame  |
//! +-------------------+---------+---------------------------+
//! ```
//!
//! The length covers the version byte and the body, not the prefix itself.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::address::EndpointAddress;

/// Current wire-protocol version. Prepended to every frame body.
pub const PROTOCOL_VERSION: u8 = 1;

/// Limits for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed frame size in bytes. Default: 1 MiB.
    pub max_payload_size: u32,
}

/// Worst-case bytes a `Data` frame adds around its payload: version byte,
/// variant tag, varint link id (up to 10) and varint length (up to 5).
pub const DATA_FRAME_OVERHEAD: u32 = 17;

impl FrameConfig {
    /// Largest payload that always fits in one `Data` frame.
    pub fn max_data_payload(&self) -> usize {
        self.max_payload_size.saturating_sub(DATA_FRAME_OVERHEAD) as usize
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Frames sent from a client endpoint to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientFrame {
    /// Claim an address. Must be the first frame on a connection.
    Register { address: EndpointAddress },
    /// Dial `remote`. `link` is chosen by the client and has the dialed bit set.
    Connect {
        link: u64,
        remote: EndpointAddress,
        reliable: bool,
    },
    /// Accept an offered link.
    Accept { link: u64 },
    /// Payload for the peer on `link`.
    Data { link: u64, payload: Vec<u8> },
    /// Tear down `link`.
    Close { link: u64 },
}

/// Frames sent from the relay to a client endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RelayFrame {
    /// The address is now owned by this connection.
    Registered { address: EndpointAddress },
    /// The address could not be claimed.
    RegisterRejected {
        address: EndpointAddress,
        reason: RejectReason,
    },
    /// Someone dialed this endpoint. `link` is relay-assigned.
    Incoming {
        link: u64,
        from: EndpointAddress,
        reliable: bool,
    },
    /// The link handshake completed.
    Opened { link: u64 },
    /// Payload from the peer on `link`.
    Data { link: u64, payload: Vec<u8> },
    /// The peer closed `link`.
    Closed { link: u64 },
    /// A dial did not complete.
    ConnectFailed { link: u64, reason: ConnectFailure },
}

/// Why a registration was refused.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RejectReason {
    /// Another client holds the address.
    AddressInUse,
    /// This connection already registered an address.
    AlreadyRegistered,
}

/// Why a dial failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectFailure {
    /// Nothing is registered at the remote address.
    NotFound,
    /// The remote endpoint dropped the offer or went away before accepting.
    Rejected,
    /// The dialing connection never registered.
    NotRegistered,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The frame size exceeds the configured maximum.
    #[error("frame size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual frame size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// The frame body was empty (no version byte).
    #[error("empty frame: no version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard encoding or decoding failed.
    #[error("codec error: {0}")]
    Postcard(#[from] postcard::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a frame body: `[version: u8] [postcard]`.
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, WireError> {
    let body = postcard::to_allocvec(frame)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a frame body produced by [`encode`].
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, WireError> {
    let (&version, body) = data.split_first().ok_or(WireError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(body)?)
}

/// Read one frame from the stream and decode it.
pub async fn read_frame<T, R>(reader: &mut R, config: &FrameConfig) -> Result<T, WireError>
where
    T: DeserializeOwned,
    R: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf);
    if len > config.max_payload_size {
        return Err(WireError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            WireError::ConnectionClosed
        } else {
            WireError::Io(e)
        }
    })?;

    decode(&body)
}

/// Encode a frame and write it with its length prefix.
pub async fn write_frame<T, W>(writer: &mut W, frame: &T, config: &FrameConfig) -> Result<(), WireError>
where
    T: Serialize,
    W: AsyncWriteExt + Unpin,
{
    let body = encode(frame)?;
    let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
    if len > config.max_payload_size {
        return Err(WireError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        });
    }

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn addr(s: &str) -> EndpointAddress {
        EndpointAddress::new(s)
    }

    #[tokio::test]
    async fn test_frames_in_sequence() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig::default();

        let frames = vec![
            ClientFrame::Register {
                address: addr("rally-join-4821-1-0"),
            },
            ClientFrame::Connect {
                link: 1 | (1 << 63),
                remote: addr("rally-host-4821"),
                reliable: true,
            },
            ClientFrame::Data {
                link: 1 | (1 << 63),
                payload: br#"{"type":"ping"}"#.to_vec(),
            },
        ];
        for frame in &frames {
            write_frame(&mut client, frame, &config).await.unwrap();
        }
        for expected in &frames {
            let received: ClientFrame = read_frame(&mut server, &config).await.unwrap();
            assert_eq!(&received, expected);
        }
    }

    #[tokio::test]
    async fn test_partial_read_resumes_correctly() {
        // tiny buffer forces partial writes/reads
        let (mut client, mut server) = duplex(8);
        let config = FrameConfig::default();
        let frame = RelayFrame::Data {
            link: 7,
            payload: vec![0xAB; 300],
        };

        let write_config = config.clone();
        let sent = frame.clone();
        let write_task = tokio::spawn(async move {
            write_frame(&mut client, &sent, &write_config).await.unwrap();
        });

        let received: RelayFrame = read_frame(&mut server, &config).await.unwrap();
        write_task.await.unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_read() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig {
            max_payload_size: 16,
        };

        client.write_all(&1024u32.to_le_bytes()).await.unwrap();
        client.flush().await.unwrap();

        let result = read_frame::<RelayFrame, _>(&mut server, &config).await;
        assert!(matches!(result, Err(WireError::PayloadTooLarge { size: 1024, max: 16 })));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_write() {
        let (mut client, _server) = duplex(8192);
        let config = FrameConfig {
            max_payload_size: 16,
        };
        let frame = ClientFrame::Data {
            link: 1,
            payload: vec![0u8; 1024],
        };
        let result = write_frame(&mut client, &frame, &config).await;
        assert!(matches!(result, Err(WireError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_connection_closed_during_length_read() {
        let (client, mut server) = duplex(8192);
        drop(client);

        let result = read_frame::<ClientFrame, _>(&mut server, &FrameConfig::default()).await;
        assert!(matches!(result, Err(WireError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_connection_closed_mid_frame() {
        let (mut client, mut server) = duplex(8192);
        client.write_all(&10u32.to_le_bytes()).await.unwrap();
        client.write_all(&[PROTOCOL_VERSION, 0]).await.unwrap();
        drop(client);

        let result = read_frame::<ClientFrame, _>(&mut server, &FrameConfig::default()).await;
        assert!(matches!(result, Err(WireError::ConnectionClosed)));
    }

    #[test]
    fn test_largest_data_payload_fits_in_a_frame() {
        let config = FrameConfig {
            max_payload_size: 4096,
        };
        let frame = ClientFrame::Data {
            link: u64::MAX,
            payload: vec![0xFF; config.max_data_payload()],
        };
        let encoded = encode(&frame).unwrap();
        assert!(encoded.len() <= config.max_payload_size as usize);

        let tiny = FrameConfig { max_payload_size: 8 };
        assert_eq!(tiny.max_data_payload(), 0);
    }

    #[test]
    fn test_version_byte_is_first_byte() {
        let bytes = encode(&RelayFrame::Opened { link: 3 }).unwrap();
        assert_eq!(bytes[0], PROTOCOL_VERSION);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = encode(&RelayFrame::Closed { link: 3 }).unwrap();
        bytes[0] = 255;
        assert!(matches!(
            decode::<RelayFrame>(&bytes),
            Err(WireError::UnsupportedVersion(255))
        ));
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(decode::<RelayFrame>(&[]), Err(WireError::EmptyPayload)));
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let result = decode::<RelayFrame>(&[PROTOCOL_VERSION, 0xFF, 0xFF, 0xFF]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejection_frame_survives_encoding() {
        let frame = RelayFrame::RegisterRejected {
            address: addr("rally-host-4821"),
            reason: RejectReason::AddressInUse,
        };
        let decoded: RelayFrame = decode(&encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }
}
