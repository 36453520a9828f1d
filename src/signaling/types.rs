use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

use super::messages::SignalingEnvelope;

/// Signaling errors
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("not subscribed to a room")]
    NotSubscribed,

    #[error("envelope room {got} does not match subscribed room {expected}")]
    RoomMismatch { expected: RoomName, got: RoomName },

    #[error("relay rejected request: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

const ROOM_CODE_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ROOM_CODE_LEN: usize = 8;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Room name: any string agreed on out of band
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(String);

impl RoomName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Random 8-char room code for ad hoc rooms
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code: String = (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_CHARS[rng.random_range(0..ROOM_CODE_CHARS.len())] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Peer ID: opaque string, generated as "peer_" + 8 hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let value: u32 = rng.random();

        let mut id = String::with_capacity(13);
        id.push_str("peer_");
        for i in 0..8 {
            let nibble = ((value >> (28 - i * 4)) & 0xF) as usize;
            id.push(HEX_CHARS[nibble] as char);
        }
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Local participant identity, fixed for the lifetime of a mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: PeerId,
    pub display_name: String,
}

impl Identity {
    /// Identity with a freshly generated peer id
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: PeerId::generate(),
            display_name: display_name.into(),
        }
    }

    pub fn with_id(id: PeerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// Connected peer as reported to the owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub name: String,
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

/// A live room subscription.
///
/// Envelopes sent on `outbound` are broadcast to the other subscribers of the
/// room. Dropping `outbound` unsubscribes; `inbound` then yields `None`.
#[derive(Debug)]
pub struct SignalingSubscription {
    pub outbound: mpsc::UnboundedSender<SignalingEnvelope>,
    pub inbound: mpsc::UnboundedReceiver<SignalingEnvelope>,
}
