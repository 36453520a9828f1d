use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signaling::{Identity, PeerId};

/// Largest accepted message body on send (16 KiB)
pub const MAX_BODY_LEN: usize = 16 * 1024;

/// Largest accepted inbound frame (64 KiB)
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Sender id used for locally synthesized narration
pub const SYSTEM_SENDER_ID: &str = "system";
pub const SYSTEM_SENDER_NAME: &str = "System";

/// Frame codec errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("system messages are never carried over links")]
    SystemKind,

    #[error("frame is missing a message id")]
    MissingId,
}

/// Time-ordered message id: 12 hex digits of unix millis, '-', 8 random hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate(at: DateTime<Utc>) -> Self {
        let millis = at.timestamp_millis().max(0) as u64;
        let suffix: u32 = rand::rng().random();
        Self(format!("{:012x}-{:08x}", millis, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Emoji,
    System,
}

/// A chat message, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: PeerId,
    pub sender_name: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub kind: MessageKind,
}

impl ChatMessage {
    /// Message authored by `sender`, stamped now
    pub fn new(sender: &Identity, body: impl Into<String>, kind: MessageKind) -> Self {
        let sent_at = Utc::now();
        Self {
            id: MessageId::generate(sent_at),
            sender_id: sender.id.clone(),
            sender_name: sender.display_name.clone(),
            body: body.into(),
            sent_at,
            kind,
        }
    }

    /// Local narration of a membership change
    pub fn system(body: impl Into<String>) -> Self {
        let sent_at = Utc::now();
        Self {
            id: MessageId::generate(sent_at),
            sender_id: PeerId::from(SYSTEM_SENDER_ID),
            sender_name: SYSTEM_SENDER_NAME.to_string(),
            body: body.into(),
            sent_at,
            kind: MessageKind::System,
        }
    }

    pub fn peer_joined(name: &str) -> Self {
        Self::system(format!("{} joined the chat", name))
    }

    pub fn peer_left(name: &str) -> Self {
        Self::system(format!("{} left the chat", name))
    }

    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }
}

/// Encode a message as a self-describing JSON frame
pub fn encode_frame(message: &ChatMessage) -> Result<Bytes, FrameError> {
    if message.is_system() {
        return Err(FrameError::SystemKind);
    }
    let json = serde_json::to_vec(message)?;
    if json.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(json.len()));
    }
    Ok(Bytes::from(json))
}

/// Decode a frame received over a link
pub fn decode_frame(data: &[u8]) -> Result<ChatMessage, FrameError> {
    if data.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(data.len()));
    }
    let message: ChatMessage = serde_json::from_slice(data)?;
    if message.is_system() {
        return Err(FrameError::SystemKind);
    }
    if message.id.as_str().is_empty() {
        return Err(FrameError::MissingId);
    }
    Ok(message)
}
