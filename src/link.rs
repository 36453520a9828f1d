//! Direct peer link capability consumed by the mesh
//!
//! A link is negotiated through an offer/answer/candidate exchange carried
//! over signaling. Once connected it moves ordered byte messages between two
//! endpoints. Local candidates, state changes and inbound messages are
//! reported as [`LinkEvent`]s on the channel handed out with the link.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::signaling::PeerId;

pub use memory::{MemoryLink, MemoryNetwork};

/// Link errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("link is not connected")]
    NotConnected,

    #[error("link closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Opaque offer or answer descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Opaque connectivity candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Closed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    LocalCandidate(IceCandidate),
    StateChanged(LinkState),
    Message(Bytes),
}

/// One end of a point-to-point ordered message channel
#[async_trait]
pub trait Link: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, LinkError>;

    async fn apply_offer(&self, offer: SessionDescription) -> Result<(), LinkError>;

    async fn create_answer(&self) -> Result<SessionDescription, LinkError>;

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), LinkError>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), LinkError>;

    async fn send(&self, frame: Bytes) -> Result<(), LinkError>;

    /// Release the link. Must be safe to call more than once.
    async fn close(&self);
}

/// A fresh link plus the receiver for its events
pub struct LinkHandle {
    pub link: Arc<dyn Link>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Creates links on demand, one per remote peer
pub trait LinkFactory: Send + Sync {
    fn create_link(&self, local: &PeerId, remote: &PeerId) -> Result<LinkHandle, LinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_wire_shape() {
        let json = serde_json::to_string(&SessionDescription::offer("v=0")).unwrap();
        assert_eq!(json, r#"{"type":"offer","sdp":"v=0"}"#);
    }

    #[test]
    fn candidate_wire_shape() {
        let candidate = IceCandidate {
            candidate: "candidate:1".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        };
        let json = serde_json::to_string(&candidate).unwrap();
        assert!(json.contains(r#""sdpMid":"0""#));
        assert!(json.contains(r#""sdpMLineIndex":0"#));
    }

    #[test]
    fn bare_candidate_omits_optional_fields() {
        let json = serde_json::to_string(&IceCandidate::new("candidate:1")).unwrap();
        assert_eq!(json, r#"{"candidate":"candidate:1"}"#);
    }
}
