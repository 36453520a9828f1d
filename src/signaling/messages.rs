use serde::{Deserialize, Serialize};

use super::types::{Identity, PeerId, RoomName};
use crate::link::{IceCandidate, SessionDescription};

/// Envelope kinds as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Join,
    Leave,
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Join => "join",
            SignalKind::Leave => "leave",
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub offer: SessionDescription,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub answer: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub candidate: IceCandidate,
}

/// Kind-specific content of a signaling envelope.
///
/// On the wire the variant name is `kind` and its body is `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum Signal {
    Join(JoinPayload),
    Leave {},
    Offer(OfferPayload),
    Answer(AnswerPayload),
    Candidate(CandidatePayload),
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Join(_) => SignalKind::Join,
            Signal::Leave {} => SignalKind::Leave,
            Signal::Offer(_) => SignalKind::Offer,
            Signal::Answer(_) => SignalKind::Answer,
            Signal::Candidate(_) => SignalKind::Candidate,
        }
    }
}

/// Connection-setup metadata exchanged through the rendezvous channel.
///
/// `to == None` means broadcast to the whole room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    pub from: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PeerId>,
    pub room: RoomName,
    #[serde(flatten)]
    pub signal: Signal,
}

impl SignalingEnvelope {
    pub fn join(identity: &Identity, room: &RoomName) -> Self {
        Self {
            from: identity.id.clone(),
            to: None,
            room: room.clone(),
            signal: Signal::Join(JoinPayload {
                user_name: identity.display_name.clone(),
            }),
        }
    }

    pub fn leave(from: &PeerId, room: &RoomName) -> Self {
        Self {
            from: from.clone(),
            to: None,
            room: room.clone(),
            signal: Signal::Leave {},
        }
    }

    pub fn offer(
        identity: &Identity,
        to: &PeerId,
        room: &RoomName,
        offer: SessionDescription,
    ) -> Self {
        Self {
            from: identity.id.clone(),
            to: Some(to.clone()),
            room: room.clone(),
            signal: Signal::Offer(OfferPayload {
                offer,
                user_name: identity.display_name.clone(),
            }),
        }
    }

    pub fn answer(from: &PeerId, to: &PeerId, room: &RoomName, answer: SessionDescription) -> Self {
        Self {
            from: from.clone(),
            to: Some(to.clone()),
            room: room.clone(),
            signal: Signal::Answer(AnswerPayload { answer }),
        }
    }

    pub fn candidate(from: &PeerId, to: &PeerId, room: &RoomName, candidate: IceCandidate) -> Self {
        Self {
            from: from.clone(),
            to: Some(to.clone()),
            room: room.clone(),
            signal: Signal::Candidate(CandidatePayload { candidate }),
        }
    }

    pub fn kind(&self) -> SignalKind {
        self.signal.kind()
    }
}

/// Messages sent from client to relay
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Subscribe this connection to a room
    #[serde(rename = "subscribe")]
    Subscribe { room: RoomName, peer_id: PeerId },

    /// Broadcast an envelope to the rest of the room
    #[serde(rename = "publish")]
    Publish { envelope: SignalingEnvelope },

    /// Leave the current room
    #[serde(rename = "unsubscribe")]
    Unsubscribe,
}

/// Messages sent from relay to client
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Subscription accepted
    #[serde(rename = "subscribed")]
    Subscribed { room: RoomName },

    /// Envelope published by another room member
    #[serde(rename = "envelope")]
    Envelope { envelope: SignalingEnvelope },

    /// Error response
    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SdpType;

    fn room() -> RoomName {
        RoomName::from("r")
    }

    #[test]
    fn parse_join() {
        let json = r#"{"kind": "join", "from": "peer_a", "room": "r", "payload": {"userName": "Alice"}}"#;
        let env: SignalingEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.from, PeerId::from("peer_a"));
        assert_eq!(env.to, None);
        assert_eq!(
            env.signal,
            Signal::Join(JoinPayload {
                user_name: "Alice".to_string()
            })
        );
    }

    #[test]
    fn parse_leave() {
        let json = r#"{"kind": "leave", "from": "peer_a", "room": "r", "payload": {}}"#;
        let env: SignalingEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.kind(), SignalKind::Leave);
        assert_eq!(env.signal, Signal::Leave {});
    }

    #[test]
    fn parse_offer() {
        let json = r#"{
            "kind": "offer", "from": "peer_a", "to": "peer_b", "room": "r",
            "payload": {"offer": {"type": "offer", "sdp": "v=0"}, "userName": "Alice"}
        }"#;
        let env: SignalingEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.to, Some(PeerId::from("peer_b")));
        match env.signal {
            Signal::Offer(payload) => {
                assert_eq!(payload.offer.sdp_type, SdpType::Offer);
                assert_eq!(payload.offer.sdp, "v=0");
                assert_eq!(payload.user_name, "Alice");
            }
            other => panic!("Expected Offer, got {:?}", other),
        }
    }

    #[test]
    fn parse_candidate() {
        let json = r#"{
            "kind": "candidate", "from": "peer_a", "to": "peer_b", "room": "r",
            "payload": {"candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host", "sdpMid": "0", "sdpMLineIndex": 0}}
        }"#;
        let env: SignalingEnvelope = serde_json::from_str(json).unwrap();
        if let Signal::Candidate(payload) = env.signal {
            assert_eq!(payload.candidate.sdp_mid.as_deref(), Some("0"));
            assert_eq!(payload.candidate.sdp_m_line_index, Some(0));
        } else {
            panic!("Expected Candidate");
        }
    }

    #[test]
    fn reject_unknown_kind() {
        let json = r#"{"kind": "user-info", "from": "peer_a", "room": "r", "payload": {}}"#;
        assert!(serde_json::from_str::<SignalingEnvelope>(json).is_err());
    }

    #[test]
    fn reject_payload_not_matching_kind() {
        let json = r#"{"kind": "answer", "from": "peer_a", "to": "peer_b", "room": "r", "payload": {"userName": "x"}}"#;
        assert!(serde_json::from_str::<SignalingEnvelope>(json).is_err());
    }

    #[test]
    fn serialize_join_omits_to() {
        let identity = Identity::with_id(PeerId::from("peer_a"), "Alice");
        let json = serde_json::to_string(&SignalingEnvelope::join(&identity, &room())).unwrap();
        assert!(json.contains(r#""kind":"join""#));
        assert!(json.contains(r#""userName":"Alice""#));
        assert!(!json.contains(r#""to""#));
    }

    #[test]
    fn offer_wire_shape() {
        let identity = Identity::with_id(PeerId::from("peer_a"), "Alice");
        let env = SignalingEnvelope::offer(
            &identity,
            &PeerId::from("peer_b"),
            &room(),
            SessionDescription::offer("v=0"),
        );
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "kind": "offer",
                "from": "peer_a",
                "to": "peer_b",
                "room": "r",
                "payload": {"offer": {"type": "offer", "sdp": "v=0"}, "userName": "Alice"}
            })
        );
    }

    #[test]
    fn serialize_leave_has_empty_payload() {
        let env = SignalingEnvelope::leave(&PeerId::from("peer_a"), &room());
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains(r#""payload":{}"#));
    }

    #[test]
    fn answer_survives_wire() {
        let env = SignalingEnvelope::answer(
            &PeerId::from("peer_b"),
            &PeerId::from("peer_a"),
            &room(),
            SessionDescription::answer("v=0 answer"),
        );
        let json = serde_json::to_string(&env).unwrap();
        let parsed: SignalingEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn parse_client_publish() {
        let json = r#"{"type": "publish", "envelope": {"kind": "leave", "from": "peer_a", "room": "r", "payload": {}}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        if let ClientMessage::Publish { envelope } = msg {
            assert_eq!(envelope.kind(), SignalKind::Leave);
        } else {
            panic!("Expected Publish");
        }
    }

    #[test]
    fn parse_client_subscribe() {
        let json = r#"{"type": "subscribe", "room": "lobby", "peer_id": "peer_a"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        if let ClientMessage::Subscribe { room, peer_id } = msg {
            assert_eq!(room.as_str(), "lobby");
            assert_eq!(peer_id.as_str(), "peer_a");
        } else {
            panic!("Expected Subscribe");
        }
    }

    #[test]
    fn serialize_server_error() {
        let msg = ServerMessage::Error {
            message: "not subscribed".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("error"));
        assert!(json.contains("not subscribed"));
    }
}
