//! Rendezvous signaling: room-scoped broadcast of connection-setup metadata

mod actor;
mod channel;
mod client;
mod messages;
mod server;
mod types;

pub use actor::RoomHubHandle;
pub use channel::{LocalSignaling, SignalingChannel};
pub use client::WebSocketSignaling;
pub use messages::{
    AnswerPayload, CandidatePayload, ClientMessage, JoinPayload, OfferPayload, ServerMessage,
    Signal, SignalKind, SignalingEnvelope,
};
pub use server::{DEFAULT_SIGNALING_PORT, SignalingServer};
pub use types::{
    Identity, OutboundMessage, PeerId, PeerInfo, RoomName, SignalingError, SignalingSubscription,
};
