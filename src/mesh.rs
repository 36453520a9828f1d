//! Full-mesh room membership over direct peer links
//!
//! Each participant runs one [`MeshManager`]. It announces itself on the
//! room's signaling channel, negotiates one link per remote member (members
//! already present offer to each newcomer), and fans chat messages out over
//! every connected link. Lifecycle changes and messages reach the owner as [`MeshEvent`]s.

mod candidates;
mod manager;
mod session;

use thiserror::Error;

use crate::protocol::{ChatMessage, FrameError};
use crate::signaling::{PeerId, SignalingError};

pub use manager::MeshManager;
pub use session::{Role, SessionSnapshot, SessionState};

/// Mesh manager errors
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("mesh manager is closed")]
    Closed,

    #[error("system messages are generated locally and cannot be sent")]
    InvalidKind,

    #[error("message body too long: {0} bytes")]
    BodyTooLong(usize),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),
}

/// Notifications raised to the owner of a mesh
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// A chat message to display.
    ///
    /// `peer_id` is the link it arrived on, our own id for the local echo of
    /// a send, or the subject peer for join/leave narration.
    Message { peer_id: PeerId, message: ChatMessage },

    /// Fired once when a session reaches `connected`
    PeerConnected { peer_id: PeerId, peer_name: String },

    /// Fired once when a session ends, however it ends
    PeerDisconnected { peer_id: PeerId },

    /// Negotiation ended before connecting. Followed by `PeerDisconnected`
    /// when a session had been created for the peer. Not raised for sessions
    /// torn down by our own disconnect.
    NegotiationFailed { peer_id: PeerId },
}
