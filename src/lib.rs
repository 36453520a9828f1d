//! Peer-to-peer room chat over a full mesh of direct links
//!
//! Participants find each other through a room-scoped [`signaling`] channel,
//! negotiate one [`link`] per pair, and exchange [`protocol`] frames directly.
//! The [`mesh`] module ties these together.

pub mod config;
pub mod link;
pub mod mesh;
pub mod protocol;
pub mod signaling;

pub use config::{MeshConfig, RelayConfig};
pub use mesh::{MeshError, MeshEvent, MeshManager};
pub use protocol::{ChatMessage, MessageKind};
pub use signaling::{Identity, PeerId, RoomName};
