use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::actor::RoomHubHandle;
use super::types::{PeerId, RoomName, SignalingError, SignalingSubscription};

/// Rendezvous capability consumed by the mesh.
///
/// Implementations broadcast each published envelope to every other current
/// subscriber of the room. No ordering across senders, no replay for late
/// subscribers.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn subscribe(
        &self,
        room: &RoomName,
        peer: &PeerId,
    ) -> Result<SignalingSubscription, SignalingError>;
}

/// In-process signaling backed by a room hub actor.
///
/// Every manager sharing one `LocalSignaling` (or a clone of it) can see the
/// others; separate instances are isolated from each other.
#[derive(Clone, Default)]
pub struct LocalSignaling {
    hub: RoomHubHandle,
}

impl LocalSignaling {
    pub fn new() -> Self {
        Self {
            hub: RoomHubHandle::spawn(),
        }
    }

    pub fn with_hub(hub: RoomHubHandle) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl SignalingChannel for LocalSignaling {
    async fn subscribe(
        &self,
        room: &RoomName,
        peer: &PeerId,
    ) -> Result<SignalingSubscription, SignalingError> {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        let subscriber = self.hub.subscribe(room.clone(), in_tx).await?;
        debug!("Peer {} subscribed to {} as {}", peer, room, subscriber);

        let hub = self.hub.clone();
        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                hub.publish(subscriber, envelope).await;
            }
            hub.unsubscribe(subscriber).await;
        });

        Ok(SignalingSubscription {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
