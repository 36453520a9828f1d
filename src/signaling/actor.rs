use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::messages::SignalingEnvelope;
use super::types::{RoomName, SignalingError};

/// Identifies one subscription held by the hub
pub(crate) type SubscriberId = u64;

/// Commands sent to the room hub actor
pub(crate) enum HubCommand {
    Subscribe {
        room: RoomName,
        tx: mpsc::UnboundedSender<SignalingEnvelope>,
        reply: oneshot::Sender<SubscriberId>,
    },
    Publish {
        subscriber: SubscriberId,
        envelope: SignalingEnvelope,
    },
    Unsubscribe {
        subscriber: SubscriberId,
    },
}

pub(crate) async fn room_hub_actor(mut rx: mpsc::Receiver<HubCommand>) {
    let mut rooms: HashMap<RoomName, HashMap<SubscriberId, mpsc::UnboundedSender<SignalingEnvelope>>> =
        HashMap::new();
    let mut subscriber_rooms: HashMap<SubscriberId, RoomName> = HashMap::new();
    let mut next_id: SubscriberId = 1;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            HubCommand::Subscribe { room, tx, reply } => {
                let subscriber = next_id;
                next_id += 1;

                rooms
                    .entry(room.clone())
                    .or_default()
                    .insert(subscriber, tx);
                info!("Subscriber {} joined room {}", subscriber, room);
                subscriber_rooms.insert(subscriber, room);

                let _ = reply.send(subscriber);
            }

            HubCommand::Publish {
                subscriber,
                envelope,
            } => {
                let Some(code) = subscriber_rooms.get(&subscriber) else {
                    debug!("Dropping envelope from unsubscribed {}", subscriber);
                    continue;
                };
                if let Some(room) = rooms.get(code) {
                    debug!(
                        "Relaying {} from {} to {} subscribers of {}",
                        envelope.kind().as_str(),
                        envelope.from,
                        room.len().saturating_sub(1),
                        code
                    );
                    for (id, tx) in room {
                        if *id != subscriber {
                            let _ = tx.send(envelope.clone());
                        }
                    }
                }
            }

            HubCommand::Unsubscribe { subscriber } => {
                if let Some(code) = subscriber_rooms.remove(&subscriber) {
                    if let Some(room) = rooms.get_mut(&code) {
                        room.remove(&subscriber);

                        if room.is_empty() {
                            rooms.remove(&code);
                            info!("Room {} removed (empty)", code);
                        }
                    }
                    info!("Subscriber {} left room {}", subscriber, code);
                }
            }
        }
    }
}

/// Handle to communicate with the room hub actor
#[derive(Clone)]
pub struct RoomHubHandle {
    pub(crate) tx: mpsc::Sender<HubCommand>,
}

impl Default for RoomHubHandle {
    fn default() -> Self {
        Self::spawn()
    }
}

impl RoomHubHandle {
    /// Spawn a fresh hub actor on the current runtime
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<HubCommand>(1024);
        tokio::spawn(room_hub_actor(rx));
        Self { tx }
    }

    /// Subscribe a receiver to a room
    pub(crate) async fn subscribe(
        &self,
        room: RoomName,
        tx: mpsc::UnboundedSender<SignalingEnvelope>,
    ) -> Result<SubscriberId, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(HubCommand::Subscribe {
                room,
                tx,
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("hub channel closed".to_string()))
    }

    /// Broadcast to every other subscriber of the publisher's room
    pub(crate) async fn publish(&self, subscriber: SubscriberId, envelope: SignalingEnvelope) {
        let _ = self
            .tx
            .send(HubCommand::Publish {
                subscriber,
                envelope,
            })
            .await;
    }

    pub(crate) async fn unsubscribe(&self, subscriber: SubscriberId) {
        let _ = self.tx.send(HubCommand::Unsubscribe { subscriber }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::types::PeerId;

    #[tokio::test]
    async fn publish_skips_sender_and_other_rooms() {
        let hub = RoomHubHandle::spawn();
        let room = RoomName::from("r");

        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let (c_tx, mut c_rx) = mpsc::unbounded_channel();
        let a = hub.subscribe(room.clone(), a_tx).await.unwrap();
        let _b = hub.subscribe(room.clone(), b_tx).await.unwrap();
        let _c = hub.subscribe(RoomName::from("other"), c_tx).await.unwrap();

        let env = SignalingEnvelope::leave(&PeerId::from("peer_a"), &room);
        hub.publish(a, env.clone()).await;
        hub.unsubscribe(a).await;

        assert_eq!(b_rx.recv().await, Some(env));
        assert!(a_rx.try_recv().is_err());
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribed_receivers_get_nothing() {
        let hub = RoomHubHandle::spawn();
        let room = RoomName::from("r");

        let (a_tx, _a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let a = hub.subscribe(room.clone(), a_tx).await.unwrap();
        let b = hub.subscribe(room.clone(), b_tx).await.unwrap();
        hub.unsubscribe(b).await;

        hub.publish(a, SignalingEnvelope::leave(&PeerId::from("peer_a"), &room))
            .await;
        // round-trip through the actor so the publish has been handled
        let (watch_tx, _watch_rx) = mpsc::unbounded_channel();
        hub.subscribe(RoomName::from("quiet"), watch_tx).await.unwrap();

        assert!(b_rx.recv().await.is_none());
    }
}
