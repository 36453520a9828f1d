use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::channel::SignalingChannel;
use super::messages::{ClientMessage, ServerMessage};
use super::types::{PeerId, RoomName, SignalingError, SignalingSubscription};

/// Signaling over a WebSocket connection to a `SignalingServer`.
///
/// Each subscription opens its own connection.
#[derive(Debug, Clone)]
pub struct WebSocketSignaling {
    url: String,
}

impl WebSocketSignaling {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

fn encode(msg: &ClientMessage) -> Result<Message, SignalingError> {
    let json = serde_json::to_string(msg).map_err(|e| SignalingError::Internal(e.to_string()))?;
    Ok(Message::Text(json.into()))
}

#[async_trait]
impl SignalingChannel for WebSocketSignaling {
    async fn subscribe(
        &self,
        room: &RoomName,
        peer: &PeerId,
    ) -> Result<SignalingSubscription, SignalingError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let subscribe = ClientMessage::Subscribe {
            room: room.clone(),
            peer_id: peer.clone(),
        };
        ws_tx
            .send(encode(&subscribe)?)
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))?;

        // wait for the relay to confirm before handing out the subscription
        loop {
            match ws_rx.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::Subscribed { .. }) => break,
                    Ok(ServerMessage::Error { message }) => {
                        return Err(SignalingError::Rejected(message));
                    }
                    Ok(ServerMessage::Envelope { .. }) => {}
                    Err(e) => debug!("Ignoring unreadable relay frame: {}", e),
                },
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(SignalingError::Transport(e.to_string())),
                None => {
                    return Err(SignalingError::Transport(
                        "relay closed before subscribing".to_string(),
                    ));
                }
            }
        }
        info!("Peer {} subscribed to {} via {}", peer, room, self.url);

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = out_rx.recv() => {
                        let Some(envelope) = outbound else {
                            if let Ok(msg) = encode(&ClientMessage::Unsubscribe) {
                                let _ = ws_tx.send(msg).await;
                            }
                            let _ = ws_tx.close().await;
                            break;
                        };
                        let msg = match encode(&ClientMessage::Publish { envelope }) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!("Failed to encode envelope: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_tx.send(msg).await {
                            warn!("Relay send failed: {}", e);
                            break;
                        }
                    }

                    inbound = ws_rx.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerMessage>(&text) {
                                    Ok(ServerMessage::Envelope { envelope }) => {
                                        let _ = in_tx.send(envelope);
                                    }
                                    Ok(ServerMessage::Error { message }) => {
                                        warn!("Relay reported error: {}", message);
                                    }
                                    Ok(ServerMessage::Subscribed { .. }) => {}
                                    Err(e) => debug!("Dropping malformed relay frame: {}", e),
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!("Relay connection closed");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("Relay connection error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(SignalingSubscription {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::messages::SignalingEnvelope;
    use crate::signaling::server::SignalingServer;
    use crate::signaling::types::Identity;
    use tokio::net::TcpListener;

    async fn start_relay() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let server = SignalingServer::new();
            let _ = server.serve(listener).await;
        });
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn relays_envelopes_between_clients() {
        let url = start_relay().await;
        let signaling = WebSocketSignaling::new(url);
        let room = RoomName::from("r");
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");

        let a = signaling.subscribe(&room, &alice.id).await.unwrap();
        let mut b = signaling.subscribe(&room, &bob.id).await.unwrap();

        let join = SignalingEnvelope::join(&alice, &room);
        a.outbound.send(join.clone()).unwrap();

        assert_eq!(b.inbound.recv().await, Some(join));
    }

    #[tokio::test]
    async fn other_rooms_are_not_relayed() {
        let url = start_relay().await;
        let signaling = WebSocketSignaling::new(url);
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let carol = Identity::new("carol");

        let a = signaling.subscribe(&RoomName::from("one"), &alice.id).await.unwrap();
        let mut b = signaling.subscribe(&RoomName::from("two"), &bob.id).await.unwrap();
        let c = signaling.subscribe(&RoomName::from("two"), &carol.id).await.unwrap();

        a.outbound
            .send(SignalingEnvelope::join(&alice, &RoomName::from("one")))
            .unwrap();
        let marker = SignalingEnvelope::join(&carol, &RoomName::from("two"));
        c.outbound.send(marker.clone()).unwrap();

        // carol's join is the only thing bob can see
        assert_eq!(b.inbound.recv().await, Some(marker));
    }

    #[tokio::test]
    async fn connect_failure_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let signaling = WebSocketSignaling::new(format!("ws://{}", addr));
        let result = signaling
            .subscribe(&RoomName::from("r"), &PeerId::generate())
            .await;
        assert!(matches!(result, Err(SignalingError::Transport(_))));
    }
}
