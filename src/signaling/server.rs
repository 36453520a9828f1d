use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::actor::{RoomHubHandle, SubscriberId};
use super::messages::{ClientMessage, ServerMessage, SignalingEnvelope};
use super::types::{OutboundMessage, RoomName, SignalingError};

pub const DEFAULT_SIGNALING_PORT: u16 = 3479;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket relay that broadcasts envelopes between room subscribers
pub struct SignalingServer {
    handle: RoomHubHandle,
}

impl Default for SignalingServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingServer {
    pub fn new() -> Self {
        Self {
            handle: RoomHubHandle::spawn(),
        }
    }

    /// Share a hub with in-process subscribers
    pub fn with_hub(handle: RoomHubHandle) -> Self {
        Self { handle }
    }

    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signaling relay listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let handle = self.handle.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handle).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

/// Per-connection subscription state
struct Subscription {
    id: SubscriberId,
    room: RoomName,
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: RoomHubHandle,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    info!("WebSocket connection from {}", addr);

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();
    let (env_tx, mut env_rx) = mpsc::unbounded_channel::<SignalingEnvelope>();

    let mut subscription: Option<Subscription> = None;
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", addr);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + PONG_TIMEOUT);
                debug!("Ping sent to {}", addr);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", addr);
                break;
            }

            Some(envelope) = env_rx.recv() => {
                let relay = ServerMessage::Envelope { envelope };
                let _ = tx.send(OutboundMessage::from(serde_json::to_string(&relay)?));
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        if let Err(e) = handle_text_message(&text, &tx, &env_tx, &handle, &mut subscription).await {
                            warn!("Message handling error: {}", e);
                        }
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", addr);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", addr);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(sub) = subscription.take() {
        handle.unsubscribe(sub.id).await;
    }

    send_task.abort();
    info!("WebSocket disconnected: {}", addr);

    Ok(())
}

async fn handle_text_message(
    text: &str,
    tx: &mpsc::UnboundedSender<OutboundMessage>,
    env_tx: &mpsc::UnboundedSender<SignalingEnvelope>,
    handle: &RoomHubHandle,
    subscription: &mut Option<Subscription>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            let err = ServerMessage::Error {
                message: format!("Invalid message: {}", e),
            };
            let _ = tx.send(OutboundMessage::from(serde_json::to_string(&err)?));
            return Ok(());
        }
    };

    match client_msg {
        ClientMessage::Subscribe { room, peer_id } => {
            if let Some(previous) = subscription.take() {
                handle.unsubscribe(previous.id).await;
            }
            match handle.subscribe(room.clone(), env_tx.clone()).await {
                Ok(id) => {
                    info!("Peer {} subscribed to room {}", peer_id, room);
                    *subscription = Some(Subscription {
                        id,
                        room: room.clone(),
                    });
                    let response = ServerMessage::Subscribed { room };
                    let _ = tx.send(OutboundMessage::from(serde_json::to_string(&response)?));
                }
                Err(e) => {
                    let err = ServerMessage::Error {
                        message: e.to_string(),
                    };
                    let _ = tx.send(OutboundMessage::from(serde_json::to_string(&err)?));
                }
            }
        }

        ClientMessage::Publish { envelope } => {
            let result = match subscription.as_ref() {
                None => Err(SignalingError::NotSubscribed),
                Some(sub) if sub.room != envelope.room => Err(SignalingError::RoomMismatch {
                    expected: sub.room.clone(),
                    got: envelope.room.clone(),
                }),
                Some(sub) => Ok(sub.id),
            };
            match result {
                Ok(id) => handle.publish(id, envelope).await,
                Err(e) => {
                    let err = ServerMessage::Error {
                        message: e.to_string(),
                    };
                    let _ = tx.send(OutboundMessage::from(serde_json::to_string(&err)?));
                }
            }
        }

        ClientMessage::Unsubscribe => {
            if let Some(sub) = subscription.take() {
                handle.unsubscribe(sub.id).await;
            }
        }
    }

    Ok(())
}
