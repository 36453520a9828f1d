use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::MeshConfig;
use crate::link::{
    IceCandidate, Link, LinkError, LinkEvent, LinkHandle, LinkState, SessionDescription,
};
use crate::signaling::PeerId;

/// Peer session lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Negotiating,
    Connected,
    Disconnected,
}

impl SessionState {
    pub fn can_transition(self, to: SessionState) -> bool {
        matches!(
            (self, to),
            (SessionState::Negotiating, SessionState::Connected)
                | (SessionState::Negotiating, SessionState::Disconnected)
                | (SessionState::Connected, SessionState::Disconnected)
        )
    }
}

/// Which side of the negotiation this node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Offerer,
    Answerer,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub peer_id: PeerId,
    pub peer_name: String,
    pub state: SessionState,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// First negotiation step the driver runs
pub(crate) enum Opening {
    Offer,
    Answer(SessionDescription),
}

impl Opening {
    fn role(&self) -> Role {
        match self {
            Opening::Offer => Role::Offerer,
            Opening::Answer(_) => Role::Answerer,
        }
    }
}

/// Work queued for a session's driver task
#[derive(Debug)]
pub(crate) enum SessionCommand {
    ApplyAnswer(SessionDescription),
    AddCandidate(IceCandidate),
    Send(Bytes),
}

/// What a driver tells the manager
#[derive(Debug)]
pub(crate) enum ReportKind {
    LocalDescription(SessionDescription),
    LocalCandidate(IceCandidate),
    State(LinkState),
    Frame(Bytes),
    Failed(LinkError),
    NegotiationTimeout,
}

#[derive(Debug)]
pub(crate) struct SessionReport {
    pub peer_id: PeerId,
    pub session_id: u64,
    pub kind: ReportKind,
}

/// One remote participant and the link to it
pub(crate) struct PeerSession {
    pub id: u64,
    pub peer_id: PeerId,
    pub peer_name: String,
    pub role: Role,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    link: Arc<dyn Link>,
    commands: mpsc::Sender<SessionCommand>,
    driver: JoinHandle<()>,
    deadline: JoinHandle<()>,
}

impl PeerSession {
    /// Start negotiating with `peer_id` on a fresh link.
    pub(crate) fn spawn(
        id: u64,
        peer_id: PeerId,
        peer_name: String,
        opening: Opening,
        handle: LinkHandle,
        config: &MeshConfig,
        reports: mpsc::UnboundedSender<SessionReport>,
    ) -> Self {
        let (commands, commands_rx) = mpsc::channel(config.session_queue_capacity.max(1));
        let negotiation_timeout = config.negotiation_timeout;
        let role = opening.role();
        let LinkHandle { link, events } = handle;

        let driver = tokio::spawn(drive_session(
            peer_id.clone(),
            id,
            opening,
            link.clone(),
            events,
            commands_rx,
            reports.clone(),
        ));

        let deadline = {
            let peer_id = peer_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(negotiation_timeout).await;
                let _ = reports.send(SessionReport {
                    peer_id,
                    session_id: id,
                    kind: ReportKind::NegotiationTimeout,
                });
            })
        };

        Self {
            id,
            peer_id,
            peer_name,
            role,
            state: SessionState::Negotiating,
            created_at: Utc::now(),
            link,
            commands,
            driver,
            deadline,
        }
    }

    /// Returns true only on the negotiating -> connected transition
    pub(crate) fn mark_connected(&mut self) -> bool {
        if !self.state.can_transition(SessionState::Connected) {
            return false;
        }
        self.state = SessionState::Connected;
        self.deadline.abort();
        true
    }

    /// Queue work for the driver without waiting.
    ///
    /// False if the driver has stopped or its queue is full.
    pub(crate) fn deliver(&self, command: SessionCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Session queue for {} is full", self.peer_id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Stop the driver and hand back the link for closing
    pub(crate) fn close(mut self) -> Arc<dyn Link> {
        self.state = SessionState::Disconnected;
        self.driver.abort();
        self.deadline.abort();
        self.link
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            peer_id: self.peer_id.clone(),
            peer_name: self.peer_name.clone(),
            state: self.state,
            role: self.role,
            created_at: self.created_at,
        }
    }
}

async fn drive_session(
    peer_id: PeerId,
    session_id: u64,
    opening: Opening,
    link: Arc<dyn Link>,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    mut commands: mpsc::Receiver<SessionCommand>,
    reports: mpsc::UnboundedSender<SessionReport>,
) {
    let report = |kind: ReportKind| {
        let _ = reports.send(SessionReport {
            peer_id: peer_id.clone(),
            session_id,
            kind,
        });
    };

    let opened = match opening {
        Opening::Offer => link.create_offer().await,
        Opening::Answer(offer) => match link.apply_offer(offer).await {
            Ok(()) => link.create_answer().await,
            Err(e) => Err(e),
        },
    };
    match opened {
        Ok(description) => report(ReportKind::LocalDescription(description)),
        Err(e) => {
            report(ReportKind::Failed(e));
            return;
        }
    }

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    SessionCommand::ApplyAnswer(answer) => {
                        if let Err(e) = link.apply_answer(answer).await {
                            report(ReportKind::Failed(e));
                            break;
                        }
                    }
                    SessionCommand::AddCandidate(candidate) => {
                        if let Err(e) = link.add_remote_candidate(candidate).await {
                            warn!("Remote candidate rejected for {}: {}", peer_id, e);
                        }
                    }
                    SessionCommand::Send(frame) => {
                        if let Err(e) = link.send(frame).await {
                            report(ReportKind::Failed(e));
                            break;
                        }
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Some(LinkEvent::LocalCandidate(candidate)) => {
                        report(ReportKind::LocalCandidate(candidate));
                    }
                    Some(LinkEvent::StateChanged(state)) => report(ReportKind::State(state)),
                    Some(LinkEvent::Message(frame)) => report(ReportKind::Frame(frame)),
                    None => {
                        report(ReportKind::State(LinkState::Closed));
                        break;
                    }
                }
            }
        }
    }
    debug!("Session driver for {} stopped", peer_id);
}
