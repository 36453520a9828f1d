use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::candidates::CandidateBuffer;
use super::session::{
    Opening, PeerSession, ReportKind, Role, SessionCommand, SessionReport, SessionSnapshot,
    SessionState,
};
use super::{MeshError, MeshEvent};
use crate::config::MeshConfig;
use crate::link::{Link, LinkFactory, LinkState};
use crate::protocol::{ChatMessage, MAX_BODY_LEN, MessageKind, decode_frame, encode_frame};
use crate::signaling::{
    AnswerPayload, CandidatePayload, Identity, OfferPayload, PeerId, PeerInfo, RoomName, Signal,
    SignalingChannel, SignalingEnvelope,
};

/// Upper bound on waiting for links to close during shutdown
const LINK_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Commands sent to the mesh actor
enum MeshCommand {
    Send {
        body: String,
        kind: MessageKind,
        reply: oneshot::Sender<Result<ChatMessage, MeshError>>,
    },
    ConnectedPeers {
        reply: oneshot::Sender<Vec<PeerInfo>>,
    },
    Sessions {
        reply: oneshot::Sender<Vec<SessionSnapshot>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to one participant's mesh in one room.
///
/// Clones share the same mesh. The mesh shuts down on [`disconnect`] or when
/// the last handle is dropped.
///
/// [`disconnect`]: MeshManager::disconnect
#[derive(Clone)]
pub struct MeshManager {
    identity: Identity,
    room: RoomName,
    tx: mpsc::Sender<MeshCommand>,
}

impl MeshManager {
    /// Subscribe to `room`, announce `identity`, and start the mesh actor.
    pub async fn join(
        identity: Identity,
        room: RoomName,
        signaling: &dyn SignalingChannel,
        links: Arc<dyn LinkFactory>,
        config: MeshConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MeshEvent>), MeshError> {
        let subscription = signaling.subscribe(&room, &identity.id).await?;

        let (tx, rx) = mpsc::channel::<MeshCommand>(256);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();

        let actor = MeshActor {
            identity: identity.clone(),
            room: room.clone(),
            candidates: CandidateBuffer::new(
                config.candidate_buffer_capacity,
                config.candidate_retention,
            ),
            config,
            links,
            outbound: Some(subscription.outbound),
            events: event_tx,
            sessions: HashMap::new(),
            reports_tx,
            next_session_id: 1,
            closed: false,
        };
        actor.publish(SignalingEnvelope::join(&identity, &room));
        info!(
            "Peer {} ({}) joined room {}",
            identity.id, identity.display_name, room
        );

        tokio::spawn(actor.run(rx, subscription.inbound, reports_rx));

        Ok((Self { identity, room, tx }, event_rx))
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }

    /// Send a message to every connected peer and echo it locally.
    ///
    /// Per-peer delivery failures never surface here.
    pub async fn send(
        &self,
        body: impl Into<String>,
        kind: MessageKind,
    ) -> Result<ChatMessage, MeshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MeshCommand::Send {
                body: body.into(),
                kind,
                reply: reply_tx,
            })
            .await
            .map_err(|_| MeshError::Closed)?;
        reply_rx.await.map_err(|_| MeshError::Closed)?
    }

    pub async fn send_text(&self, body: impl Into<String>) -> Result<ChatMessage, MeshError> {
        self.send(body, MessageKind::Text).await
    }

    /// Peers whose session is currently connected
    pub async fn connected_peers(&self) -> Result<Vec<PeerInfo>, MeshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MeshCommand::ConnectedPeers { reply: reply_tx })
            .await
            .map_err(|_| MeshError::Closed)?;
        reply_rx.await.map_err(|_| MeshError::Closed)
    }

    /// Every live session, negotiating or connected
    pub async fn sessions(&self) -> Result<Vec<SessionSnapshot>, MeshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MeshCommand::Sessions { reply: reply_tx })
            .await
            .map_err(|_| MeshError::Closed)?;
        reply_rx.await.map_err(|_| MeshError::Closed)
    }

    /// Announce departure, close every link and stop the mesh.
    ///
    /// Safe to call repeatedly, from any clone.
    pub async fn disconnect(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(MeshCommand::Disconnect { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

/// Owns the session map; every mutation happens on this task
struct MeshActor {
    identity: Identity,
    room: RoomName,
    config: MeshConfig,
    links: Arc<dyn LinkFactory>,
    outbound: Option<mpsc::UnboundedSender<SignalingEnvelope>>,
    events: mpsc::UnboundedSender<MeshEvent>,
    sessions: HashMap<PeerId, PeerSession>,
    candidates: CandidateBuffer,
    reports_tx: mpsc::UnboundedSender<SessionReport>,
    next_session_id: u64,
    closed: bool,
}

impl MeshActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<MeshCommand>,
        mut inbound: mpsc::UnboundedReceiver<SignalingEnvelope>,
        mut reports: mpsc::UnboundedReceiver<SessionReport>,
    ) {
        let mut signaling_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(MeshCommand::Disconnect { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },

                envelope = inbound.recv(), if signaling_open => match envelope {
                    Some(envelope) => self.handle_envelope(envelope),
                    None => {
                        warn!("Signaling subscription for room {} ended", self.room);
                        signaling_open = false;
                    }
                },

                Some(report) = reports.recv() => self.handle_report(report),
            }
        }
    }

    fn handle_command(&mut self, command: MeshCommand) {
        match command {
            MeshCommand::Send { body, kind, reply } => {
                let _ = reply.send(self.send_message(body, kind));
            }
            MeshCommand::ConnectedPeers { reply } => {
                let peers = self
                    .sessions
                    .values()
                    .filter(|s| s.state == SessionState::Connected)
                    .map(|s| PeerInfo {
                        id: s.peer_id.clone(),
                        name: s.peer_name.clone(),
                    })
                    .collect();
                let _ = reply.send(peers);
            }
            MeshCommand::Sessions { reply } => {
                let _ = reply.send(self.sessions.values().map(PeerSession::snapshot).collect());
            }
            // handled by the run loop
            MeshCommand::Disconnect { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_envelope(&mut self, envelope: SignalingEnvelope) {
        if envelope.from == self.identity.id {
            trace!("Ignoring own {} envelope", envelope.kind().as_str());
            return;
        }
        if envelope.room != self.room {
            debug!(
                "Ignoring {} for room {} from {}",
                envelope.kind().as_str(),
                envelope.room,
                envelope.from
            );
            return;
        }
        if let Some(to) = &envelope.to {
            if *to != self.identity.id {
                trace!(
                    "Ignoring {} from {} addressed to {}",
                    envelope.kind().as_str(),
                    envelope.from,
                    to
                );
                return;
            }
        }

        let SignalingEnvelope {
            from, to, signal, ..
        } = envelope;
        let addressed = to.is_some();

        match signal {
            Signal::Join(payload) => self.on_join(from, payload.user_name),
            Signal::Leave {} => self.on_leave(&from),
            Signal::Offer(payload) if addressed => self.on_offer(from, payload),
            Signal::Answer(payload) if addressed => self.on_answer(&from, payload),
            Signal::Candidate(payload) if addressed => self.on_candidate(from, payload),
            other => debug!(
                "Ignoring unaddressed {} from {}",
                other.kind().as_str(),
                from
            ),
        }
    }

    fn on_join(&mut self, peer_id: PeerId, peer_name: String) {
        if self.closed || self.sessions.contains_key(&peer_id) {
            debug!("Join from known peer {} ignored", peer_id);
            return;
        }
        self.open_session(peer_id, peer_name, Opening::Offer);
    }

    fn on_offer(&mut self, peer_id: PeerId, payload: OfferPayload) {
        if self.closed {
            return;
        }
        if let Some(existing) = self.sessions.get(&peer_id) {
            // crossed joins: both sides offered; the higher id backs off and answers
            let collision = existing.role == Role::Offerer
                && existing.state == SessionState::Negotiating
                && self.identity.id > peer_id;
            if !collision {
                debug!("Offer from known peer {} ignored", peer_id);
                return;
            }
            info!("Offer collision with {}, answering instead", peer_id);
            if let Some(superseded) = self.sessions.remove(&peer_id) {
                let link = superseded.close();
                tokio::spawn(async move { link.close().await });
            }
        }
        self.open_session(peer_id, payload.user_name, Opening::Answer(payload.offer));
    }

    fn on_answer(&mut self, peer_id: &PeerId, payload: AnswerPayload) {
        match self.sessions.get(peer_id) {
            Some(session)
                if session.role == Role::Offerer && session.state == SessionState::Negotiating =>
            {
                session.deliver(SessionCommand::ApplyAnswer(payload.answer));
            }
            _ => debug!("Stale answer from {} dropped", peer_id),
        }
    }

    fn on_candidate(&mut self, peer_id: PeerId, payload: CandidatePayload) {
        if self.closed {
            return;
        }
        match self.sessions.get(&peer_id) {
            Some(session) => {
                session.deliver(SessionCommand::AddCandidate(payload.candidate));
            }
            None => {
                self.candidates
                    .push(&peer_id, payload.candidate, Instant::now());
                debug!(
                    "Buffered early candidate from {} ({} pending)",
                    peer_id,
                    self.candidates.len()
                );
            }
        }
    }

    fn on_leave(&mut self, peer_id: &PeerId) {
        self.candidates.discard(peer_id);
        if self.sessions.contains_key(peer_id) {
            self.drop_session(peer_id, "peer left the room");
        }
    }

    fn open_session(&mut self, peer_id: PeerId, peer_name: String, opening: Opening) {
        let handle = match self.links.create_link(&self.identity.id, &peer_id) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Could not create link to {}: {}", peer_id, e);
                self.emit(MeshEvent::NegotiationFailed { peer_id });
                return;
            }
        };

        let id = self.next_session_id;
        self.next_session_id += 1;

        let session = PeerSession::spawn(
            id,
            peer_id.clone(),
            peer_name,
            opening,
            handle,
            &self.config,
            self.reports_tx.clone(),
        );
        for candidate in self.candidates.take(&peer_id, Instant::now()) {
            session.deliver(SessionCommand::AddCandidate(candidate));
        }

        info!(
            "Session {} with {} ({}) negotiating as {:?}",
            id, peer_id, session.peer_name, session.role
        );
        self.sessions.insert(peer_id, session);
    }

    fn handle_report(&mut self, report: SessionReport) {
        let SessionReport {
            peer_id,
            session_id,
            kind,
        } = report;
        let Some(session) = self.sessions.get_mut(&peer_id) else {
            trace!("Report for departed peer {} dropped", peer_id);
            return;
        };
        if session.id != session_id {
            trace!("Report from superseded session {} dropped", session_id);
            return;
        }

        match kind {
            ReportKind::LocalDescription(description) => {
                let role = session.role;
                let envelope = match role {
                    Role::Offerer => {
                        SignalingEnvelope::offer(&self.identity, &peer_id, &self.room, description)
                    }
                    Role::Answerer => SignalingEnvelope::answer(
                        &self.identity.id,
                        &peer_id,
                        &self.room,
                        description,
                    ),
                };
                self.publish(envelope);
            }

            ReportKind::LocalCandidate(candidate) => {
                self.publish(SignalingEnvelope::candidate(
                    &self.identity.id,
                    &peer_id,
                    &self.room,
                    candidate,
                ));
            }

            ReportKind::State(LinkState::Connected) => {
                if session.mark_connected() {
                    let peer_name = session.peer_name.clone();
                    info!("Peer {} ({}) connected", peer_id, peer_name);
                    self.emit(MeshEvent::PeerConnected {
                        peer_id: peer_id.clone(),
                        peer_name: peer_name.clone(),
                    });
                    self.emit(MeshEvent::Message {
                        peer_id,
                        message: ChatMessage::peer_joined(&peer_name),
                    });
                }
            }

            ReportKind::State(LinkState::Connecting) => {
                debug!("Link to {} connecting", peer_id);
            }

            ReportKind::State(state @ (LinkState::Closed | LinkState::Failed)) => {
                let reason = format!("link {:?}", state).to_lowercase();
                self.drop_session(&peer_id, &reason);
            }

            ReportKind::Frame(frame) => match decode_frame(&frame) {
                Ok(message) => self.emit(MeshEvent::Message { peer_id, message }),
                Err(e) => warn!("Dropping frame from {}: {}", peer_id, e),
            },

            ReportKind::Failed(e) => {
                warn!("Link to {} failed: {}", peer_id, e);
                self.drop_session(&peer_id, "link error");
            }

            ReportKind::NegotiationTimeout => {
                if session.state == SessionState::Negotiating {
                    warn!("Negotiation with {} timed out", peer_id);
                    self.drop_session(&peer_id, "negotiation timed out");
                }
            }
        }
    }

    fn send_message(&mut self, body: String, kind: MessageKind) -> Result<ChatMessage, MeshError> {
        if kind == MessageKind::System {
            return Err(MeshError::InvalidKind);
        }
        if body.len() > MAX_BODY_LEN {
            return Err(MeshError::BodyTooLong(body.len()));
        }

        let message = ChatMessage::new(&self.identity, body, kind);
        let frame = encode_frame(&message)?;

        let mut stalled = Vec::new();
        for (peer_id, session) in &self.sessions {
            if session.state != SessionState::Connected {
                continue;
            }
            if !session.deliver(SessionCommand::Send(frame.clone())) {
                stalled.push(peer_id.clone());
            }
        }
        for peer_id in stalled {
            self.drop_session(&peer_id, "session stalled");
        }

        self.emit(MeshEvent::Message {
            peer_id: self.identity.id.clone(),
            message: message.clone(),
        });
        Ok(message)
    }

    /// Remove a session, fire its events, and close its link in the background
    fn drop_session(&mut self, peer_id: &PeerId, reason: &str) {
        if let Some(link) = self.remove_session(peer_id, reason, true) {
            tokio::spawn(async move { link.close().await });
        }
    }

    /// `negotiation_failed` reports a session that never connected as a
    /// failed negotiation; our own shutdown passes false.
    fn remove_session(
        &mut self,
        peer_id: &PeerId,
        reason: &str,
        negotiation_failed: bool,
    ) -> Option<Arc<dyn Link>> {
        let session = self.sessions.remove(peer_id)?;
        let previous = session.state;
        let peer_name = session.peer_name.clone();
        let link = session.close();

        info!(
            "Peer {} ({}) disconnected: {}",
            peer_id, peer_name, reason
        );
        if negotiation_failed && previous == SessionState::Negotiating {
            self.emit(MeshEvent::NegotiationFailed {
                peer_id: peer_id.clone(),
            });
        }
        self.emit(MeshEvent::PeerDisconnected {
            peer_id: peer_id.clone(),
        });
        if previous == SessionState::Connected {
            self.emit(MeshEvent::Message {
                peer_id: peer_id.clone(),
                message: ChatMessage::peer_left(&peer_name),
            });
        }
        Some(link)
    }

    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.publish(SignalingEnvelope::leave(&self.identity.id, &self.room));

        let peers: Vec<PeerId> = self.sessions.keys().cloned().collect();
        let links: Vec<Arc<dyn Link>> = peers
            .iter()
            .filter_map(|peer_id| self.remove_session(peer_id, "local shutdown", false))
            .collect();
        self.candidates.clear();
        self.outbound = None;

        if tokio::time::timeout(LINK_CLOSE_GRACE, join_all(links.iter().map(|l| l.close())))
            .await
            .is_err()
        {
            warn!("Some links did not close within {:?}", LINK_CLOSE_GRACE);
        }
        info!("Peer {} left room {}", self.identity.id, self.room);
    }

    fn publish(&self, envelope: SignalingEnvelope) {
        let Some(outbound) = &self.outbound else {
            return;
        };
        trace!(
            "Publishing {} to {:?}",
            envelope.kind().as_str(),
            envelope.to
        );
        if outbound.send(envelope).is_err() {
            warn!("Signaling channel for room {} is gone", self.room);
        }
    }

    fn emit(&self, event: MeshEvent) {
        let _ = self.events.send(event);
    }
}
