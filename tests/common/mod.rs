//! Shared fixtures for mesh tests: a scripted link factory and a fake peer
//! that speaks raw signaling.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use shoal::link::{
    IceCandidate, Link, LinkError, LinkEvent, LinkFactory, LinkHandle, LinkState,
    SessionDescription,
};
use shoal::signaling::{
    LocalSignaling, SignalKind, SignalingChannel, SignalingEnvelope, SignalingSubscription,
};
use shoal::mesh::SessionSnapshot;
use shoal::{Identity, MeshEvent, MeshManager, PeerId, RoomName};
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Script {
    fail_sends: bool,
    hang_sends: bool,
    sent: Vec<Bytes>,
    candidates: Vec<IceCandidate>,
    applied_offer: Option<SessionDescription>,
    applied_answer: Option<SessionDescription>,
    closed: bool,
}

/// A link the test drives by hand
pub struct ScriptedLink {
    pub local: PeerId,
    pub remote: PeerId,
    events: mpsc::UnboundedSender<LinkEvent>,
    script: Mutex<Script>,
}

impl ScriptedLink {
    pub fn report(&self, state: LinkState) {
        let _ = self.events.send(LinkEvent::StateChanged(state));
    }

    pub fn connect(&self) {
        self.report(LinkState::Connected);
    }

    pub fn deliver(&self, frame: impl Into<Bytes>) {
        let _ = self.events.send(LinkEvent::Message(frame.into()));
    }

    pub fn emit_candidate(&self, candidate: IceCandidate) {
        let _ = self.events.send(LinkEvent::LocalCandidate(candidate));
    }

    pub fn fail_sends(&self) {
        self.script.lock().fail_sends = true;
    }

    /// Every later `send` waits forever
    pub fn hang_sends(&self) {
        self.script.lock().hang_sends = true;
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.script.lock().sent.clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.script.lock().candidates.clone()
    }

    pub fn applied_offer(&self) -> Option<SessionDescription> {
        self.script.lock().applied_offer.clone()
    }

    pub fn applied_answer(&self) -> Option<SessionDescription> {
        self.script.lock().applied_answer.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.script.lock().closed
    }
}

#[async_trait]
impl Link for ScriptedLink {
    async fn create_offer(&self) -> Result<SessionDescription, LinkError> {
        Ok(SessionDescription::offer(format!("offer-to-{}", self.remote)))
    }

    async fn apply_offer(&self, offer: SessionDescription) -> Result<(), LinkError> {
        self.script.lock().applied_offer = Some(offer);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, LinkError> {
        Ok(SessionDescription::answer(format!("answer-to-{}", self.remote)))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), LinkError> {
        self.script.lock().applied_answer = Some(answer);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), LinkError> {
        self.script.lock().candidates.push(candidate);
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> Result<(), LinkError> {
        let hang = self.script.lock().hang_sends;
        if hang {
            std::future::pending::<()>().await;
        }
        let mut script = self.script.lock();
        if script.fail_sends {
            return Err(LinkError::Transport("scripted send failure".to_string()));
        }
        script.sent.push(frame);
        Ok(())
    }

    async fn close(&self) {
        self.script.lock().closed = true;
    }
}

/// Link factory that keeps every link it hands out
#[derive(Clone, Default)]
pub struct ScriptedLinks {
    links: Arc<Mutex<Vec<Arc<ScriptedLink>>>>,
}

impl ScriptedLinks {
    pub fn created(&self) -> usize {
        self.links.lock().len()
    }

    /// Most recent link opened toward `remote`
    pub fn link_to(&self, remote: &PeerId) -> Option<Arc<ScriptedLink>> {
        self.links
            .lock()
            .iter()
            .rev()
            .find(|l| &l.remote == remote)
            .cloned()
    }
}

impl LinkFactory for ScriptedLinks {
    fn create_link(&self, local: &PeerId, remote: &PeerId) -> Result<LinkHandle, LinkError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(ScriptedLink {
            local: local.clone(),
            remote: remote.clone(),
            events: tx,
            script: Mutex::new(Script::default()),
        });
        self.links.lock().push(link.clone());
        Ok(LinkHandle { link, events: rx })
    }
}

/// A remote participant that only speaks signaling
pub struct FakePeer {
    pub identity: Identity,
    pub room: RoomName,
    subscription: SignalingSubscription,
}

impl FakePeer {
    pub async fn subscribe(
        signaling: &LocalSignaling,
        id: &str,
        name: &str,
        room: &RoomName,
    ) -> Self {
        let identity = Identity::with_id(PeerId::from(id), name);
        let subscription = signaling.subscribe(room, &identity.id).await.unwrap();
        Self {
            identity,
            room: room.clone(),
            subscription,
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.identity.id
    }

    pub fn publish(&self, envelope: SignalingEnvelope) {
        self.subscription.outbound.send(envelope).unwrap();
    }

    pub fn join(&self) {
        self.publish(SignalingEnvelope::join(&self.identity, &self.room));
    }

    pub fn leave(&self) {
        self.publish(SignalingEnvelope::leave(self.id(), &self.room));
    }

    pub fn offer(&self, to: &PeerId) {
        self.publish(SignalingEnvelope::offer(
            &self.identity,
            to,
            &self.room,
            SessionDescription::offer(format!("offer-from-{}", self.id())),
        ));
    }

    pub fn answer(&self, to: &PeerId) {
        self.publish(SignalingEnvelope::answer(
            self.id(),
            to,
            &self.room,
            SessionDescription::answer(format!("answer-from-{}", self.id())),
        ));
    }

    pub fn candidate(&self, to: &PeerId, candidate: &str) {
        self.publish(SignalingEnvelope::candidate(
            self.id(),
            to,
            &self.room,
            IceCandidate::new(candidate),
        ));
    }

    /// Next envelope of `kind`, skipping anything else
    pub async fn expect(&mut self, kind: SignalKind) -> SignalingEnvelope {
        tokio::time::timeout(WAIT, async {
            loop {
                let envelope = self
                    .subscription
                    .inbound
                    .recv()
                    .await
                    .expect("signaling closed");
                if envelope.kind() == kind {
                    return envelope;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}", kind))
    }
}

/// The very next event
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<MeshEvent>) -> MeshEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Next event matching `pred`, skipping anything else
pub async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<MeshEvent>, pred: F) -> MeshEvent
where
    F: Fn(&MeshEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Give spawned tasks a chance to run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Everything currently queued
pub fn drain(events: &mut mpsc::UnboundedReceiver<MeshEvent>) -> Vec<MeshEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Poll `check` until it holds
pub async fn until(what: &str, check: impl Fn() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {}", what);
}

/// Poll the mesh until it holds exactly `count` sessions
pub async fn wait_sessions(mesh: &MeshManager, count: usize) -> Vec<SessionSnapshot> {
    for _ in 0..250 {
        let sessions = mesh.sessions().await.expect("mesh closed");
        if sessions.len() == count {
            return sessions;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("mesh never reached {} sessions", count);
}
