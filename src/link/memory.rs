use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    IceCandidate, Link, LinkError, LinkEvent, LinkFactory, LinkHandle, LinkState, SdpType,
    SessionDescription,
};
use crate::signaling::PeerId;

const TOKEN_PREFIX: &str = "memory:";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Offered,
    OfferApplied { offerer: String },
    Answered { offerer: String },
    Connected,
    Closed,
}

struct EndpointState {
    phase: Phase,
    peer: Option<Weak<Endpoint>>,
}

struct Endpoint {
    token: String,
    events: mpsc::UnboundedSender<LinkEvent>,
    state: Mutex<EndpointState>,
}

impl Endpoint {
    fn emit(&self, event: LinkEvent) {
        let _ = self.events.send(event);
    }

    fn local_candidate(&self) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{} 1 memory 1 {} typ host", self.token, self.token),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }
}

/// In-process link factory.
///
/// Links created from the same network (or its clones) can reach each other;
/// descriptors carry the endpoint token the other side looks up.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<Mutex<HashMap<String, Weak<Endpoint>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of endpoints still open
    pub fn open_links(&self) -> usize {
        self.endpoints
            .lock()
            .values()
            .filter(|e| e.strong_count() > 0)
            .count()
    }

    fn lookup(&self, token: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.lock().get(token).and_then(Weak::upgrade)
    }

    fn forget(&self, token: &str) {
        self.endpoints.lock().remove(token);
    }
}

impl LinkFactory for MemoryNetwork {
    fn create_link(&self, local: &PeerId, remote: &PeerId) -> Result<LinkHandle, LinkError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = format!("{:016x}", rand::rng().random::<u64>());

        let endpoint = Arc::new(Endpoint {
            token: token.clone(),
            events: tx,
            state: Mutex::new(EndpointState {
                phase: Phase::Idle,
                peer: None,
            }),
        });

        {
            let mut endpoints = self.endpoints.lock();
            endpoints.retain(|_, e| e.strong_count() > 0);
            endpoints.insert(token.clone(), Arc::downgrade(&endpoint));
        }
        debug!("Memory link {} created for {} -> {}", token, local, remote);

        Ok(LinkHandle {
            link: Arc::new(MemoryLink {
                endpoint,
                network: self.clone(),
            }),
            events: rx,
        })
    }
}

/// One end of an in-process link
pub struct MemoryLink {
    endpoint: Arc<Endpoint>,
    network: MemoryNetwork,
}

impl MemoryLink {
    fn token_of(description: &SessionDescription, expected: SdpType) -> Result<String, LinkError> {
        if description.sdp_type != expected {
            return Err(LinkError::Negotiation(format!(
                "expected {:?} descriptor, got {:?}",
                expected, description.sdp_type
            )));
        }
        description
            .sdp
            .strip_prefix(TOKEN_PREFIX)
            .map(str::to_string)
            .ok_or_else(|| LinkError::Negotiation("descriptor is not a memory endpoint".to_string()))
    }

    fn advance(&self, from: &Phase, to: Phase) -> Result<(), LinkError> {
        let mut state = self.endpoint.state.lock();
        if state.phase == Phase::Closed {
            return Err(LinkError::Closed);
        }
        if &state.phase != from {
            return Err(LinkError::Negotiation(format!(
                "unexpected step in phase {:?}",
                state.phase
            )));
        }
        state.phase = to;
        Ok(())
    }
}

#[async_trait]
impl Link for MemoryLink {
    async fn create_offer(&self) -> Result<SessionDescription, LinkError> {
        self.advance(&Phase::Idle, Phase::Offered)?;
        self.endpoint.emit(LinkEvent::StateChanged(LinkState::Connecting));
        self.endpoint
            .emit(LinkEvent::LocalCandidate(self.endpoint.local_candidate()));
        Ok(SessionDescription::offer(format!(
            "{}{}",
            TOKEN_PREFIX, self.endpoint.token
        )))
    }

    async fn apply_offer(&self, offer: SessionDescription) -> Result<(), LinkError> {
        let offerer = Self::token_of(&offer, SdpType::Offer)?;
        self.advance(&Phase::Idle, Phase::OfferApplied { offerer })
    }

    async fn create_answer(&self) -> Result<SessionDescription, LinkError> {
        let offerer = match &self.endpoint.state.lock().phase {
            Phase::OfferApplied { offerer } => offerer.clone(),
            Phase::Closed => return Err(LinkError::Closed),
            other => {
                return Err(LinkError::Negotiation(format!(
                    "cannot answer in phase {:?}",
                    other
                )));
            }
        };
        self.advance(
            &Phase::OfferApplied {
                offerer: offerer.clone(),
            },
            Phase::Answered { offerer },
        )?;
        self.endpoint.emit(LinkEvent::StateChanged(LinkState::Connecting));
        self.endpoint
            .emit(LinkEvent::LocalCandidate(self.endpoint.local_candidate()));
        Ok(SessionDescription::answer(format!(
            "{}{}",
            TOKEN_PREFIX, self.endpoint.token
        )))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), LinkError> {
        let answerer_token = Self::token_of(&answer, SdpType::Answer)?;
        match self.endpoint.state.lock().phase {
            Phase::Offered => {}
            Phase::Closed => return Err(LinkError::Closed),
            ref other => {
                return Err(LinkError::Negotiation(format!(
                    "cannot apply answer in phase {:?}",
                    other
                )));
            }
        }
        let answerer = self
            .network
            .lookup(&answerer_token)
            .ok_or_else(|| LinkError::Negotiation("answering endpoint is gone".to_string()))?;

        {
            let mut remote = answerer.state.lock();
            let answered_us = matches!(
                &remote.phase,
                Phase::Answered { offerer } if *offerer == self.endpoint.token
            );
            if !answered_us {
                return Err(LinkError::Negotiation(format!(
                    "answering endpoint in phase {:?}",
                    remote.phase
                )));
            }
            remote.phase = Phase::Connected;
            remote.peer = Some(Arc::downgrade(&self.endpoint));
        }
        {
            let mut state = self.endpoint.state.lock();
            if state.phase != Phase::Offered {
                return Err(LinkError::Negotiation(format!(
                    "cannot apply answer in phase {:?}",
                    state.phase
                )));
            }
            state.phase = Phase::Connected;
            state.peer = Some(Arc::downgrade(&answerer));
        }

        debug!(
            "Memory link {} connected to {}",
            self.endpoint.token, answerer.token
        );
        self.endpoint.emit(LinkEvent::StateChanged(LinkState::Connected));
        answerer.emit(LinkEvent::StateChanged(LinkState::Connected));
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), LinkError> {
        if self.endpoint.state.lock().phase == Phase::Closed {
            return Err(LinkError::Closed);
        }
        // in-process endpoints need no connectivity checks
        debug!(
            "Memory link {} ignoring remote candidate {}",
            self.endpoint.token, candidate.candidate
        );
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> Result<(), LinkError> {
        let peer = {
            let state = self.endpoint.state.lock();
            match state.phase {
                Phase::Connected => state.peer.as_ref().and_then(Weak::upgrade),
                Phase::Closed => return Err(LinkError::Closed),
                _ => return Err(LinkError::NotConnected),
            }
        };
        let peer = peer.ok_or(LinkError::Closed)?;
        peer.events
            .send(LinkEvent::Message(frame))
            .map_err(|_| LinkError::Closed)
    }

    async fn close(&self) {
        let peer = {
            let mut state = self.endpoint.state.lock();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Closed;
            state.peer.take().and_then(|p| p.upgrade())
        };
        self.network.forget(&self.endpoint.token);
        debug!("Memory link {} closed", self.endpoint.token);

        if let Some(peer) = peer {
            let notify = {
                let mut state = peer.state.lock();
                if state.phase == Phase::Closed {
                    false
                } else {
                    state.phase = Phase::Closed;
                    state.peer = None;
                    true
                }
            };
            if notify {
                self.network.forget(&peer.token);
                peer.emit(LinkEvent::StateChanged(LinkState::Closed));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(network: &MemoryNetwork) -> (LinkHandle, LinkHandle) {
        let a = PeerId::from("peer_a");
        let b = PeerId::from("peer_b");
        (
            network.create_link(&a, &b).unwrap(),
            network.create_link(&b, &a).unwrap(),
        )
    }

    async fn connect(offerer: &LinkHandle, answerer: &LinkHandle) {
        let offer = offerer.link.create_offer().await.unwrap();
        answerer.link.apply_offer(offer).await.unwrap();
        let answer = answerer.link.create_answer().await.unwrap();
        offerer.link.apply_answer(answer).await.unwrap();
    }

    fn drain(handle: &mut LinkHandle) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = handle.events.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn negotiation_connects_both_ends() {
        let network = MemoryNetwork::new();
        let (mut a, mut b) = pair(&network);
        connect(&a, &b).await;

        let a_events = drain(&mut a);
        let b_events = drain(&mut b);
        assert!(a_events.contains(&LinkEvent::StateChanged(LinkState::Connected)));
        assert!(b_events.contains(&LinkEvent::StateChanged(LinkState::Connected)));
        assert!(a_events
            .iter()
            .any(|e| matches!(e, LinkEvent::LocalCandidate(_))));
    }

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let network = MemoryNetwork::new();
        let (a, mut b) = pair(&network);
        connect(&a, &b).await;
        drain(&mut b);

        for i in 0..5u8 {
            a.link.send(Bytes::from(vec![i])).await.unwrap();
        }
        let received: Vec<Bytes> = drain(&mut b)
            .into_iter()
            .filter_map(|e| match e {
                LinkEvent::Message(bytes) => Some(bytes),
                _ => None,
            })
            .collect();
        assert_eq!(received, (0..5u8).map(|i| Bytes::from(vec![i])).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn send_before_connect_fails() {
        let network = MemoryNetwork::new();
        let (a, _b) = pair(&network);
        a.link.create_offer().await.unwrap();
        assert!(matches!(
            a.link.send(Bytes::from_static(b"x")).await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn close_notifies_remote_and_is_idempotent() {
        let network = MemoryNetwork::new();
        let (a, mut b) = pair(&network);
        connect(&a, &b).await;
        drain(&mut b);

        a.link.close().await;
        a.link.close().await;

        assert_eq!(drain(&mut b), vec![LinkEvent::StateChanged(LinkState::Closed)]);
        assert!(matches!(
            b.link.send(Bytes::from_static(b"x")).await,
            Err(LinkError::Closed)
        ));
        assert!(matches!(
            a.link.send(Bytes::from_static(b"x")).await,
            Err(LinkError::Closed)
        ));
        assert_eq!(network.open_links(), 0);
    }

    #[tokio::test]
    async fn answer_for_unknown_endpoint_fails() {
        let network = MemoryNetwork::new();
        let (a, _b) = pair(&network);
        a.link.create_offer().await.unwrap();
        let result = a
            .link
            .apply_answer(SessionDescription::answer("memory:ffffffffffffffff"))
            .await;
        assert!(matches!(result, Err(LinkError::Negotiation(_))));
    }

    #[tokio::test]
    async fn offer_descriptor_type_is_checked() {
        let network = MemoryNetwork::new();
        let (_a, b) = pair(&network);
        let result = b
            .link
            .apply_offer(SessionDescription::answer("memory:0000000000000000"))
            .await;
        assert!(matches!(result, Err(LinkError::Negotiation(_))));
    }
}
