//! # Negotiation Engine
//!
//! Peer connection lifecycle and the offer/answer/ICE state machine.
//!
//! The engine is owned by a single task. It is driven by two inputs:
//! - `rtc` envelopes from the signaling relay ([`NegotiationEngine::handle_signal`])
//! - [`PeerEvent`]s raised by peer connections ([`NegotiationEngine::handle_peer_event`])
//!
//! and answers each with a list of [`EngineAction`]s for the caller to carry
//! out. At most one session exists at a time; a new offer tears down the
//! active one. Every connection gets a fresh [`Generation`] and events from
//! older generations are ignored.
//!
//! ## States
//!
//! ```text
//! Idle -> OfferReceived -> AnswerCreated -> LocalDescriptionSet -> IceGathering -> Connected
//!                \______________________________________________________________/
//!                                      Failed / Closed -> Idle
//! ```

pub mod peer;
pub mod rtc;

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::identity::PeerId;
use crate::protocol::signaling::{
    IceCandidate, SdpType, SessionDescription, SignalingEnvelope, SignalingPayload,
};
use peer::{
    answer_offer, DataChannelLink, Generation, PeerConnectionState, PeerEvent, PeerEventKind,
    PeerEventSender, PeerFactory, PeerLink,
};

/// Negotiation progress of the active session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferReceived,
    AnswerCreated,
    LocalDescriptionSet,
    IceGathering,
    Connected,
    Failed,
    Closed,
}

/// Side effect requested by the engine
#[derive(Clone)]
pub enum EngineAction {
    /// Deliver an envelope to the relay
    Send(SignalingEnvelope),
    /// The session's data channel is ready
    DataChannelOpened(Arc<dyn DataChannelLink>),
    /// The session's data channel went away; the session may continue
    DataChannelClosed,
    /// The session is gone (failed, closed or replaced)
    SessionEnded,
}

impl fmt::Debug for EngineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send(envelope) => f.debug_tuple("Send").field(envelope).finish(),
            Self::DataChannelOpened(dc) => write!(f, "DataChannelOpened({})", dc.label()),
            Self::DataChannelClosed => f.write_str("DataChannelClosed"),
            Self::SessionEnded => f.write_str("SessionEnded"),
        }
    }
}

struct ActiveSession {
    peer: PeerId,
    generation: Generation,
    state: NegotiationState,
    link: Arc<dyn PeerLink>,
    data_channel: Option<Arc<dyn DataChannelLink>>,
    /// Remote candidates that arrived before the offer was committed
    pending_remote: Vec<IceCandidate>,
    /// Local candidates gathered before the answer went out
    pending_local: Vec<IceCandidate>,
    answered: bool,
}

impl ActiveSession {
    fn transition(&mut self, next: NegotiationState) {
        debug!(
            "Session {} (gen {}): {:?} -> {:?}",
            self.peer, self.generation, self.state, next
        );
        self.state = next;
    }
}

/// Single-session negotiation state machine
pub struct NegotiationEngine {
    factory: Arc<dyn PeerFactory>,
    events: mpsc::UnboundedSender<PeerEvent>,
    last_generation: Generation,
    active: Option<ActiveSession>,
}

impl NegotiationEngine {
    /// Create an idle engine
    ///
    /// # Arguments
    ///
    /// * `factory` - Creates the peer connection for each accepted offer
    /// * `events` - Where peer connections report; the caller feeds the
    ///   receiving end back into [`handle_peer_event`](Self::handle_peer_event)
    pub fn new(factory: Arc<dyn PeerFactory>, events: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            factory,
            events,
            last_generation: 0,
            active: None,
        }
    }

    /// Current state; `Idle` without a session
    pub fn state(&self) -> NegotiationState {
        self.active.as_ref().map_or(NegotiationState::Idle, |s| s.state)
    }

    /// Operator of the active session
    pub fn active_peer(&self) -> Option<&PeerId> {
        self.active.as_ref().map(|s| &s.peer)
    }

    /// Generation of the active session
    pub fn active_generation(&self) -> Option<Generation> {
        self.active.as_ref().map(|s| s.generation)
    }

    /// Whether `generation` belongs to the active session
    pub fn is_current(&self, generation: Generation) -> bool {
        self.active_generation() == Some(generation)
    }

    /// React to an `rtc` envelope from the relay
    pub async fn handle_signal(&mut self, envelope: SignalingEnvelope) -> Vec<EngineAction> {
        match envelope.message {
            SignalingPayload::Description(SessionDescription {
                sdp_type: SdpType::Offer,
                sdp,
            }) => match envelope.from {
                Some(peer) => self.accept_offer(peer, sdp).await,
                None => {
                    warn!("Dropping offer without sender");
                    Vec::new()
                }
            },
            SignalingPayload::Description(SessionDescription {
                sdp_type: SdpType::Answer,
                ..
            }) => {
                warn!("Ignoring unexpected answer from {:?}", envelope.from);
                Vec::new()
            }
            SignalingPayload::Candidate(candidate) => {
                self.add_remote_candidate(candidate).await;
                Vec::new()
            }
            SignalingPayload::Notice(notice) => {
                info!("Notice from {:?}: {}", envelope.from, notice);
                Vec::new()
            }
        }
    }

    /// React to an event raised by a peer connection
    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> Vec<EngineAction> {
        if !self.is_current(event.generation) {
            debug!("Ignoring {:?} from stale generation {}", event.kind, event.generation);
            if let PeerEventKind::DataChannelOpen(dc) = event.kind {
                if let Err(e) = dc.close().await {
                    debug!("Failed to close stale data channel: {}", e);
                }
            }
            return Vec::new();
        }

        let mut actions = Vec::new();

        match event.kind {
            PeerEventKind::AnswerCreated(_) => {
                let Some(session) = self.active.as_mut() else { return actions };
                session.transition(NegotiationState::AnswerCreated);

                for candidate in std::mem::take(&mut session.pending_remote) {
                    if let Err(e) = session.link.add_ice_candidate(candidate).await {
                        warn!("Failed to add held remote candidate: {}", e);
                    }
                }
            }

            PeerEventKind::LocalDescriptionSet(answer) => {
                let Some(session) = self.active.as_mut() else { return actions };
                session.transition(NegotiationState::LocalDescriptionSet);

                info!("Sending answer to {}", session.peer);
                actions.push(EngineAction::Send(SignalingEnvelope::answer(
                    session.peer.clone(),
                    answer.sdp,
                )));
                session.answered = true;

                for candidate in std::mem::take(&mut session.pending_local) {
                    actions.push(EngineAction::Send(SignalingEnvelope::candidate(
                        session.peer.clone(),
                        candidate,
                    )));
                }
                session.transition(NegotiationState::IceGathering);
            }

            PeerEventKind::NegotiationFailed(reason) => {
                error!("Negotiation failed: {}", reason);
                actions.extend(self.end_session(NegotiationState::Failed).await);
            }

            PeerEventKind::LocalCandidate(candidate) => {
                let Some(session) = self.active.as_mut() else { return actions };
                if session.answered {
                    debug!("Trickling local candidate {}", candidate.candidate);
                    actions.push(EngineAction::Send(SignalingEnvelope::candidate(
                        session.peer.clone(),
                        candidate,
                    )));
                } else {
                    session.pending_local.push(candidate);
                }
            }

            PeerEventKind::GatheringComplete => {
                info!("ICE gathering complete");
            }

            PeerEventKind::ConnectionState(state) => match state {
                PeerConnectionState::Connected => {
                    if let Some(session) = self.active.as_mut() {
                        info!("Peer {} connected", session.peer);
                        session.transition(NegotiationState::Connected);
                    }
                }
                PeerConnectionState::Disconnected => {
                    warn!("Peer connection disconnected; waiting for ICE to recover");
                }
                PeerConnectionState::Failed => {
                    error!("Peer connection failed");
                    actions.extend(self.end_session(NegotiationState::Failed).await);
                }
                PeerConnectionState::Closed => {
                    info!("Peer connection closed");
                    actions.extend(self.end_session(NegotiationState::Closed).await);
                }
                PeerConnectionState::New | PeerConnectionState::Connecting => {
                    debug!("Peer connection state {:?}", state);
                }
            },

            PeerEventKind::RenegotiationNeeded => {
                info!("Renegotiation needed; waiting for a new offer from the operator");
            }

            PeerEventKind::DataChannelOpen(dc) => {
                let Some(session) = self.active.as_mut() else { return actions };
                info!("Data channel '{}' open", dc.label());
                if let Some(previous) = session.data_channel.replace(dc.clone()) {
                    if let Err(e) = previous.close().await {
                        debug!("Failed to close replaced data channel: {}", e);
                    }
                }
                actions.push(EngineAction::DataChannelOpened(dc));
            }

            PeerEventKind::DataChannelClosed(id) => {
                let Some(session) = self.active.as_mut() else { return actions };
                // A replaced channel reports its close after the new one opened
                if session.data_channel.as_ref().is_some_and(|dc| dc.id() == id) {
                    session.data_channel = None;
                    info!("Data channel closed");
                    actions.push(EngineAction::DataChannelClosed);
                } else {
                    debug!("Ignoring close of data channel {}", id);
                }
            }

            // Routed by the caller
            PeerEventKind::DataChannelMessage(_) => {}
        }

        actions
    }

    /// Close the active session, if any, without notifying the operator
    pub async fn shutdown(&mut self) {
        if let Some(session) = self.active.take() {
            info!("Closing session with {}", session.peer);
            close_session(session).await;
        }
    }

    async fn accept_offer(&mut self, peer: PeerId, sdp: String) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        if let Some(previous) = self.active.take() {
            info!("Offer from {} replaces session with {}", peer, previous.peer);
            close_session(previous).await;
            actions.push(EngineAction::SessionEnded);
        }

        self.last_generation += 1;
        let generation = self.last_generation;
        let events = PeerEventSender::new(generation, self.events.clone());

        let link = match self.factory.create(events.clone()).await {
            Ok(link) => link,
            Err(e) => {
                error!("Failed to create peer connection for {}: {}", peer, e);
                actions.push(EngineAction::Send(SignalingEnvelope::failure(peer)));
                return actions;
            }
        };

        info!("Accepted offer from {} (gen {})", peer, generation);
        self.active = Some(ActiveSession {
            peer,
            generation,
            state: NegotiationState::OfferReceived,
            link: link.clone(),
            data_channel: None,
            pending_remote: Vec::new(),
            pending_local: Vec::new(),
            answered: false,
        });

        tokio::spawn(answer_offer(link, sdp, events));
        actions
    }

    async fn add_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(session) = self.active.as_mut() else {
            debug!("Dropping remote candidate without an active session");
            return;
        };

        if session.state == NegotiationState::OfferReceived {
            session.pending_remote.push(candidate);
            return;
        }

        if let Err(e) = session.link.add_ice_candidate(candidate).await {
            warn!("Failed to add remote candidate: {}", e);
        }
    }

    /// Tear down the active session; a failure notifies the operator once
    async fn end_session(&mut self, outcome: NegotiationState) -> Vec<EngineAction> {
        let Some(mut session) = self.active.take() else {
            return Vec::new();
        };
        session.transition(outcome);

        let mut actions = Vec::new();
        if outcome == NegotiationState::Failed {
            actions.push(EngineAction::Send(SignalingEnvelope::failure(session.peer.clone())));
        }
        close_session(session).await;
        actions.push(EngineAction::SessionEnded);
        actions
    }
}

async fn close_session(session: ActiveSession) {
    if let Some(dc) = session.data_channel {
        if let Err(e) = dc.close().await {
            debug!("Failed to close data channel: {}", e);
        }
    }
    if let Err(e) = session.link.close().await {
        warn!("Failed to close peer connection: {}", e);
    }
}
