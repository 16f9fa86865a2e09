//! Peer connection seam and the events it reports back
//!
//! Callbacks of a live peer connection never touch session state. They only
//! enqueue a [`PeerEvent`] tagged with the generation of the connection that
//! raised it, so the engine can drop anything coming from a connection it
//! already replaced.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::signaling::{IceCandidate, SessionDescription};

/// Monotonic id of one negotiation attempt
pub type Generation = u64;

/// Transport-level state of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Something a peer connection reported
#[derive(Clone)]
pub enum PeerEventKind {
    /// Remote description committed and answer created
    AnswerCreated(SessionDescription),
    /// Local answer committed; ready to go out
    LocalDescriptionSet(SessionDescription),
    /// A local step of the offer/answer exchange failed
    NegotiationFailed(String),
    LocalCandidate(IceCandidate),
    GatheringComplete,
    ConnectionState(PeerConnectionState),
    RenegotiationNeeded,
    DataChannelOpen(Arc<dyn DataChannelLink>),
    DataChannelMessage(Bytes),
    /// The data channel with this stream id closed
    DataChannelClosed(u16),
}

impl fmt::Debug for PeerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnswerCreated(_) => f.write_str("AnswerCreated"),
            Self::LocalDescriptionSet(_) => f.write_str("LocalDescriptionSet"),
            Self::NegotiationFailed(reason) => write!(f, "NegotiationFailed({})", reason),
            Self::LocalCandidate(c) => write!(f, "LocalCandidate({})", c.candidate),
            Self::GatheringComplete => f.write_str("GatheringComplete"),
            Self::ConnectionState(s) => write!(f, "ConnectionState({:?})", s),
            Self::RenegotiationNeeded => f.write_str("RenegotiationNeeded"),
            Self::DataChannelOpen(dc) => write!(f, "DataChannelOpen({})", dc.label()),
            Self::DataChannelMessage(data) => write!(f, "DataChannelMessage({} bytes)", data.len()),
            Self::DataChannelClosed(id) => write!(f, "DataChannelClosed({})", id),
        }
    }
}

/// Event plus the generation of the connection that raised it
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub generation: Generation,
    pub kind: PeerEventKind,
}

/// Handed to a new peer connection so its callbacks can report back
#[derive(Debug, Clone)]
pub struct PeerEventSender {
    generation: Generation,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSender {
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Enqueue an event; silently dropped once the engine is gone
    pub fn emit(&self, kind: PeerEventKind) {
        let _ = self.tx.send(PeerEvent {
            generation: self.generation,
            kind,
        });
    }
}

/// One peer connection
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Commit the operator's offer as remote description
    async fn set_remote_offer(&self, sdp: &str) -> Result<()>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Commit our answer as local description; starts ICE gathering
    async fn set_local_answer(&self, answer: &SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates peer connections with the local media attached
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, events: PeerEventSender) -> Result<Arc<dyn PeerLink>>;
}

/// Open data channel of the active session
#[async_trait]
pub trait DataChannelLink: Send + Sync {
    /// Stream id, unique among the channels of one peer connection
    fn id(&self) -> u16;

    fn label(&self) -> String;

    async fn send_text(&self, text: String) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Run the offer/answer exchange for one connection, reporting each step
///
/// Meant to be spawned; the engine learns the outcome through `events`.
pub async fn answer_offer(link: Arc<dyn PeerLink>, offer_sdp: String, events: PeerEventSender) {
    let outcome = async {
        link.set_remote_offer(&offer_sdp).await?;
        let answer = link.create_answer().await?;
        events.emit(PeerEventKind::AnswerCreated(answer.clone()));
        link.set_local_answer(&answer).await?;
        Ok::<_, crate::error::AgentError>(answer)
    }
    .await;

    match outcome {
        Ok(answer) => events.emit(PeerEventKind::LocalDescriptionSet(answer)),
        Err(e) => events.emit(PeerEventKind::NegotiationFailed(e.to_string())),
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::{FailStep, MockPeerFactory};
    use super::*;

    async fn run_exchange(factory: &MockPeerFactory) -> Vec<PeerEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = PeerEventSender::new(7, tx);
        let link = factory.create(sender.clone()).await.unwrap();

        answer_offer(link, "offer-sdp".to_string(), sender).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_answer_offer_reports_each_step() {
        let factory = MockPeerFactory::new();
        let events = run_exchange(&factory).await;

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.generation == 7));
        assert!(matches!(events[0].kind, PeerEventKind::AnswerCreated(_)));
        match &events[1].kind {
            PeerEventKind::LocalDescriptionSet(answer) => assert_eq!(answer.sdp, "answer-to-offer-sdp"),
            other => panic!("Expected LocalDescriptionSet, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_answer_offer_reports_failure() {
        let factory = MockPeerFactory::new();
        factory.fail_at(Some(FailStep::SetRemote));
        let events = run_exchange(&factory).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, PeerEventKind::NegotiationFailed(_)));
    }

    #[tokio::test]
    async fn test_failure_after_answer_created() {
        let factory = MockPeerFactory::new();
        factory.fail_at(Some(FailStep::SetLocal));
        let events = run_exchange(&factory).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].kind, PeerEventKind::AnswerCreated(_)));
        assert!(matches!(events[1].kind, PeerEventKind::NegotiationFailed(_)));
    }
}
