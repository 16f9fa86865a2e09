//! # Session Coordinator
//!
//! The actor tying the relay, the negotiation engine and the motor link
//! together.
//!
//! All session state (the active operator, the negotiation state and the
//! open data channel) is mutated only inside [`SessionCoordinator::run`].
//! Background tasks observe the open data channel through a
//! [`tokio::sync::watch`] snapshot.

pub mod tasks;

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SafetyConfig;
use crate::control::ControlQueue;
use crate::negotiation::peer::{DataChannelLink, PeerEvent, PeerEventKind};
use crate::negotiation::{EngineAction, NegotiationEngine};
use crate::protocol::datachannel::ControlCommand;
use crate::protocol::signaling::SignalingEnvelope;
use crate::signaling::SignalSink;

/// Snapshot of the open data channel, if any
pub type ChannelWatch = watch::Receiver<Option<Arc<dyn DataChannelLink>>>;

/// Routes traffic between the relay, the negotiation engine and the
/// control queue
pub struct SessionCoordinator {
    engine: NegotiationEngine,
    signaling: Arc<dyn SignalSink>,
    queue: Arc<ControlQueue>,
    channel: watch::Sender<Option<Arc<dyn DataChannelLink>>>,
    stop_on_session_end: bool,
}

impl SessionCoordinator {
    /// # Returns
    ///
    /// The coordinator and a watch on the session's data channel
    pub fn new(
        engine: NegotiationEngine,
        signaling: Arc<dyn SignalSink>,
        queue: Arc<ControlQueue>,
        safety: &SafetyConfig,
    ) -> (Self, ChannelWatch) {
        let (channel, watch) = watch::channel(None);
        let coordinator = Self {
            engine,
            signaling,
            queue,
            channel,
            stop_on_session_end: safety.stop_on_session_end,
        };
        (coordinator, watch)
    }

    /// Process inbound envelopes and peer events until cancelled
    ///
    /// The active session is closed on the way out.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<SignalingEnvelope>,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
        cancel: CancellationToken,
    ) {
        info!("Session coordinator started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                envelope = inbound.recv() => match envelope {
                    Some(envelope) => self.on_envelope(envelope).await,
                    None => {
                        info!("Signaling client gone");
                        break;
                    }
                },

                Some(event) = peer_events.recv() => self.on_peer_event(event).await,
            }
        }

        self.engine.shutdown().await;
        self.channel.send_replace(None);
        info!("Session coordinator stopped");
    }

    async fn on_envelope(&mut self, envelope: SignalingEnvelope) {
        if !envelope.is_rtc() {
            debug!("Ignoring non-rtc envelope of type {:?}", envelope.kind);
            return;
        }

        let actions = self.engine.handle_signal(envelope).await;
        self.apply(actions);
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        if let PeerEventKind::DataChannelMessage(data) = &event.kind {
            if !self.engine.is_current(event.generation) {
                debug!("Dropping message from stale data channel");
                return;
            }
            match ControlCommand::from_json(data) {
                Ok(command) => {
                    debug!("Control command {:?}", command);
                    self.queue.push(command);
                }
                Err(e) => warn!("Dropping malformed data channel message: {}", e),
            }
            return;
        }

        let actions = self.engine.handle_peer_event(event).await;
        self.apply(actions);
    }

    fn apply(&self, actions: Vec<EngineAction>) {
        for action in actions {
            match action {
                EngineAction::Send(envelope) => {
                    if let Err(e) = self.signaling.send(&envelope) {
                        warn!("Failed to queue signaling message: {}", e);
                    }
                }
                EngineAction::DataChannelOpened(dc) => {
                    self.channel.send_replace(Some(dc));
                }
                EngineAction::DataChannelClosed => {
                    self.channel.send_replace(None);
                }
                EngineAction::SessionEnded => {
                    self.channel.send_replace(None);
                    if self.stop_on_session_end {
                        info!("Session ended; stopping motors");
                        self.queue.clear();
                        self.queue.push(ControlCommand::NEUTRAL);
                    }
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::RecordingSink;
    use super::*;
    use crate::identity::PeerId;
    use crate::negotiation::peer::mocks::{MockDataChannel, MockPeerFactory};
    use crate::negotiation::peer::{PeerConnectionState, PeerEventSender};
    use crate::protocol::signaling::{SessionDescription, SignalingPayload};
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    struct Harness {
        inbound: mpsc::UnboundedSender<SignalingEnvelope>,
        peer_events: mpsc::UnboundedSender<PeerEvent>,
        sink: Arc<RecordingSink>,
        queue: Arc<ControlQueue>,
        factory: MockPeerFactory,
        channel: ChannelWatch,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    fn start(stop_on_session_end: bool) -> Harness {
        let factory = MockPeerFactory::new();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let engine = NegotiationEngine::new(Arc::new(factory.clone()), peer_tx.clone());
        let sink = Arc::new(RecordingSink::default());
        let queue = Arc::new(ControlQueue::new());
        let (coordinator, channel) = SessionCoordinator::new(
            engine,
            sink.clone(),
            queue.clone(),
            &SafetyConfig { stop_on_session_end },
        );

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(coordinator.run(inbound_rx, peer_rx, cancel.clone()));

        Harness {
            inbound: inbound_tx,
            peer_events: peer_tx,
            sink,
            queue,
            factory,
            channel,
            cancel,
            task,
        }
    }

    impl Harness {
        fn sender(&self) -> PeerEventSender {
            let generation = self.factory.links().last().expect("no session").generation();
            PeerEventSender::new(generation, self.peer_events.clone())
        }

        async fn offer(&self, from: &str) {
            self.inbound
                .send(SignalingEnvelope {
                    to: None,
                    from: Some(PeerId::new(from)),
                    kind: Some("rtc".to_string()),
                    message: SignalingPayload::Description(SessionDescription::offer("v=0")),
                })
                .unwrap();
            settle().await;
        }

        async fn open_channel(&self) -> MockDataChannel {
            self.open_channel_with_id(1).await
        }

        async fn open_channel_with_id(&self, id: u16) -> MockDataChannel {
            let dc = MockDataChannel::with_id(id);
            self.sender().emit(PeerEventKind::DataChannelOpen(Arc::new(dc.clone())));
            settle().await;
            dc
        }

        async fn stop(self) {
            self.cancel.cancel();
            self.task.await.unwrap();
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_offer_answered_through_signaling() {
        let h = start(true);
        h.offer("op-1").await;

        let sent = h.sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, Some(PeerId::new("op-1")));
        assert!(sent[0].is_rtc());
        h.stop().await;
    }

    #[tokio::test]
    async fn test_non_rtc_envelopes_ignored() {
        let h = start(true);
        h.inbound
            .send(SignalingEnvelope {
                to: None,
                from: Some(PeerId::new("op-1")),
                kind: Some("chat".to_string()),
                message: SignalingPayload::Description(SessionDescription::offer("v=0")),
            })
            .unwrap();
        settle().await;

        assert!(h.factory.links().is_empty());
        assert!(h.sink.sent().is_empty());
        h.stop().await;
    }

    #[tokio::test]
    async fn test_control_messages_reach_queue() {
        let h = start(true);
        h.offer("op-1").await;
        h.open_channel().await;
        assert!(h.channel.borrow().is_some());

        let tx = h.sender();
        tx.emit(PeerEventKind::DataChannelMessage(Bytes::from_static(br#"{"throttle":100,"steering":-20}"#)));
        tx.emit(PeerEventKind::DataChannelMessage(Bytes::from_static(b"garbage")));
        tx.emit(PeerEventKind::DataChannelMessage(Bytes::from_static(br#"{"throttle":120,"steering":-25}"#)));
        settle().await;

        assert_eq!(h.queue.try_pop(), Some(ControlCommand::new(120, -25)), "latest command wins");
        assert_eq!(h.queue.try_pop(), None);
        h.stop().await;
    }

    #[tokio::test]
    async fn test_second_data_channel_stays_published() {
        let h = start(true);
        h.offer("op-1").await;
        let first = h.open_channel_with_id(1).await;
        let second = h.open_channel_with_id(3).await;
        assert!(first.is_closed());

        h.sender().emit(PeerEventKind::DataChannelClosed(1));
        settle().await;

        let published = h.channel.borrow().clone();
        assert_eq!(published.map(|dc| dc.id()), Some(3));
        assert!(!second.is_closed());
        h.stop().await;
    }

    #[tokio::test]
    async fn test_stale_data_channel_messages_dropped() {
        let h = start(true);
        h.offer("op-1").await;
        let stale = h.sender();
        h.offer("op-2").await;
        h.queue.clear();

        stale.emit(PeerEventKind::DataChannelMessage(Bytes::from_static(br#"{"throttle":1,"steering":1}"#)));
        settle().await;

        assert_eq!(h.queue.try_pop(), None);
        h.stop().await;
    }

    #[tokio::test]
    async fn test_failure_stops_motors_and_notifies_operator() {
        let h = start(true);
        h.offer("op-1").await;
        h.open_channel().await;
        h.queue.push(ControlCommand::new(500, 0));

        h.sender().emit(PeerEventKind::ConnectionState(PeerConnectionState::Failed));
        settle().await;

        let sent = h.sink.sent();
        assert_eq!(sent.last(), Some(&SignalingEnvelope::failure(PeerId::new("op-1"))));
        assert_eq!(h.queue.try_pop(), Some(ControlCommand::NEUTRAL));
        assert!(h.channel.borrow().is_none());
        h.stop().await;
    }

    #[tokio::test]
    async fn test_session_end_without_stop_keeps_queue() {
        let h = start(false);
        h.offer("op-1").await;
        h.queue.push(ControlCommand::new(500, 0));

        h.sender().emit(PeerEventKind::ConnectionState(PeerConnectionState::Closed));
        settle().await;

        assert_eq!(h.queue.try_pop(), Some(ControlCommand::new(500, 0)));
        h.stop().await;
    }

    #[tokio::test]
    async fn test_cancel_closes_session() {
        let h = start(true);
        h.offer("op-1").await;
        let dc = h.open_channel().await;
        let factory = h.factory.clone();
        let channel = h.channel.clone();

        h.stop().await;
        assert!(factory.links()[0].is_closed());
        assert!(dc.is_closed());
        assert!(channel.borrow().is_none());
    }
}
