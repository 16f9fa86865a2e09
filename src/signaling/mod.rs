//! # Signaling Client
//!
//! Keeps the robot registered on the signaling relay and moves envelopes in
//! both directions.
//!
//! This module handles:
//! - Connecting with the device identity in the URL (`?id=<uuid>`)
//! - Reconnecting forever after a fixed delay, with the same identity
//! - Delivering inbound envelopes one at a time, in receipt order
//! - Queueing outbound envelopes while disconnected and replaying them in
//!   order once the socket is back
//!
//! Outbound traffic uses an unbounded FIFO: nothing the coordinator sends is
//! dropped or reordered by an outage. An envelope whose socket write failed
//! is carried over and goes out first on the next connection.

pub mod transport;

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::identity::DeviceIdentity;
use crate::protocol::signaling::SignalingEnvelope;
use transport::{SignalingConnector, SignalingSink, SignalingStream};

/// Anything that can carry envelopes to the relay
pub trait SignalSink: Send + Sync {
    /// Enqueue an envelope for delivery without blocking
    fn send(&self, envelope: &SignalingEnvelope) -> Result<()>;
}

/// Build the relay URL for this device
///
/// # Examples
///
/// ```
/// use robot_link::identity::DeviceIdentity;
/// use robot_link::signaling::relay_url;
///
/// let id = DeviceIdentity::generate();
/// let url = relay_url("ws://relay:5003/connect", &id);
/// assert_eq!(url, format!("ws://relay:5003/connect?id={}", id));
/// ```
pub fn relay_url(base: &str, identity: &DeviceIdentity) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}id={}", base, separator, identity)
}

/// Handle to the process-lifetime relay connection
pub struct SignalingClient {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingClient {
    /// Start the connection loop
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `connector` - Transport used to reach the relay
    /// * `base_url` - Relay endpoint without the identity parameter
    /// * `identity` - Address the robot registers under
    /// * `retry_delay` - Fixed pause between connection attempts
    ///
    /// # Returns
    ///
    /// The client handle and the receiver of inbound envelopes
    pub fn connect<C: SignalingConnector>(
        connector: C,
        base_url: &str,
        identity: &DeviceIdentity,
        retry_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SignalingEnvelope>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_connection_loop(
            connector,
            relay_url(base_url, identity),
            outbound_rx,
            inbound_tx,
            retry_delay,
            cancel.clone(),
        ));

        let client = Self {
            outbound: outbound_tx,
            cancel,
            task: Mutex::new(Some(task)),
        };
        (client, inbound_rx)
    }

    /// Enqueue an envelope for delivery
    ///
    /// Never blocks. Envelopes that fail to serialize are logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::SignalingClosed`] after [`shutdown`](Self::shutdown)
    pub fn send(&self, envelope: &SignalingEnvelope) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::SignalingClosed);
        }

        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Dropping unserializable envelope: {}", e);
                return Ok(());
            }
        };

        debug!("Queueing signaling message {}", text);
        self.outbound.send(text).map_err(|_| AgentError::SignalingClosed)
    }

    /// Stop reconnecting and close the socket
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Signaling task ended abnormally: {}", e);
            }
        }
    }
}

impl SignalSink for SignalingClient {
    fn send(&self, envelope: &SignalingEnvelope) -> Result<()> {
        SignalingClient::send(self, envelope)
    }
}

async fn run_connection_loop<C: SignalingConnector>(
    connector: C,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<SignalingEnvelope>,
    retry_delay: Duration,
    cancel: CancellationToken,
) {
    let mut carry: Option<String> = None;

    loop {
        info!("Connecting to signaling relay at {}", url);

        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = connector.connect(&url) => attempt,
        };

        match attempt {
            Ok((mut sink, mut stream)) => {
                info!("Connected to signaling relay");
                let outcome = pump(
                    sink.as_mut(),
                    stream.as_mut(),
                    &mut outbound,
                    &inbound,
                    &mut carry,
                    &cancel,
                )
                .await;

                match outcome {
                    Ok(()) => break,
                    Err(e) => warn!("Signaling connection lost: {}", e),
                }
            }
            Err(e) => warn!("Signaling connection failed: {}", e),
        }

        info!("Reconnecting to signaling relay in {} ms", retry_delay.as_millis());
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }

    info!("Signaling client stopped");
}

/// Move traffic over one connection until it drops (`Err`) or the client
/// is shut down (`Ok`)
async fn pump(
    sink: &mut dyn SignalingSink,
    stream: &mut dyn SignalingStream,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    inbound: &mpsc::UnboundedSender<SignalingEnvelope>,
    carry: &mut Option<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    if let Some(text) = carry.take() {
        debug!("Replaying undelivered signaling message");
        if let Err(e) = sink.send_text(&text).await {
            *carry = Some(text);
            return Err(e);
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = sink.close().await {
                    debug!("Close frame not delivered: {}", e);
                }
                return Ok(());
            }

            incoming = stream.next_text() => match incoming {
                Some(Ok(text)) => deliver(&text, inbound),
                Some(Err(e)) => return Err(e),
                None => return Err(AgentError::SignalingDisconnected("closed by relay".to_string())),
            },

            queued = outbound.recv() => match queued {
                Some(text) => {
                    if let Err(e) = sink.send_text(&text).await {
                        *carry = Some(text);
                        return Err(e);
                    }
                }
                // Every client handle is gone
                None => {
                    let _ = sink.close().await;
                    return Ok(());
                }
            },
        }
    }
}

fn deliver(text: &str, inbound: &mpsc::UnboundedSender<SignalingEnvelope>) {
    debug!("Received signaling message {}", text);
    match SignalingEnvelope::from_json(text) {
        Ok(envelope) => {
            if inbound.send(envelope).is_err() {
                debug!("No consumer for inbound signaling message");
            }
        }
        Err(e) => warn!("Dropping malformed signaling message: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::transport::mocks::{accepting, ScriptedConnection, ScriptedConnector};
    use super::*;
    use crate::identity::PeerId;
    use uuid::Uuid;

    const RETRY: Duration = Duration::from_millis(1000);

    fn identity() -> DeviceIdentity {
        DeviceIdentity::from_uuid(Uuid::from_u128(0x1234))
    }

    async fn next_sent(relay: &mut mpsc::UnboundedReceiver<String>) -> SignalingEnvelope {
        let text = tokio::time::timeout(Duration::from_secs(10), relay.recv())
            .await
            .expect("nothing sent to relay")
            .expect("relay channel closed");
        SignalingEnvelope::from_json(&text).unwrap()
    }

    #[test]
    fn test_relay_url_with_existing_query() {
        let url = relay_url("ws://relay/connect?room=a", &identity());
        assert_eq!(url, format!("ws://relay/connect?room=a&id={}", identity()));
    }

    #[tokio::test]
    async fn test_inbound_delivered_in_order_and_malformed_dropped() {
        let (conn, relay) = accepting();
        let connector = ScriptedConnector::new(vec![conn]);
        let (client, mut inbound) = SignalingClient::connect(connector, "ws://relay/connect", &identity(), RETRY);

        relay.incoming.send(Ok(r#"{"from":"a","type":"rtc","message":{"type":"offer","sdp":"1"}}"#.to_string())).unwrap();
        relay.incoming.send(Ok("{broken".to_string())).unwrap();
        relay.incoming.send(Ok(r#"{"from":"b","type":"rtc","message":{"type":"offer","sdp":"2"}}"#.to_string())).unwrap();

        let first = inbound.recv().await.unwrap();
        let second = inbound.recv().await.unwrap();
        assert_eq!(first.from, Some(PeerId::new("a")));
        assert_eq!(second.from, Some(PeerId::new("b")), "malformed message must be skipped");

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_reuses_identity_and_replays_buffered_first() {
        let (conn1, relay1) = accepting();
        let (conn2, mut relay2) = accepting();
        let connector = ScriptedConnector::new(vec![conn1, conn2]);
        let (client, _inbound) =
            SignalingClient::connect(connector.clone(), "ws://relay/connect", &identity(), RETRY);

        // Let the first connection come up, then kill it
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(connector.attempts().len(), 1);
        drop(relay1);
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Outage: these wait for the next connection
        let buffered = SignalingEnvelope::failure(PeerId::new("op-1"));
        let later = SignalingEnvelope::answer(PeerId::new("op-2"), "v=0");
        client.send(&buffered).unwrap();
        client.send(&later).unwrap();

        assert_eq!(next_sent(&mut relay2.sent).await, buffered, "buffered envelope must go out first");
        assert_eq!(next_sent(&mut relay2.sent).await, later);

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].0, attempts[1].0, "reconnect must reuse the same identity");
        assert!(attempts[1].0.ends_with(&format!("?id={}", identity())));

        let gap = attempts[1].1 - attempts[0].1;
        assert!(gap >= RETRY, "reconnected too early: {:?}", gap);
        assert!(gap <= RETRY + Duration::from_millis(50), "reconnected too late: {:?}", gap);

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connections_are_retried_forever() {
        let (conn, _relay) = accepting();
        let script = vec![
            ScriptedConnection::Refuse,
            ScriptedConnection::Refuse,
            ScriptedConnection::Refuse,
            conn,
        ];
        let connector = ScriptedConnector::new(script);
        let (client, _inbound) =
            SignalingClient::connect(connector.clone(), "ws://relay/connect", &identity(), RETRY);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 4);
        for pair in attempts.windows(2) {
            assert_eq!(pair[1].1 - pair[0].1, RETRY, "retry delay must not grow");
        }

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_is_carried_to_next_connection() {
        let (conn1, relay1) = accepting();
        let (conn2, mut relay2) = accepting();
        let connector = ScriptedConnector::new(vec![conn1, conn2]);
        let (client, _inbound) =
            SignalingClient::connect(connector.clone(), "ws://relay/connect", &identity(), RETRY);

        tokio::time::sleep(Duration::from_millis(5)).await;
        // Writes start failing but the read side stays open
        let super::transport::mocks::RelayEnd { sent, incoming } = relay1;
        drop(sent);

        let envelope = SignalingEnvelope::failure(PeerId::new("op-9"));
        client.send(&envelope).unwrap();

        assert_eq!(next_sent(&mut relay2.sent).await, envelope);
        drop(incoming);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_after_shutdown_fails() {
        let connector = ScriptedConnector::new(vec![]);
        let (client, _inbound) = SignalingClient::connect(connector, "ws://relay/connect", &identity(), RETRY);

        client.shutdown().await;
        let result = client.send(&SignalingEnvelope::failure(PeerId::new("op")));
        assert!(matches!(result, Err(AgentError::SignalingClosed)));
    }
}
