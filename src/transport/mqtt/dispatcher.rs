//! Engine event dispatch
//!
//! [`EventDispatcher`] is the only writer of the connection status. Engine
//! notifications arrive here from the background loop, reason indicators are
//! normalized on entry, and every state change is a single `watch` send so
//! readers never observe a partial update.

use super::connection::{ConnectionState, ConnectionStatus};
use crate::error::sanitize_error_message;
use crate::transport::{EngineCallbacks, NormalizedReasonCode, ReasonIndicator};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Inbound payload classification
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// Payload parsed as JSON
    Json(Value),
    /// UTF-8 text that is not JSON
    Text(String),
}

/// A received message, decoded
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub body: MessageBody,
    pub received_at: DateTime<Utc>,
}

/// Payload decoding failures
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Payload on topic '{topic}' is not valid UTF-8: {source}")]
    InvalidUtf8 {
        topic: String,
        #[source]
        source: std::str::Utf8Error,
    },
}

/// Decode a payload as UTF-8 and classify it as JSON or plain text
pub fn decode_payload(topic: &str, payload: &[u8]) -> Result<MessageBody, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|source| DecodeError::InvalidUtf8 {
        topic: topic.to_string(),
        source,
    })?;

    Ok(match serde_json::from_str::<Value>(text) {
        Ok(value) => MessageBody::Json(value),
        Err(_) => MessageBody::Text(text.to_string()),
    })
}

/// Forwards decoded messages to an optional consumer
#[derive(Default)]
struct MessageForwarder {
    sender: Option<mpsc::Sender<InboundMessage>>,
}

impl MessageForwarder {
    fn forward(&self, message: InboundMessage) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(e) = sender.try_send(message) {
            warn!("Failed to forward inbound message: {}", e);
        }
    }
}

/// Normalizes engine notifications and owns the connection status
pub struct EventDispatcher {
    status_tx: watch::Sender<ConnectionStatus>,
    forwarder: Mutex<MessageForwarder>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::disconnected());
        Self {
            status_tx,
            forwarder: Mutex::new(MessageForwarder::default()),
        }
    }

    /// Atomic snapshot of the current status
    pub fn status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        let mut forwarder = self
            .forwarder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        forwarder.sender = Some(sender);
    }

    /// A connect request is about to be issued
    pub fn on_connect_requested(&self) {
        self.status_tx.send_modify(|status| {
            status.state = ConnectionState::Connecting;
            status.last_reason = None;
            status.transport_error = None;
        });
    }

    /// The caller gave up waiting (timeout or setup failure)
    ///
    /// Only a status still in Connecting is moved to Disconnected; an outcome
    /// that already arrived is kept. A confirmation arriving later still
    /// moves the status to Connected.
    pub fn on_connect_abandoned(&self) {
        self.status_tx.send_if_modified(|status| {
            if status.state == ConnectionState::Connecting {
                status.state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }

    /// The client closed the session itself
    pub fn on_local_disconnect(&self) {
        self.apply(
            ConnectionState::Disconnected,
            NormalizedReasonCode {
                code: 0,
                name: "NormalDisconnection".to_string(),
            },
        );
    }

    fn apply(&self, state: ConnectionState, reason: NormalizedReasonCode) {
        self.status_tx.send_replace(ConnectionStatus {
            state,
            last_reason: Some(reason),
            transport_error: None,
        });
    }

    fn forward(&self, message: InboundMessage) {
        let forwarder = self
            .forwarder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        forwarder.forward(message);
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineCallbacks for EventDispatcher {
    fn on_connect(&self, reason: ReasonIndicator) {
        let reason = NormalizedReasonCode::normalize(&reason);
        if reason.is_success() {
            info!(code = reason.code, reason = %reason.name, "Connected to Event Grid MQTT broker");
            self.apply(ConnectionState::Connected, reason);
        } else {
            error!(code = reason.code, reason = %reason.name, "Connection refused by broker");
            self.apply(ConnectionState::Disconnected, reason);
        }
    }

    fn on_disconnect(&self, reason: ReasonIndicator) {
        let reason = NormalizedReasonCode::normalize(&reason);
        if reason.is_success() {
            info!(code = reason.code, reason = %reason.name, "Disconnected from broker");
        } else {
            warn!(code = reason.code, reason = %reason.name, "Unexpected disconnection");
        }
        self.apply(ConnectionState::Disconnected, reason);
    }

    fn on_transport_error(&self, cause: &str) {
        let cause = sanitize_error_message(cause);
        if self.status().state == ConnectionState::Connecting {
            error!(cause = %cause, "Connection attempt failed");
        } else {
            warn!(cause = %cause, "Connection lost");
        }
        self.status_tx.send_replace(ConnectionStatus {
            state: ConnectionState::Disconnected,
            last_reason: None,
            transport_error: Some(cause),
        });
    }

    fn on_message(&self, topic: &str, payload: &[u8]) {
        match decode_payload(topic, payload) {
            Ok(body) => {
                match &body {
                    MessageBody::Json(value) => {
                        info!(topic, payload = %value, "Received JSON message");
                    }
                    MessageBody::Text(text) => {
                        info!(topic, payload = %text, "Received text message");
                    }
                }
                self.forward(InboundMessage {
                    topic: topic.to_string(),
                    body,
                    received_at: Utc::now(),
                });
            }
            Err(e) => error!("Error processing message: {}", e),
        }
    }

    fn on_publish(&self, message_id: u16) {
        debug!(message_id, "Message published");
    }

    fn on_subscribe(&self, message_id: u16, reasons: Vec<ReasonIndicator>) {
        for (index, reason) in reasons.iter().map(NormalizedReasonCode::normalize).enumerate() {
            // 0, 1 and 2 are granted QoS levels
            if reason.code < 0x80 {
                info!(message_id, index, code = reason.code, reason = %reason.name, "Subscription granted");
            } else {
                warn!(message_id, index, code = reason.code, reason = %reason.name, "Subscription rejected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_status_is_disconnected() {
        let dispatcher = EventDispatcher::new();
        assert_eq!(dispatcher.status(), ConnectionStatus::disconnected());
    }

    #[test]
    fn test_plain_zero_connects() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on_connect_requested();
        dispatcher.on_connect(ReasonIndicator::Plain(0));

        let status = dispatcher.status();
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(
            status.last_reason,
            Some(NormalizedReasonCode {
                code: 0,
                name: "0".to_string()
            })
        );
    }

    #[test]
    fn test_named_failure_disconnects_and_records_reason() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on_connect_requested();
        dispatcher.on_connect(ReasonIndicator::named(5, "NotAuthorized"));

        let status = dispatcher.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.last_reason.unwrap().name, "NotAuthorized");
    }

    #[test]
    fn test_disconnect_always_disconnects() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on_connect(ReasonIndicator::Plain(0));
        dispatcher.on_disconnect(ReasonIndicator::named(0x8E, "SessionTakenOver"));

        let status = dispatcher.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.last_reason.unwrap().code, 0x8E);
    }

    #[test]
    fn test_abandon_only_affects_connecting() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on_connect_requested();
        dispatcher.on_connect(ReasonIndicator::Plain(0));
        dispatcher.on_connect_abandoned();
        assert_eq!(dispatcher.status().state, ConnectionState::Connected);

        let dispatcher = EventDispatcher::new();
        dispatcher.on_connect_requested();
        dispatcher.on_connect_abandoned();
        assert_eq!(dispatcher.status().state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_late_success_after_abandon() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on_connect_requested();
        dispatcher.on_connect_abandoned();
        dispatcher.on_connect(ReasonIndicator::Plain(0));

        assert_eq!(dispatcher.status().state, ConnectionState::Connected);
    }

    #[test]
    fn test_decode_payload_classification() {
        assert_eq!(
            decode_payload("t", br#"{"id":"1"}"#).unwrap(),
            MessageBody::Json(serde_json::json!({"id": "1"}))
        );
        assert_eq!(
            decode_payload("t", b"hello").unwrap(),
            MessageBody::Text("hello".to_string())
        );
        assert!(matches!(
            decode_payload("t", &[0xff, 0xfe]),
            Err(DecodeError::InvalidUtf8 { .. })
        ));
    }

    #[tokio::test]
    async fn test_messages_are_forwarded() {
        let dispatcher = EventDispatcher::new();
        let (tx, mut rx) = mpsc::channel(4);
        dispatcher.set_message_sender(tx);

        dispatcher.on_message("devices/a", br#"{"temp": 21}"#);
        dispatcher.on_message("devices/a", b"plain");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.topic, "devices/a");
        assert_eq!(first.body, MessageBody::Json(serde_json::json!({"temp": 21})));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.body, MessageBody::Text("plain".to_string()));
    }

    #[test]
    fn test_invalid_payload_is_not_fatal() {
        let dispatcher = EventDispatcher::new();
        let (tx, mut rx) = mpsc::channel(1);
        dispatcher.set_message_sender(tx);

        dispatcher.on_message("t", &[0xc3, 0x28]);

        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.status().state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_full_channel_drops_message() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on_connect(ReasonIndicator::Plain(0));
        let before = dispatcher.status();
        let (tx, mut rx) = mpsc::channel(1);
        dispatcher.set_message_sender(tx);

        dispatcher.on_message("t", b"one");
        dispatcher.on_message("t", b"two");

        let kept = rx.try_recv().unwrap();
        assert_eq!(kept.body, MessageBody::Text("one".to_string()));
        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.status(), before);
    }

    #[test]
    fn test_transport_error_while_connecting_records_cause() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on_connect_requested();
        dispatcher.on_transport_error("I/O: failed to lookup address information");

        let status = dispatcher.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.last_reason.is_none());
        assert_eq!(
            status.transport_error.as_deref(),
            Some("I/O: failed to lookup address information")
        );
    }

    #[test]
    fn test_new_attempt_clears_transport_error() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on_connect(ReasonIndicator::Plain(0));
        dispatcher.on_transport_error("connection reset by peer");
        assert_eq!(dispatcher.status().state, ConnectionState::Disconnected);

        dispatcher.on_connect_requested();
        assert!(dispatcher.status().transport_error.is_none());
    }
}
