//! Transport engine boundary
//!
//! The connector never talks to sockets itself. It configures and drives a
//! [`TransportEngine`] and receives notifications back through
//! [`EngineCallbacks`]. Reason indicators from both protocol revisions cross
//! this boundary as a [`ReasonIndicator`] and are normalized immediately into a
//! [`NormalizedReasonCode`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

pub use mqtt::tls::TlsContext;

/// Outcome indicator as delivered by a protocol revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonIndicator {
    /// MQTT 3.1.1 style integer return code
    Plain(u8),
    /// MQTT 5 style reason code with its symbolic name
    Named { code: u8, name: String },
}

impl ReasonIndicator {
    pub fn named(code: u8, name: impl Into<String>) -> Self {
        Self::Named {
            code,
            name: name.into(),
        }
    }
}

/// Revision-independent reason code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedReasonCode {
    pub code: u8,
    pub name: String,
}

impl NormalizedReasonCode {
    /// Normalize a reason indicator
    ///
    /// Structured values keep their code and name; plain integers use their
    /// decimal rendering as the name.
    pub fn normalize(indicator: &ReasonIndicator) -> Self {
        Self::from(indicator.clone())
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

impl From<ReasonIndicator> for NormalizedReasonCode {
    fn from(indicator: ReasonIndicator) -> Self {
        match indicator {
            ReasonIndicator::Plain(code) => Self {
                code,
                name: code.to_string(),
            },
            ReasonIndicator::Named { code, name } => Self { code, name },
        }
    }
}

impl fmt::Display for NormalizedReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.code.to_string() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.name, self.code)
        }
    }
}

/// Delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Code reported when a failure carries no more specific reason
pub const UNSPECIFIED_ERROR: u8 = 0x80;

/// Errors reported by a transport engine for a local request
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine is not connected")]
    NotConnected,
    #[error("request queue is full")]
    QueueFull,
    /// Engine-specific result code; 0 is reported as [`UNSPECIFIED_ERROR`]
    #[error("request rejected with code {0}")]
    Rejected(u8),
    #[error("request could not be sent: {0}")]
    Request(String),
    #[error("engine setup failed: {0}")]
    Setup(String),
}

impl EngineError {
    /// Numeric result code for the immediate request outcome
    pub fn code(&self) -> u8 {
        match self {
            EngineError::NotConnected => 4,
            EngineError::Rejected(0) => UNSPECIFIED_ERROR,
            EngineError::Rejected(code) => *code,
            EngineError::Request(_) => 7,
            EngineError::Setup(_) => 13,
            EngineError::QueueFull => 15,
        }
    }
}

/// Notifications raised by the engine's background loop
///
/// Implementations run on the engine's task, concurrently with callers of
/// the client, and must not block.
pub trait EngineCallbacks: Send + Sync {
    fn on_connect(&self, reason: ReasonIndicator);
    fn on_disconnect(&self, reason: ReasonIndicator);
    /// Network, DNS or TLS failure with no protocol reason code
    fn on_transport_error(&self, cause: &str);
    fn on_message(&self, topic: &str, payload: &[u8]);
    fn on_publish(&self, message_id: u16);
    fn on_subscribe(&self, message_id: u16, reasons: Vec<ReasonIndicator>);
}

/// External message-transport engine driven by the connector
#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Credentials presented on CONNECT
    fn set_username(&mut self, username: &str, password: Option<&str>);

    fn set_tls_context(&mut self, tls: TlsContext);

    /// Must be called before [`connect`](Self::connect)
    fn register_callbacks(&mut self, callbacks: Arc<dyn EngineCallbacks>);

    /// Issue the connect request; confirmation arrives via `on_connect`
    async fn connect(&mut self, host: &str, port: u16, keep_alive: Duration)
        -> Result<(), EngineError>;

    /// Start the background network-processing loop
    fn loop_start(&mut self) -> Result<(), EngineError>;

    async fn loop_stop(&mut self);

    async fn disconnect(&mut self) -> Result<(), EngineError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), EngineError>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_zero_normalizes_to_decimal_name() {
        let reason = NormalizedReasonCode::normalize(&ReasonIndicator::Plain(0));
        assert_eq!(reason.code, 0);
        assert_eq!(reason.name, "0");
        assert!(reason.is_success());
    }

    #[test]
    fn test_named_keeps_symbolic_name() {
        let reason = NormalizedReasonCode::from(ReasonIndicator::named(5, "NotAuthorized"));
        assert_eq!(
            reason,
            NormalizedReasonCode {
                code: 5,
                name: "NotAuthorized".to_string()
            }
        );
        assert!(!reason.is_success());
        assert_eq!(reason.to_string(), "NotAuthorized (5)");
    }

    #[test]
    fn test_engine_error_codes_are_nonzero() {
        let errors = [
            EngineError::NotConnected,
            EngineError::QueueFull,
            EngineError::Rejected(3),
            EngineError::Request("closed".to_string()),
            EngineError::Setup("bad".to_string()),
        ];
        assert!(errors.iter().all(|e| e.code() != 0));
        assert_eq!(EngineError::NotConnected.code(), 4);
    }

    #[test]
    fn test_rejected_zero_reports_unspecified() {
        assert_eq!(EngineError::Rejected(0).code(), UNSPECIFIED_ERROR);
        assert_eq!(EngineError::Rejected(0x87).code(), 0x87);
    }

    #[test]
    fn test_normalize_matches_from() {
        let indicators = [
            ReasonIndicator::Plain(5),
            ReasonIndicator::named(0x87, "NotAuthorized"),
        ];
        for indicator in indicators {
            assert_eq!(
                NormalizedReasonCode::normalize(&indicator),
                NormalizedReasonCode::from(indicator)
            );
        }
    }
}
