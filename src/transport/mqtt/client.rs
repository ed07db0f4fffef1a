//! Event Grid MQTT client: connection lifecycle and publish/subscribe
//!
//! [`EventGridClient`] drives a [`TransportEngine`]: it builds the TLS
//! context, hands credentials to the engine, issues the connect request and
//! waits a bounded time for the broker's confirmation. Publish and subscribe
//! are gated on the status held by the [`EventDispatcher`] and only report
//! whether the engine accepted the request locally.

use super::connection::{
    wait_for_connection, ConnectionStatus, DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE,
};
use super::dispatcher::{EventDispatcher, InboundMessage};
use super::engine::engine_for;
use super::tls::{build_tls_context, ClientIdentity, TlsError};
use crate::config::{ClientConfig, ConfigError, BROKER_PORT};
use crate::credentials::SignedToken;
use crate::error::sanitize_error_message;
use crate::mqtt_span;
use crate::transport::{EngineError, QoS, TransportEngine};
use crate::validation::ConfigValidator;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

/// Credentials presented to the broker
#[derive(Debug, Clone)]
pub enum Auth {
    /// Mutual TLS using the configured certificate and key files
    Certificate,
    /// Signed token used as the CONNECT password
    Token(SignedToken),
}

/// Connection setup failures
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Certificate authentication requires a client certificate file")]
    MissingClientCertificate,
    #[error("Transport engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Could not reach the broker: {cause}")]
    Transport { cause: String },
}

/// Publish failures after the request reached the engine
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("Failed to publish to '{topic}': result code {code}")]
    Rejected { topic: String, code: u8 },
}

/// Subscribe failures after the request reached the engine
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("Failed to subscribe to '{topic}': result code {code}")]
    Rejected { topic: String, code: u8 },
}

/// Client for an Event Grid namespace MQTT broker
pub struct EventGridClient {
    config: ClientConfig,
    engine: Box<dyn TransportEngine>,
    dispatcher: Arc<EventDispatcher>,
    connect_timeout: Duration,
    keep_alive: Duration,
}

impl EventGridClient {
    /// Create a client using the rumqttc engine for the configured protocol
    ///
    /// The configuration is validated first; construction fails on the first
    /// violated check.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let engine = engine_for(config.protocol, &config.client_id);
        Self::with_engine(config, engine)
    }

    /// Create a client driving the given engine
    pub fn with_engine(
        config: ClientConfig,
        engine: Box<dyn TransportEngine>,
    ) -> Result<Self, ConfigError> {
        ConfigValidator::validate(&config)?;
        Ok(Self {
            config,
            engine,
            dispatcher: Arc::new(EventDispatcher::new()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keep_alive: DEFAULT_KEEP_ALIVE,
        })
    }

    /// Override the bound on the connection confirmation wait
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Snapshot of the connection state and last reason
    pub fn connection_status(&self) -> ConnectionStatus {
        self.dispatcher.status()
    }

    pub fn is_connected(&self) -> bool {
        self.dispatcher.status().is_connected()
    }

    /// Forward every decoded inbound message to `sender`
    pub fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        self.dispatcher.set_message_sender(sender);
    }

    /// Connect and wait for the broker's confirmation
    ///
    /// Returns `Ok(true)` once connected, `Ok(false)` when the broker refused
    /// the session or no confirmation arrived in time. A confirmation that
    /// arrives after the timeout still moves the status to Connected. Setup
    /// failures and network or TLS failures before the broker answered are
    /// returned as [`ConnectError`].
    pub async fn connect(&mut self, auth: Auth) -> Result<bool, ConnectError> {
        if self.is_connected() {
            debug!("Already connected");
            return Ok(true);
        }

        let host = self.config.broker_host();
        let span = mqtt_span!(client_id = %self.config.client_id, host = %host);
        self.connect_to(host, auth).instrument(span).await
    }

    async fn connect_to(&mut self, host: String, auth: Auth) -> Result<bool, ConnectError> {
        info!(port = BROKER_PORT, "Connecting to Event Grid MQTT broker");

        if let Err(e) = self.prepare_engine(&auth) {
            error!("Connection setup failed: {}", sanitize_error_message(&e.to_string()));
            return Err(e);
        }

        self.dispatcher.on_connect_requested();
        let requested = self
            .engine
            .connect(&host, BROKER_PORT, self.keep_alive)
            .await
            .and_then(|()| self.engine.loop_start());
        if let Err(e) = requested {
            self.dispatcher.on_connect_abandoned();
            error!("Connect request failed: {}", sanitize_error_message(&e.to_string()));
            return Err(e.into());
        }

        let status_rx = self.dispatcher.subscribe_status();
        let connected = wait_for_connection(status_rx, self.connect_timeout).await;
        if connected {
            return Ok(true);
        }

        self.dispatcher.on_connect_abandoned();
        let status = self.connection_status();
        if let Some(cause) = status.transport_error {
            return Err(ConnectError::Transport { cause });
        }
        match status.last_reason {
            Some(reason) => warn!(reason = %reason, "Connection was not established"),
            None => warn!(
                timeout_secs = self.connect_timeout.as_secs_f64(),
                "Connection timeout"
            ),
        }
        Ok(false)
    }

    fn prepare_engine(&mut self, auth: &Auth) -> Result<(), ConnectError> {
        let passphrase = self.config.key_passphrase()?;

        let (identity, password) = match auth {
            Auth::Certificate => {
                let cert_file = self
                    .config
                    .client_cert_file
                    .as_deref()
                    .ok_or(ConnectError::MissingClientCertificate)?;
                let identity = ClientIdentity::load(
                    cert_file,
                    &self.config.client_key_file,
                    passphrase.as_deref(),
                )?;
                (Some(identity), None)
            }
            Auth::Token(token) => (None, Some(token.as_str())),
        };

        let tls = build_tls_context(self.config.ca_file(), identity)?;

        self.engine.set_username(&self.config.username, password);
        self.engine.set_tls_context(tls);
        self.engine.register_callbacks(self.dispatcher.clone());
        Ok(())
    }

    /// Close the session; a no-op when not connected
    pub async fn disconnect(&mut self) {
        if !self.is_connected() {
            debug!("Disconnect requested while not connected");
            return;
        }

        self.engine.loop_stop().await;
        if let Err(e) = self.engine.disconnect().await {
            warn!("Disconnect request failed: {}", e);
        }
        self.dispatcher.on_local_disconnect();
        info!("Disconnected from broker");
    }

    /// Publish an event at QoS 1
    ///
    /// Returns `Ok(false)` without contacting the engine when not connected.
    /// Values that cannot be serialized as JSON are sent as their `Debug`
    /// text.
    pub async fn publish_event<T>(&self, topic: &str, event: &T) -> Result<bool, PublishError>
    where
        T: Serialize + Debug + ?Sized,
    {
        if !self.is_connected() {
            error!(topic, "Cannot publish: not connected");
            return Ok(false);
        }

        let payload = serialize_event(event);
        match self.engine.publish(topic, payload, QoS::AtLeastOnce).await {
            Ok(()) => {
                info!(topic, "Publish request accepted");
                Ok(true)
            }
            Err(e) => {
                error!(topic, code = e.code(), "Failed to publish: {}", e);
                Err(PublishError::Rejected {
                    topic: topic.to_string(),
                    code: e.code(),
                })
            }
        }
    }

    /// Subscribe to a topic filter at QoS 1
    ///
    /// Only the local request outcome is reported; the broker's
    /// acknowledgment is logged when it arrives.
    pub async fn subscribe(&self, topic: &str) -> Result<bool, SubscribeError> {
        if !self.is_connected() {
            error!(topic, "Cannot subscribe: not connected");
            return Ok(false);
        }

        match self.engine.subscribe(topic, QoS::AtLeastOnce).await {
            Ok(()) => {
                info!(topic, "Subscribe request accepted");
                Ok(true)
            }
            Err(e) => {
                error!(topic, code = e.code(), "Failed to subscribe: {}", e);
                Err(SubscribeError::Rejected {
                    topic: topic.to_string(),
                    code: e.code(),
                })
            }
        }
    }
}

/// JSON text of `event`, or a JSON string of its `Debug` rendering
fn serialize_event<T: Serialize + Debug + ?Sized>(event: &T) -> Vec<u8> {
    serde_json::to_vec(event).unwrap_or_else(|e| {
        debug!("Event is not JSON-serializable ({}), sending its text form", e);
        serde_json::Value::String(format!("{event:?}")).to_string().into_bytes()
    })
}
