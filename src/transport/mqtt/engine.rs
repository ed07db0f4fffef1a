//! rumqttc-backed transport engines
//!
//! One engine per protocol revision. Both translate rumqttc events into
//! [`EngineCallbacks`] notifications from a spawned event-loop task:
//!
//! - [`MqttV311Engine`] reports integer return codes as [`ReasonIndicator::Plain`]
//! - [`MqttV5Engine`] reports reason codes as [`ReasonIndicator::Named`]
//!
//! Connection errors below the protocol (DNS, TCP, TLS) are reported through
//! `on_transport_error`. The event loop stops on the first connection error;
//! reconnecting is left to the caller.

use crate::transport::{
    EngineCallbacks, EngineError, QoS, ReasonIndicator, TlsContext, TransportEngine,
    UNSPECIFIED_ERROR,
};
use async_trait::async_trait;
use rumqttc::{Outgoing, TlsConfiguration, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Request channel capacity between the client handle and the event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Upper bound on flushing the DISCONNECT packet after the loop is stopped
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings collected before `connect`
#[derive(Default)]
struct EngineSettings {
    username: Option<String>,
    password: Option<String>,
    tls: Option<TlsContext>,
    callbacks: Option<Arc<dyn EngineCallbacks>>,
}

impl EngineSettings {
    fn callbacks(&self) -> Result<Arc<dyn EngineCallbacks>, EngineError> {
        self.callbacks
            .clone()
            .ok_or_else(|| EngineError::Setup("callbacks must be registered before connect".into()))
    }

    fn transport(&self) -> Result<Transport, EngineError> {
        let tls = self
            .tls
            .clone()
            .ok_or_else(|| EngineError::Setup("TLS context must be set before connect".into()))?;
        Ok(Transport::tls_with_config(TlsConfiguration::Rustls(tls)))
    }
}

/// Background loop handle plus its shutdown signal
///
/// The task hands the event loop back when it is stopped on request, and
/// returns `None` when it ended on a connection error.
struct LoopHandle<L> {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Option<L>>,
}

impl<L> LoopHandle<L> {
    async fn stop(self) -> Option<L> {
        let _ = self.shutdown_tx.send(true);
        match self.task.await {
            Ok(event_loop) => event_loop,
            Err(e) => {
                warn!("Event loop task ended abnormally: {}", e);
                None
            }
        }
    }
}

impl From<rumqttc::ClientError> for EngineError {
    fn from(error: rumqttc::ClientError) -> Self {
        match error {
            rumqttc::ClientError::TryRequest(_) => EngineError::QueueFull,
            other => EngineError::Request(other.to_string()),
        }
    }
}

impl From<rumqttc::v5::ClientError> for EngineError {
    fn from(error: rumqttc::v5::ClientError) -> Self {
        match error {
            rumqttc::v5::ClientError::TryRequest(_) => EngineError::QueueFull,
            other => EngineError::Request(other.to_string()),
        }
    }
}

/// Engine struct plus its [`TransportEngine`] impl over one rumqttc module
///
/// The revision-specific parts live in an inherent impl on the engine:
/// `options`, `refused`, `route_incoming` and `qos`.
macro_rules! rumqttc_engine {
    ($(#[$meta:meta])* $engine:ident, $label:literal, $($module:ident)::+) => {
        $(#[$meta])*
        pub struct $engine {
            client_id: String,
            settings: EngineSettings,
            client: Option<$($module)::+::AsyncClient>,
            event_loop: Option<Mutex<$($module)::+::EventLoop>>,
            loop_handle: Option<LoopHandle<$($module)::+::EventLoop>>,
        }

        impl $engine {
            pub fn new(client_id: impl Into<String>) -> Self {
                Self {
                    client_id: client_id.into(),
                    settings: EngineSettings::default(),
                    client: None,
                    event_loop: None,
                    loop_handle: None,
                }
            }

            fn client(&self) -> Result<&$($module)::+::AsyncClient, EngineError> {
                self.client.as_ref().ok_or(EngineError::NotConnected)
            }
        }

        #[async_trait]
        impl TransportEngine for $engine {
            fn set_username(&mut self, username: &str, password: Option<&str>) {
                self.settings.username = Some(username.to_string());
                self.settings.password = password.map(str::to_string);
            }

            fn set_tls_context(&mut self, tls: TlsContext) {
                self.settings.tls = Some(tls);
            }

            fn register_callbacks(&mut self, callbacks: Arc<dyn EngineCallbacks>) {
                self.settings.callbacks = Some(callbacks);
            }

            async fn connect(
                &mut self,
                host: &str,
                port: u16,
                keep_alive: Duration,
            ) -> Result<(), EngineError> {
                self.settings.callbacks()?;
                if let Some(previous) = self.loop_handle.take() {
                    previous.stop().await;
                }

                let mut options = Self::options(&self.client_id, host, port);
                options.set_keep_alive(keep_alive);
                options.set_transport(self.settings.transport()?);
                if let Some(username) = &self.settings.username {
                    options.set_credentials(
                        username.clone(),
                        self.settings.password.clone().unwrap_or_default(),
                    );
                }

                let (client, event_loop) =
                    $($module)::+::AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
                self.client = Some(client);
                self.event_loop = Some(Mutex::new(event_loop));
                debug!(host, port, protocol = $label, "Connect request prepared");
                Ok(())
            }

            fn loop_start(&mut self) -> Result<(), EngineError> {
                let mut event_loop = self
                    .event_loop
                    .take()
                    .ok_or_else(|| EngineError::Setup("event loop already started".into()))?
                    .into_inner();
                let callbacks = self.settings.callbacks()?;
                let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

                let task = tokio::spawn(async move {
                    let stopped = loop {
                        tokio::select! {
                            _ = shutdown_rx.changed() => break true,
                            event = event_loop.poll() => match event {
                                Ok($($module)::+::Event::Incoming(packet)) => {
                                    Self::route_incoming(packet, callbacks.as_ref());
                                }
                                Ok($($module)::+::Event::Outgoing(_)) => {}
                                Err($($module)::+::ConnectionError::ConnectionRefused(code)) => {
                                    callbacks.on_connect(Self::refused(code));
                                    break false;
                                }
                                Err(e) => {
                                    callbacks.on_transport_error(&e.to_string());
                                    break false;
                                }
                            }
                        }
                    };
                    info!(protocol = $label, "MQTT event loop stopped");
                    stopped.then_some(event_loop)
                });

                self.loop_handle = Some(LoopHandle { shutdown_tx, task });
                Ok(())
            }

            async fn loop_stop(&mut self) {
                if let Some(handle) = self.loop_handle.take() {
                    self.event_loop = handle.stop().await.map(Mutex::new);
                }
            }

            async fn disconnect(&mut self) -> Result<(), EngineError> {
                let client = self.client.take().ok_or(EngineError::NotConnected)?;
                client.try_disconnect()?;

                if let Some(event_loop) = self.event_loop.take() {
                    let mut event_loop = event_loop.into_inner();
                    let flush = async {
                        loop {
                            match event_loop.poll().await {
                                Ok($($module)::+::Event::Outgoing(Outgoing::Disconnect)) => break,
                                Ok(_) => {}
                                Err(_) => break,
                            }
                        }
                    };
                    if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush).await.is_err() {
                        debug!("DISCONNECT not flushed before timeout");
                    }
                }
                Ok(())
            }

            async fn publish(
                &self,
                topic: &str,
                payload: Vec<u8>,
                qos: QoS,
            ) -> Result<(), EngineError> {
                Ok(self.client()?.try_publish(topic, Self::qos(qos), false, payload)?)
            }

            async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), EngineError> {
                Ok(self.client()?.try_subscribe(topic, Self::qos(qos))?)
            }
        }
    };
}

rumqttc_engine!(
    /// MQTT 3.1.1 engine
    MqttV311Engine,
    "MQTT 3.1.1",
    rumqttc
);

impl MqttV311Engine {
    fn options(client_id: &str, host: &str, port: u16) -> rumqttc::MqttOptions {
        let mut options = rumqttc::MqttOptions::new(client_id, host, port);
        options.set_clean_session(true);
        options
    }

    fn refused(code: rumqttc::ConnectReturnCode) -> ReasonIndicator {
        ReasonIndicator::Plain(code as u8)
    }

    fn route_incoming(packet: rumqttc::Packet, callbacks: &dyn EngineCallbacks) {
        use rumqttc::{Packet, SubscribeReasonCode};

        match packet {
            Packet::ConnAck(ack) => callbacks.on_connect(ReasonIndicator::Plain(ack.code as u8)),
            Packet::Disconnect => callbacks.on_disconnect(ReasonIndicator::Plain(0)),
            Packet::Publish(publish) => callbacks.on_message(&publish.topic, &publish.payload),
            Packet::PubAck(ack) => callbacks.on_publish(ack.pkid),
            Packet::SubAck(ack) => {
                let reasons = ack
                    .return_codes
                    .iter()
                    .map(|code| match code {
                        SubscribeReasonCode::Success(qos) => ReasonIndicator::Plain(*qos as u8),
                        SubscribeReasonCode::Failure => ReasonIndicator::Plain(UNSPECIFIED_ERROR),
                    })
                    .collect();
                callbacks.on_subscribe(ack.pkid, reasons);
            }
            other => debug!(target: "mqtt_transport", "MQTT event: {:?}", other),
        }
    }

    fn qos(qos: QoS) -> rumqttc::QoS {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

rumqttc_engine!(
    /// MQTT 5 engine
    MqttV5Engine,
    "MQTT 5",
    rumqttc::v5
);

impl MqttV5Engine {
    fn options(client_id: &str, host: &str, port: u16) -> rumqttc::v5::MqttOptions {
        let mut options = rumqttc::v5::MqttOptions::new(client_id, host, port);
        options.set_clean_start(true);
        options
    }

    fn refused(code: rumqttc::v5::mqttbytes::v5::ConnectReturnCode) -> ReasonIndicator {
        let name = format!("{code:?}");
        ReasonIndicator::named(code as u8, name)
    }

    fn route_incoming(packet: rumqttc::v5::mqttbytes::v5::Packet, callbacks: &dyn EngineCallbacks) {
        use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};

        match packet {
            Packet::ConnAck(ack) => {
                let name = format!("{:?}", ack.code);
                callbacks.on_connect(ReasonIndicator::named(ack.code as u8, name));
            }
            Packet::Disconnect(disconnect) => {
                let name = format!("{:?}", disconnect.reason_code);
                callbacks.on_disconnect(ReasonIndicator::named(disconnect.reason_code as u8, name));
            }
            Packet::Publish(publish) => {
                let topic = String::from_utf8_lossy(&publish.topic);
                callbacks.on_message(&topic, &publish.payload);
            }
            Packet::PubAck(ack) => callbacks.on_publish(ack.pkid),
            Packet::SubAck(ack) => {
                let reasons = ack
                    .return_codes
                    .iter()
                    .map(|code| match code {
                        SubscribeReasonCode::Success(qos) => {
                            ReasonIndicator::named(*qos as u8, format!("GrantedQoS{}", *qos as u8))
                        }
                        other => ReasonIndicator::named(UNSPECIFIED_ERROR, format!("{other:?}")),
                    })
                    .collect();
                callbacks.on_subscribe(ack.pkid, reasons);
            }
            other => debug!(target: "mqtt_transport", "MQTT event: {:?}", other),
        }
    }

    fn qos(qos: QoS) -> rumqttc::v5::mqttbytes::QoS {
        use rumqttc::v5::mqttbytes::QoS as V5QoS;
        match qos {
            QoS::AtMostOnce => V5QoS::AtMostOnce,
            QoS::AtLeastOnce => V5QoS::AtLeastOnce,
            QoS::ExactlyOnce => V5QoS::ExactlyOnce,
        }
    }
}

/// Engine for the configured protocol revision
pub fn engine_for(
    protocol: crate::config::ProtocolVersion,
    client_id: &str,
) -> Box<dyn TransportEngine> {
    match protocol {
        crate::config::ProtocolVersion::V311 => Box::new(MqttV311Engine::new(client_id)),
        crate::config::ProtocolVersion::V5 => Box::new(MqttV5Engine::new(client_id)),
    }
}
