//! Mock transport engine
//!
//! [`MockEngine`] records every call made by the client and answers the
//! connect request with a scripted acknowledgment from a spawned task, the
//! way a real engine's background loop would. A [`MockEngineHandle`] keeps
//! access to the recorded calls and can inject events after the engine has
//! been moved into a client.

use crate::transport::{
    EngineCallbacks, EngineError, QoS, ReasonIndicator, TlsContext, TransportEngine,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// How the mock answers a connect request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnAckBehavior {
    /// Acknowledge with the given indicator
    Respond(ReasonIndicator),
    /// Fail below the protocol with the given cause
    TransportError(String),
    /// Never acknowledge
    Never,
}

/// A call made on the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    SetUsername {
        username: String,
        password: Option<String>,
    },
    SetTlsContext,
    RegisterCallbacks,
    Connect {
        host: String,
        port: u16,
        keep_alive: Duration,
    },
    LoopStart,
    LoopStop,
    Disconnect,
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
    },
    Subscribe {
        topic: String,
        qos: QoS,
    },
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<EngineCall>>,
    callbacks: Mutex<Option<Arc<dyn EngineCallbacks>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn record(&self, call: EngineCall) {
        lock(&self.calls).push(call);
    }

    fn callbacks(&self) -> Option<Arc<dyn EngineCallbacks>> {
        lock(&self.callbacks).clone()
    }
}

/// Scriptable in-memory engine
pub struct MockEngine {
    shared: Arc<Shared>,
    connack: ConnAckBehavior,
    connack_delay: Duration,
    connect_result: Result<(), EngineError>,
    publish_result: Result<(), EngineError>,
    subscribe_result: Result<(), EngineError>,
}

/// Access to a [`MockEngine`] after it has been handed to a client
#[derive(Clone)]
pub struct MockEngineHandle {
    shared: Arc<Shared>,
}

impl MockEngine {
    /// Engine that acknowledges connects with `Plain(0)` after 10ms
    pub fn new() -> (Self, MockEngineHandle) {
        let shared = Arc::new(Shared::default());
        let engine = Self {
            shared: shared.clone(),
            connack: ConnAckBehavior::Respond(ReasonIndicator::Plain(0)),
            connack_delay: Duration::from_millis(10),
            connect_result: Ok(()),
            publish_result: Ok(()),
            subscribe_result: Ok(()),
        };
        (engine, MockEngineHandle { shared })
    }

    pub fn with_connack(mut self, behavior: ConnAckBehavior) -> Self {
        self.connack = behavior;
        self
    }

    pub fn with_connack_delay(mut self, delay: Duration) -> Self {
        self.connack_delay = delay;
        self
    }

    pub fn with_connect_result(mut self, result: Result<(), EngineError>) -> Self {
        self.connect_result = result;
        self
    }

    pub fn with_publish_result(mut self, result: Result<(), EngineError>) -> Self {
        self.publish_result = result;
        self
    }

    pub fn with_subscribe_result(mut self, result: Result<(), EngineError>) -> Self {
        self.subscribe_result = result;
        self
    }
}

impl MockEngineHandle {
    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.shared.calls).clone()
    }

    pub fn publish_calls(&self) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, EngineCall::Publish { .. }))
            .collect()
    }

    pub fn subscribe_calls(&self) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, EngineCall::Subscribe { .. }))
            .collect()
    }

    pub fn clear_history(&self) {
        lock(&self.shared.calls).clear();
    }

    /// Deliver an inbound message through the registered callbacks
    pub fn inject_message(&self, topic: &str, payload: &[u8]) {
        if let Some(callbacks) = self.shared.callbacks() {
            callbacks.on_message(topic, payload);
        }
    }

    pub fn inject_connect(&self, reason: ReasonIndicator) {
        if let Some(callbacks) = self.shared.callbacks() {
            callbacks.on_connect(reason);
        }
    }

    pub fn inject_disconnect(&self, reason: ReasonIndicator) {
        if let Some(callbacks) = self.shared.callbacks() {
            callbacks.on_disconnect(reason);
        }
    }

    pub fn inject_transport_error(&self, cause: &str) {
        if let Some(callbacks) = self.shared.callbacks() {
            callbacks.on_transport_error(cause);
        }
    }

    pub fn inject_suback(&self, message_id: u16, reasons: Vec<ReasonIndicator>) {
        if let Some(callbacks) = self.shared.callbacks() {
            callbacks.on_subscribe(message_id, reasons);
        }
    }
}

#[async_trait]
impl TransportEngine for MockEngine {
    fn set_username(&mut self, username: &str, password: Option<&str>) {
        self.shared.record(EngineCall::SetUsername {
            username: username.to_string(),
            password: password.map(str::to_string),
        });
    }

    fn set_tls_context(&mut self, _tls: TlsContext) {
        self.shared.record(EngineCall::SetTlsContext);
    }

    fn register_callbacks(&mut self, callbacks: Arc<dyn EngineCallbacks>) {
        *lock(&self.shared.callbacks) = Some(callbacks);
        self.shared.record(EngineCall::RegisterCallbacks);
    }

    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        keep_alive: Duration,
    ) -> Result<(), EngineError> {
        self.shared.record(EngineCall::Connect {
            host: host.to_string(),
            port,
            keep_alive,
        });
        self.connect_result.clone()
    }

    fn loop_start(&mut self) -> Result<(), EngineError> {
        self.shared.record(EngineCall::LoopStart);

        let Some(callbacks) = self.shared.callbacks() else {
            return Ok(());
        };
        let behavior = self.connack.clone();
        let delay = self.connack_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match behavior {
                ConnAckBehavior::Respond(reason) => callbacks.on_connect(reason),
                ConnAckBehavior::TransportError(cause) => callbacks.on_transport_error(&cause),
                ConnAckBehavior::Never => {}
            }
        });
        Ok(())
    }

    async fn loop_stop(&mut self) {
        self.shared.record(EngineCall::LoopStop);
    }

    async fn disconnect(&mut self) -> Result<(), EngineError> {
        self.shared.record(EngineCall::Disconnect);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), EngineError> {
        self.shared.record(EngineCall::Publish {
            topic: topic.to_string(),
            payload,
            qos,
        });
        self.publish_result.clone()
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), EngineError> {
        self.shared.record(EngineCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        self.subscribe_result.clone()
    }
}
