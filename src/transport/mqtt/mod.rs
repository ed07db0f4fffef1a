//! MQTT client for Azure Event Grid namespaces
//!
//! # Architecture
//!
//! - [`connection`] - Connection state snapshot and the bounded confirmation wait
//! - [`dispatcher`] - Engine event normalization; sole writer of the state
//! - [`engine`] - rumqttc engines for MQTT 3.1.1 and MQTT 5
//! - [`tls`] - rustls client configuration from PEM material
//! - [`client`] - Connection lifecycle and publish/subscribe
//!
//! # Usage
//!
//! ```rust,no_run
//! use eventgrid_mqtt::config::ClientConfig;
//! use eventgrid_mqtt::transport::mqtt::{Auth, EventGridClient};
//!
//! # tokio_test::block_on(async {
//! let config = ClientConfig::load_from_file("client.toml".as_ref())?;
//! let mut client = EventGridClient::new(config)?;
//!
//! if client.connect(Auth::Certificate).await? {
//!     client.subscribe("devices/+/telemetry").await?;
//!     client
//!         .publish_event("devices/d1/telemetry", &serde_json::json!({"temp": 21}))
//!         .await?;
//!     client.disconnect().await;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod engine;
pub mod tls;

pub use client::{Auth, ConnectError, EventGridClient, PublishError, SubscribeError};
pub use connection::{
    ConnectionState, ConnectionStatus, DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE,
};
pub use dispatcher::{DecodeError, EventDispatcher, InboundMessage, MessageBody};
pub use engine::{engine_for, MqttV311Engine, MqttV5Engine};
pub use tls::{build_tls_context, ClientIdentity, TlsError};
