//! Azure Event Grid MQTT client
//!
//! Connects a single client process to an Event Grid namespace MQTT broker
//! over TLS, authenticating with a client certificate or a signed token, and
//! provides offline diagnostics for authentication failures.
//!
//! # Overview
//!
//! - [`validation`] - Pre-flight configuration checks
//! - [`credentials`] - RS256 token construction and structural checks
//! - [`transport`] - Engine boundary, rumqttc engines and the client
//! - [`diagnostics`] - Troubleshooting report
//!
//! # Quick Start
//!
//! ```rust
//! use eventgrid_mqtt::config::broker_host;
//! use eventgrid_mqtt::validation::validate_client_id;
//!
//! assert_eq!(
//!     broker_host("my-namespace", "eastus"),
//!     "my-namespace.eastus-1.ts.eventgrid.azure.net"
//! );
//! assert!(validate_client_id("ok_Client-1").is_ok());
//! assert!(validate_client_id("this-identifier-is-too-long-123").is_err());
//! ```

pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod error;
pub mod observability;
pub mod testing;
pub mod transport;
pub mod validation;

pub use config::{AuthMode, ClientConfig, ConfigError, ProtocolVersion, BROKER_PORT};
pub use credentials::{build_token, SignedToken};
pub use diagnostics::{run_diagnostics, DiagnosticReport};
pub use error::{ClientError, ClientResult};
pub use transport::mqtt::{Auth, ConnectionState, ConnectionStatus, EventGridClient};
pub use transport::{NormalizedReasonCode, ReasonIndicator};
