//! Client configuration for Event Grid MQTT connections
//!
//! A [`ClientConfig`] is built once at startup (usually from a TOML file) and
//! is read-only afterwards. Loading runs the fail-fast validator so that a
//! config that exists is one that may be used to connect.

use crate::validation::ConfigValidator;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fixed MQTT-over-TLS port used by Event Grid namespaces
pub const BROKER_PORT: u16 = 8883;

/// Host suffix shared by every Event Grid MQTT endpoint
const BROKER_HOST_SUFFIX: &str = "-1.ts.eventgrid.azure.net";

/// Main client configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Event Grid namespace name
    pub namespace: String,
    /// Azure region (e.g. `eastus`, `westus2`)
    pub region: String,
    /// MQTT client identifier (at most 23 chars of `[A-Za-z0-9_-]`)
    pub client_id: String,
    /// Username presented on CONNECT (the client authentication name)
    pub username: String,
    /// Topic space name
    #[serde(default = "default_topic_space")]
    pub topic_space: String,
    /// PEM client certificate (required for certificate auth)
    #[serde(default)]
    pub client_cert_file: Option<PathBuf>,
    /// PEM private key, used for the TLS identity or for token signing
    pub client_key_file: PathBuf,
    /// Optional PEM CA bundle; platform roots are used when absent
    #[serde(default)]
    pub ca_cert_file: Option<PathBuf>,
    /// Passphrase for an encrypted private key
    #[serde(default, skip_serializing)]
    pub key_passphrase: Option<String>,
    /// Environment variable containing the private key passphrase
    #[serde(default)]
    pub key_passphrase_env: Option<String>,
    /// How the client authenticates
    #[serde(default)]
    pub auth: AuthMode,
    /// MQTT protocol revision spoken to the broker
    #[serde(default)]
    pub protocol: ProtocolVersion,
}

fn default_topic_space() -> String {
    "default".to_string()
}

/// Authentication mechanism
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Mutual TLS with a client certificate
    #[default]
    Certificate,
    /// RS256 signed token passed as the CONNECT password
    Token,
}

/// MQTT protocol revision
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// MQTT 3.1.1 - integer return codes
    #[serde(rename = "v311")]
    V311,
    /// MQTT 5 - structured reason codes
    #[default]
    #[serde(rename = "v5")]
    V5,
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("{field} is required")]
    MissingField { field: &'static str },
    #[error("Client ID '{client_id}' is {length} characters long. MQTT client ID must be <= 23 characters")]
    ClientIdTooLong { client_id: String, length: usize },
    #[error("Client ID '{client_id}' contains invalid characters: {invalid}. Only alphanumeric, hyphens, and underscores are allowed")]
    ClientIdInvalidChars { client_id: String, invalid: String },
    #[error("{kind} file not found: {}", .path.display())]
    FileNotFound { kind: &'static str, path: PathBuf },
    #[error("{field} contains whitespace: '{value}'")]
    EmbeddedWhitespace { field: &'static str, value: String },
    #[error("Configuration has {} issue(s): {}", .0.len(), .0.join("; "))]
    Multiple(Vec<String>),
}

impl ClientConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_from_file(path)?;

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Parse a TOML file without validating it
    ///
    /// Used by diagnostics, which reports every issue instead of stopping at
    /// the first one.
    pub fn read_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Broker host name: `{namespace}.{region}-1.ts.eventgrid.azure.net`
    pub fn broker_host(&self) -> String {
        broker_host(&self.namespace, &self.region)
    }

    /// Audience expected in signed tokens (broker host with trailing slash)
    pub fn token_audience(&self) -> String {
        token_audience(&self.namespace, &self.region)
    }

    /// CA bundle path, if one is configured
    pub fn ca_file(&self) -> Option<&Path> {
        self.ca_cert_file
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    /// Resolve the private key passphrase, preferring the inline value
    pub fn key_passphrase(&self) -> Result<Option<String>, ConfigError> {
        if let Some(passphrase) = &self.key_passphrase {
            return Ok(Some(passphrase.clone()));
        }
        match &self.key_passphrase_env {
            Some(name) => std::env::var(name)
                .map(Some)
                .map_err(|_| ConfigError::EnvVarNotFound(name.clone())),
            None => Ok(None),
        }
    }

    /// Create a configuration with the given identity and default options
    pub fn new(
        namespace: impl Into<String>,
        region: impl Into<String>,
        client_id: impl Into<String>,
        username: impl Into<String>,
        client_key_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            region: region.into(),
            client_id: client_id.into(),
            username: username.into(),
            topic_space: default_topic_space(),
            client_cert_file: None,
            client_key_file: client_key_file.into(),
            ca_cert_file: None,
            key_passphrase: None,
            key_passphrase_env: None,
            auth: AuthMode::default(),
            protocol: ProtocolVersion::default(),
        }
    }

    /// Set the client certificate used for mutual TLS
    pub fn with_client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_file = Some(path.into());
        self
    }

    /// Set the CA bundle used as trust anchor
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_file = Some(path.into());
        self
    }

    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }
}

/// Derive the broker host for a namespace/region pair
pub fn broker_host(namespace: &str, region: &str) -> String {
    format!("{namespace}.{region}{BROKER_HOST_SUFFIX}")
}

/// Derive the token audience for a namespace/region pair
pub fn token_audience(namespace: &str, region: &str) -> String {
    format!("{}/", broker_host(namespace, region))
}
