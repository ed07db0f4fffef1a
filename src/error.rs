//! Crate-wide error type and log sanitizing
//!
//! Each concern has its own error enum next to the code that raises it;
//! [`ClientError`] collects them for callers that want a single type.

use crate::config::ConfigError;
use crate::credentials::TokenError;
use crate::transport::mqtt::client::{ConnectError, PublishError, SubscribeError};
use crate::transport::NormalizedReasonCode;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Maximum length of a sanitized message
const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Connection was not confirmed within {timeout_secs}s")]
    TimeoutNotConnected { timeout_secs: u64 },

    #[error("Failed to connect to broker: {reason}")]
    ConnectionRefused { reason: NormalizedReasonCode },

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Subscribe error: {0}")]
    Subscribe(#[from] SubscribeError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid event data: {0}")]
    EventData(#[from] serde_json::Error),

    #[error("Failed to render configuration: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    #[error("No configuration file found. Please provide one with -c/--config or create eventgrid.toml")]
    NoConfigFile,

    #[error("{failed} diagnostic check(s) failed")]
    DiagnosticsFailed { failed: usize },
}

impl ClientError {
    /// Display text with secrets redacted
    pub fn sanitized(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

static REDACTIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        // JWT-shaped strings
        (
            r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]*",
            "***JWT***",
        ),
        (r"(?i)(password|passphrase|token|key|secret)[=:]\s*\S+", "${1}=***"),
        (
            r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+",
            "/***REDACTED***/",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| {
        Regex::new(pattern).ok().map(|regex| (regex, replacement))
    })
    .collect()
});

/// Redact credentials from a message before it is logged or displayed
///
/// Truncates to 500 bytes on a character boundary.
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for (regex, replacement) in REDACTIONS.iter() {
        sanitized = regex.replace_all(&sanitized, *replacement).into_owned();
    }

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}
