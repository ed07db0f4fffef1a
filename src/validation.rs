//! Pre-flight configuration validation
//!
//! Two flavours share the same checks:
//!
//! - [`ConfigValidator::validate`] is used before connecting and stops at the
//!   first violated check.
//! - [`ConfigValidator::diagnose`] is used by the troubleshooting tool and
//!   reports every violation it can find.
//!
//! Checks run in a fixed order: required fields, client identifier shape,
//! referenced files, embedded whitespace.

use crate::config::{AuthMode, ClientConfig, ConfigError};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

/// Maximum client identifier length accepted by the broker
pub const MAX_CLIENT_ID_LEN: usize = 23;

/// Static configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Fail-fast validation used before any network activity
    ///
    /// Whitespace in the namespace or region is only logged here; the
    /// diagnostic flavour treats it as a failure.
    pub fn validate(config: &ClientConfig) -> Result<(), ConfigError> {
        info!("Validating configuration");

        if let Some(issue) = Self::presence_issues(config).into_iter().next() {
            return Err(issue);
        }
        validate_client_id(&config.client_id)?;
        if let Some(issue) = Self::file_issues(config).into_iter().next() {
            return Err(issue);
        }
        for issue in Self::whitespace_issues(config) {
            warn!("{} - this may cause issues", issue);
        }

        info!(
            namespace = %config.namespace,
            region = %config.region,
            client_id = %config.client_id,
            client_id_len = config.client_id.len(),
            username = %config.username,
            broker = %config.broker_host(),
            topic_space = %config.topic_space,
            "Configuration validation completed"
        );
        Ok(())
    }

    /// Accumulating validation used by diagnostics
    ///
    /// Returns every violated check; an empty list means the configuration
    /// passed.
    pub fn diagnose(config: &ClientConfig) -> Vec<ConfigError> {
        let mut issues = Self::presence_issues(config);
        if !config.client_id.is_empty() {
            issues.extend(client_id_issues(&config.client_id));
        }
        issues.extend(Self::file_issues(config));
        issues.extend(Self::whitespace_issues(config));
        issues
    }

    /// Like [`diagnose`](Self::diagnose) but folded into a single result
    pub fn validate_all(config: &ClientConfig) -> Result<(), ConfigError> {
        let issues = Self::diagnose(config);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Multiple(
                issues.iter().map(ToString::to_string).collect(),
            ))
        }
    }

    fn presence_issues(config: &ClientConfig) -> Vec<ConfigError> {
        let mut issues = Vec::new();
        let required = [
            ("Namespace", config.namespace.as_str()),
            ("Region", config.region.as_str()),
            ("Client ID", config.client_id.as_str()),
            ("Username", config.username.as_str()),
        ];
        for (field, value) in required {
            if value.is_empty() {
                issues.push(ConfigError::MissingField { field });
            }
        }

        if config.auth == AuthMode::Certificate && !is_set(config.client_cert_file.as_deref()) {
            issues.push(ConfigError::MissingField {
                field: "Client certificate file",
            });
        }
        if config.client_key_file.as_os_str().is_empty() {
            issues.push(ConfigError::MissingField {
                field: "Client private key file",
            });
        }
        issues
    }

    fn file_issues(config: &ClientConfig) -> Vec<ConfigError> {
        let referenced = [
            ("Client certificate", config.client_cert_file.as_deref()),
            ("Client key", Some(config.client_key_file.as_path())),
            ("CA certificate", config.ca_cert_file.as_deref()),
        ];

        referenced
            .into_iter()
            .filter_map(|(kind, path)| match path {
                Some(path) if !path.as_os_str().is_empty() && !path.is_file() => {
                    Some(ConfigError::FileNotFound {
                        kind,
                        path: path.to_path_buf(),
                    })
                }
                _ => None,
            })
            .collect()
    }

    fn whitespace_issues(config: &ClientConfig) -> Vec<ConfigError> {
        [
            ("Namespace", &config.namespace),
            ("Region", &config.region),
        ]
        .into_iter()
        .filter(|(_, value)| value.chars().any(char::is_whitespace))
        .map(|(field, value)| ConfigError::EmbeddedWhitespace {
            field,
            value: value.clone(),
        })
        .collect()
    }
}

fn is_set(path: Option<&Path>) -> bool {
    path.is_some_and(|p| !p.as_os_str().is_empty())
}

/// Validate a client identifier: non-empty, at most 23 characters, and only
/// ASCII letters, digits, `-` and `_`
pub fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    if client_id.is_empty() {
        return Err(ConfigError::MissingField { field: "Client ID" });
    }
    match client_id_issues(client_id).into_iter().next() {
        Some(issue) => Err(issue),
        None => Ok(()),
    }
}

fn client_id_issues(client_id: &str) -> Vec<ConfigError> {
    let mut issues = Vec::new();

    let length = client_id.chars().count();
    if length > MAX_CLIENT_ID_LEN {
        issues.push(ConfigError::ClientIdTooLong {
            client_id: client_id.to_string(),
            length,
        });
    }

    let invalid: BTreeSet<char> = client_id
        .chars()
        .filter(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        .collect();
    if !invalid.is_empty() {
        issues.push(ConfigError::ClientIdInvalidChars {
            client_id: client_id.to_string(),
            invalid: format_char_set(&invalid),
        });
    }
    issues
}

/// Render a character set as `{'!', '@'}`
fn format_char_set(chars: &BTreeSet<char>) -> String {
    let items: Vec<String> = chars.iter().map(|c| format!("{c:?}")).collect();
    format!("{{{}}}", items.join(", "))
}
