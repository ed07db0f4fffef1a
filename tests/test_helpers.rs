//! Test helpers and utilities for integration tests

use eventgrid_mqtt::config::{AuthMode, ClientConfig};
use std::path::PathBuf;

/// Directory holding the PEM fixtures
#[allow(dead_code)]
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Text of the unencrypted RSA signing key fixture
#[allow(dead_code)]
pub fn test_key_pem() -> String {
    std::fs::read_to_string(fixtures_dir().join("test_rsa_key.pem")).unwrap()
}

/// Certificate-auth configuration whose files all exist
///
/// The self-signed client certificate doubles as CA bundle so the TLS
/// context can be built without touching the platform store.
#[allow(dead_code)]
pub fn test_config() -> ClientConfig {
    let fixtures = fixtures_dir();
    ClientConfig::new(
        "test-namespace",
        "eastus",
        "client1",
        "client1",
        fixtures.join("test_rsa_key.pem"),
    )
    .with_client_cert(fixtures.join("test_client_cert.pem"))
    .with_ca_cert(fixtures.join("test_client_cert.pem"))
}

/// Token-auth configuration without a client certificate
#[allow(dead_code)]
pub fn token_config() -> ClientConfig {
    let mut config = test_config().with_auth(AuthMode::Token);
    config.client_cert_file = None;
    config
}
