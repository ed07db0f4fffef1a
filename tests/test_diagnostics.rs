//! Troubleshooting report tests
//!
//! The report must pinpoint which layer is broken (configuration, key file or
//! token) without any network access.

mod test_helpers;

use eventgrid_mqtt::credentials::validate_token_structure;
use eventgrid_mqtt::diagnostics::{
    run_diagnostics, run_diagnostics_for_key_file, REMEDIATION_CHECKLIST,
};
use test_helpers::{fixtures_dir, test_config, test_key_pem};

#[test]
fn test_valid_setup_passes_every_check() {
    // Arrange
    let config = test_config();

    // Act
    let report = run_diagnostics(&config, &test_key_pem());

    // Assert
    assert!(report.all_passed(), "{report}");
    let decoded = report.decoded_token.as_ref().unwrap();
    assert_eq!(decoded.header["alg"], "RS256");
    assert_eq!(decoded.header["typ"], "JWT");
    let claims = decoded.typed_claims().unwrap();
    assert_eq!(claims.aud, "test-namespace.eastus-1.ts.eventgrid.azure.net/");
    assert_eq!(claims.exp - claims.iat, 3600);
    assert_eq!(claims.iss, "client1");
    assert_eq!(claims.sub, "client1");
}

#[test]
fn test_report_rendering_lists_each_check() {
    let report = run_diagnostics(&test_config(), &test_key_pem());

    let rendered = report.to_string();

    assert!(rendered.contains("Configuration: PASS"));
    assert!(rendered.contains("Private Key:   PASS"));
    assert!(rendered.contains("JWT Token:     PASS"));
    assert!(rendered.contains("signature not verified"));
    assert!(rendered.contains("Token claims:"));
}

#[test]
fn test_key_without_end_marker_fails_shape_check() {
    // Arrange: key file cut off mid-way
    let pem = test_key_pem();
    let truncated = pem.lines().take(5).collect::<Vec<_>>().join("\n");

    // Act
    let report = run_diagnostics(&test_config(), &truncated);

    // Assert
    assert!(report.configuration.passed);
    assert!(!report.private_key.passed);
    assert_eq!(report.private_key.findings, vec!["missing END marker"]);
    assert!(!report.token.passed);
    assert!(!report.all_passed());
}

#[test]
fn test_certificate_in_place_of_key_is_rejected() {
    let cert = std::fs::read_to_string(fixtures_dir().join("test_client_cert.pem")).unwrap();

    let report = run_diagnostics(&test_config(), &cert);

    assert!(!report.private_key.passed);
    assert_eq!(report.private_key.findings, vec!["missing 'PRIVATE KEY' label"]);
}

#[test]
fn test_encrypted_key_passes_shape_but_cannot_sign() {
    // Arrange: shape is fine, but the signer needs a plain key
    let encrypted =
        std::fs::read_to_string(fixtures_dir().join("test_rsa_key_encrypted.pem")).unwrap();

    // Act
    let report = run_diagnostics(&test_config(), &encrypted);

    // Assert
    assert!(report.private_key.passed);
    assert!(!report.token.passed);
    assert!(report.token.findings[0].contains("not a usable RSA PEM key"));
    assert!(report.decoded_token.is_none());
}

#[test]
fn test_configuration_failures_are_accumulated() {
    // Arrange
    let mut config = test_config();
    config.namespace = "my namespace".to_string();
    config.region = "east us".to_string();
    config.client_id = "bad client id with spaces".to_string();

    // Act
    let report = run_diagnostics(&config, &test_key_pem());

    // Assert: every problem listed, token check skipped
    let findings = &report.configuration.findings;
    assert!(!report.configuration.passed);
    assert!(findings.iter().any(|f| f.contains("25 characters long")));
    assert!(findings.iter().any(|f| f.contains("invalid characters")));
    assert!(findings.iter().any(|f| f.starts_with("Namespace contains whitespace")));
    assert!(findings.iter().any(|f| f.starts_with("Region contains whitespace")));
    assert!(report.private_key.passed);
    assert!(!report.token.passed);
}

#[test]
fn test_token_structure_rejects_wrong_shapes() {
    assert!(validate_token_structure("only.two").is_err());
    assert!(validate_token_structure("a.b.c.d").is_err());
    assert!(validate_token_structure("!!!.e30.sig").is_err());
}

#[test]
fn test_checklist_covers_every_area() {
    for section in [
        "JWT authentication",
        "Namespace configuration",
        "Key management",
        "Network",
        "Common mistakes",
    ] {
        assert!(
            REMEDIATION_CHECKLIST.contains(section),
            "checklist is missing '{section}'"
        );
    }
}

#[test]
fn test_missing_key_file_is_reported_as_key_failure() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("private_key.pem");
    let mut config = test_config();
    config.client_id = "this-identifier-is-too-long-123".to_string();

    // Act
    let report = run_diagnostics_for_key_file(&config, &missing);

    // Assert: every check is still reported
    assert!(!report.all_passed());
    assert!(!report.configuration.passed);
    assert!(!report.private_key.passed);
    assert!(report.private_key.findings[0].starts_with("cannot read "));
    let rendered = report.to_string();
    assert!(rendered.contains("Configuration: FAIL"));
    assert!(rendered.contains("Private Key:   FAIL"));
    assert!(rendered.contains("JWT Token:     FAIL"));
}

#[test]
fn test_key_file_is_read_from_disk() {
    let key_path = fixtures_dir().join("test_rsa_key.pem");

    let report = run_diagnostics_for_key_file(&test_config(), &key_path);

    assert!(report.all_passed(), "{report}");
}
