//! Offline troubleshooting checks
//!
//! Runs the configuration, private key and token checks without touching the
//! network and reports each as PASS/FAIL with itemized findings. The token
//! check is structural only: the signature is never verified, so a PASS here
//! does not mean the broker will accept the credential.

use crate::config::ClientConfig;
use crate::credentials::{
    build_token, validate_private_key_shape, validate_token_structure, DecodedToken,
    TOKEN_LIFETIME_SECS,
};
use crate::diagnostics_span;
use crate::validation::ConfigValidator;
use std::fmt;
use std::path::Path;
use tracing::{error, info};

/// Remediation steps printed when any check fails
pub const REMEDIATION_CHECKLIST: &str = "\
TROUBLESHOOTING CHECKLIST
==================================================

1. JWT authentication
   - Upload the public key to the Key Vault used by the namespace
   - Grant the Event Grid namespace access to that Key Vault
   - Enable OAuth 2.0 JWT authentication on the namespace
   - Audience must be {namespace}.{region}-1.ts.eventgrid.azure.net/

2. Namespace configuration
   - Enable MQTT on the Event Grid namespace
   - Check the namespace and region names
   - Check that the namespace is in a supported region

3. Key management
   - Use RSA keys of 2048 bits or more
   - Store the private key in PEM format
   - Check that the registered public key matches the private key

4. Network
   - Allow outbound TCP port 8883
   - Check DNS resolution of the broker host
   - Check connectivity to Azure

5. Common mistakes
   - Audience without the trailing slash
   - Client ID longer than 23 characters
   - Expired token
   - Wrong namespace/region combination
";

/// Result of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    /// Failure reasons, or informational lines for a passing check
    pub findings: Vec<String>,
}

impl CheckResult {
    fn pass(name: &'static str, findings: Vec<String>) -> Self {
        Self {
            name,
            passed: true,
            findings,
        }
    }

    fn fail(name: &'static str, findings: Vec<String>) -> Self {
        Self {
            name,
            passed: false,
            findings,
        }
    }
}

/// Outcome of a diagnostics run
#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    pub configuration: CheckResult,
    pub private_key: CheckResult,
    pub token: CheckResult,
    /// Header and claims of the generated token, for display
    pub decoded_token: Option<DecodedToken>,
}

impl DiagnosticReport {
    pub fn all_passed(&self) -> bool {
        self.checks().iter().all(|check| check.passed)
    }

    pub fn checks(&self) -> [&CheckResult; 3] {
        [&self.configuration, &self.private_key, &self.token]
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "VALIDATION RESULTS")?;
        writeln!(f, "{}", "=".repeat(30))?;
        for check in self.checks() {
            let label = format!("{}:", check.name);
            let verdict = if check.passed { "PASS" } else { "FAIL" };
            writeln!(f, "{label:<15}{verdict}")?;
            for finding in &check.findings {
                writeln!(f, "  - {finding}")?;
            }
        }

        if let Some(decoded) = &self.decoded_token {
            writeln!(f)?;
            writeln!(f, "Token header: {}", decoded.header)?;
            if let Some(claims) = &decoded.claims {
                writeln!(f, "Token claims: {claims}")?;
            }
        }
        Ok(())
    }
}

/// Run every check against `config` and the PEM text of the signing key
pub fn run_diagnostics(config: &ClientConfig, private_key_pem: &str) -> DiagnosticReport {
    build_report(config, Ok(private_key_pem))
}

/// Run every check, reading the signing key from `key_path`
///
/// A key file that cannot be read fails the private key check; the other
/// checks still run.
pub fn run_diagnostics_for_key_file(config: &ClientConfig, key_path: &Path) -> DiagnosticReport {
    match std::fs::read_to_string(key_path) {
        Ok(pem) => build_report(config, Ok(&pem)),
        Err(e) => build_report(
            config,
            Err(format!("cannot read {}: {e}", key_path.display())),
        ),
    }
}

fn build_report(config: &ClientConfig, private_key_pem: Result<&str, String>) -> DiagnosticReport {
    let span = diagnostics_span!(namespace = %config.namespace, client_id = %config.client_id);
    let _guard = span.enter();

    let configuration = check_configuration(config);
    let (private_key, pem) = match private_key_pem {
        Ok(pem) => (check_private_key(pem), Some(pem)),
        Err(reason) => (CheckResult::fail("Private Key", vec![reason]), None),
    };

    let (token, decoded_token) = match pem {
        Some(pem) if configuration.passed && private_key.passed => check_token(config, pem),
        _ => (
            CheckResult::fail(
                "JWT Token",
                vec!["skipped: configuration or private key check failed".to_string()],
            ),
            None,
        ),
    };

    let report = DiagnosticReport {
        configuration,
        private_key,
        token,
        decoded_token,
    };
    for check in report.checks() {
        if check.passed {
            info!(check = check.name, "Check passed");
        } else {
            error!(check = check.name, findings = ?check.findings, "Check failed");
        }
    }
    report
}

fn check_configuration(config: &ClientConfig) -> CheckResult {
    let issues = ConfigValidator::diagnose(config);
    if issues.is_empty() {
        CheckResult::pass(
            "Configuration",
            vec![format!(
                "Client ID: '{}' (length: {})",
                config.client_id,
                config.client_id.chars().count()
            )],
        )
    } else {
        CheckResult::fail(
            "Configuration",
            issues.iter().map(ToString::to_string).collect(),
        )
    }
}

fn check_private_key(private_key_pem: &str) -> CheckResult {
    match validate_private_key_shape(private_key_pem) {
        Ok(()) => CheckResult::pass("Private Key", Vec::new()),
        Err(reason) => CheckResult::fail("Private Key", vec![reason.to_string()]),
    }
}

fn check_token(
    config: &ClientConfig,
    private_key_pem: &str,
) -> (CheckResult, Option<DecodedToken>) {
    const NAME: &str = "JWT Token";

    let token = match build_token(
        &config.namespace,
        &config.region,
        &config.client_id,
        private_key_pem,
    ) {
        Ok(token) => token,
        Err(e) => return (CheckResult::fail(NAME, vec![e.to_string()]), None),
    };

    let decoded = match validate_token_structure(token.as_str()) {
        Ok(decoded) => decoded,
        Err(e) => return (CheckResult::fail(NAME, vec![e.to_string()]), None),
    };

    let mut findings = Vec::new();
    match decoded.typed_claims() {
        Some(claims) => {
            if let Err(e) = claims.check(&config.token_audience()) {
                findings.push(e.to_string());
            }
            let lifetime = claims.exp - claims.iat;
            if lifetime != TOKEN_LIFETIME_SECS {
                findings.push(format!(
                    "token lifetime is {lifetime}s, expected {TOKEN_LIFETIME_SECS}s"
                ));
            }
        }
        None => findings.push("claims segment could not be decoded".to_string()),
    }

    let result = if findings.is_empty() {
        CheckResult::pass(
            NAME,
            vec!["structure only; signature not verified".to_string()],
        )
    } else {
        CheckResult::fail(NAME, findings)
    };
    (result, Some(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = include_str!("../tests/fixtures/test_rsa_key.pem");

    fn config_with_files() -> ClientConfig {
        let fixtures = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");
        ClientConfig::new(
            "my-namespace",
            "eastus",
            "ok_Client-1",
            "ok_Client-1",
            format!("{fixtures}/test_rsa_key.pem"),
        )
        .with_client_cert(format!("{fixtures}/test_client_cert.pem"))
    }

    #[test]
    fn test_all_checks_pass() {
        let report = run_diagnostics(&config_with_files(), TEST_KEY);

        assert!(report.all_passed(), "{report}");
        let decoded = report.decoded_token.unwrap();
        assert_eq!(decoded.header["alg"], "RS256");
        assert_eq!(
            decoded.claims.unwrap()["aud"],
            "my-namespace.eastus-1.ts.eventgrid.azure.net/"
        );
    }

    #[test]
    fn test_garbage_key_fails_and_skips_token() {
        let report = run_diagnostics(&config_with_files(), "garbage");

        assert!(report.configuration.passed);
        assert!(!report.private_key.passed);
        assert_eq!(report.private_key.findings, vec!["missing BEGIN marker"]);
        assert!(!report.token.passed);
        assert!(report.decoded_token.is_none());
        assert!(!report.all_passed());
    }

    #[test]
    fn test_region_whitespace_is_a_failure() {
        let mut config = config_with_files();
        config.region = "east us".to_string();

        let report = run_diagnostics(&config, TEST_KEY);

        assert!(!report.configuration.passed);
        assert!(report.configuration.findings[0].contains("Region"));
    }

    #[test]
    fn test_display_lists_findings() {
        let mut config = config_with_files();
        config.client_id = "this-identifier-is-too-long-123".to_string();

        let rendered = run_diagnostics(&config, "garbage").to_string();

        assert!(rendered.contains("Configuration: FAIL"));
        assert!(rendered.contains("31 characters long"));
        assert!(rendered.contains("Private Key:   FAIL"));
        assert!(rendered.contains("JWT Token:     FAIL"));
    }

    #[test]
    fn test_unreadable_key_file_fails_key_check_only() {
        let missing = Path::new("/nonexistent/private_key.pem");

        let report = run_diagnostics_for_key_file(&config_with_files(), missing);

        assert!(report.configuration.passed);
        assert!(!report.private_key.passed);
        assert!(report.private_key.findings[0].starts_with("cannot read /nonexistent/private_key.pem"));
        assert!(!report.token.passed);
        assert!(report.decoded_token.is_none());
    }

    #[test]
    fn test_checklist_mentions_trailing_slash() {
        assert!(REMEDIATION_CHECKLIST.contains("trailing slash"));
        assert!(REMEDIATION_CHECKLIST.contains("8883"));
    }
}
