//! Connection state shared between the dispatcher and the client
//!
//! The state lives in a `watch` channel: the dispatcher holds the only
//! sender, every reader takes a snapshot through `borrow`, so a reader sees
//! either the previous or the fully updated status.

use crate::transport::NormalizedReasonCode;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Upper bound on the wait for connection confirmation
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Keep-alive interval sent on CONNECT
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Snapshot of the connection state and the last normalized reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub last_reason: Option<NormalizedReasonCode>,
    /// Sanitized cause of the last network or TLS failure
    pub transport_error: Option<String>,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_reason: None,
            transport_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// Wait until the state reaches Connected or `timeout` elapses
///
/// Returns early with `false` when the attempt is refused (state leaves
/// Connecting for Disconnected).
pub async fn wait_for_connection(
    mut status_rx: watch::Receiver<ConnectionStatus>,
    timeout: Duration,
) -> bool {
    let outcome = tokio::time::timeout(timeout, async {
        loop {
            match status_rx.borrow_and_update().state {
                ConnectionState::Connected => return true,
                ConnectionState::Disconnected => return false,
                ConnectionState::Connecting => {}
            }
            if status_rx.changed().await.is_err() {
                return false;
            }
        }
    })
    .await;

    match outcome {
        Ok(connected) => connected,
        Err(_) => {
            debug!(timeout_ms = timeout.as_millis() as u64, "Connection wait elapsed");
            false
        }
    }
}
