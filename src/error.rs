//! Error taxonomy for the harness.
//!
//! Errors fall into four categories with distinct propagation rules:
//!
//! - **`Timeout`**: a polled condition never became true within its budget.
//!   Raised only by strict waits; lenient polls return the last observation
//!   instead (see [`crate::poll`]).
//! - **`Unreachable`**: a transport-level failure talking to the DUT or the
//!   instrument relay. Retried during polling, surfaced once it persists past
//!   a strict deadline.
//! - **`Protocol`**: malformed JSON or an unexpected field shape from the
//!   DUT. Never retried: it signals a firmware regression, not transient
//!   unavailability.
//! - **`InstrumentUnavailable`**: the physical WiFi tester cannot be opened.
//!   Hardware suites treat this as a session-level skip, not a failure.
//!
//! Setup-phase failures abort a test; teardown-phase failures are caught and
//! logged by the restoration helpers, never re-raised.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the harness error type.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Primary error type for the test harness.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A strict wait ran out of budget. Names the expected condition and the
    /// elapsed budget so a failed bench run is diagnosable from the message.
    #[error("timed out after {budget:?} waiting for {what}")]
    Timeout { what: String, budget: Duration },

    /// Transport-level failure reaching the DUT or the instrument.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The remote answered, but with malformed JSON or an unexpected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The instrument executed a command and reported failure.
    #[error("instrument command failed: {0}")]
    Instrument(String),

    /// The physical test instrument could not be opened or contacted at all.
    #[error("instrument unavailable: {0}")]
    InstrumentUnavailable(String),

    /// A network identity failed validation (e.g. SSID over 32 bytes).
    #[error("invalid network identity: {0}")]
    InvalidIdentity(String),

    /// Configuration loading or harness setup failed.
    #[error("configuration error: {0}")]
    Config(String),

    /// MQTT client or broker failure.
    #[error("MQTT error: {0}")]
    Mqtt(String),

    /// Underlying I/O failure on the serial transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Build a [`HarnessError::Timeout`] naming the awaited condition.
    pub fn timeout(what: impl Into<String>, budget: Duration) -> Self {
        HarnessError::Timeout {
            what: what.into(),
            budget,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout { .. })
    }

    /// Whether a poller should treat this error as "condition not yet true"
    /// and keep retrying until its own deadline.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HarnessError::Timeout { .. } | HarnessError::Unreachable(_) | HarnessError::Io(_)
        )
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        HarnessError::Protocol(err.to_string())
    }
}
