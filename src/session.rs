//! Ephemeral test network lifecycle.
//!
//! A test that needs the DUT on a controlled network acquires a [`TestAp`]:
//! a freshly named access point on the instrument, stopped again when the
//! test is done. SSIDs carry a random suffix so reruns and parallel benches
//! never collide with a credential the DUT may still have stored.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{HarnessError, HarnessResult};
use crate::instrument::AccessPointControl;

/// Maximum SSID length in bytes (802.11 limit, enforced by the instrument).
pub const MAX_SSID_BYTES: usize = 32;

/// Security mode of a test AP. An explicit tagged choice: an open network is
/// a capability under test, not a missing password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApSecurity {
    Open,
    Wpa2(String),
}

impl ApSecurity {
    /// Raw wire view: the empty string starts an open network.
    pub fn passphrase(&self) -> &str {
        match self {
            ApSecurity::Open => "",
            ApSecurity::Wpa2(passphrase) => passphrase,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ApSecurity::Open)
    }
}

/// Identity of one network: SSID plus security mode. Immutable once created.
#[derive(Debug, Clone)]
pub struct NetworkIdentity {
    ssid: String,
    security: ApSecurity,
}

impl NetworkIdentity {
    pub fn new(ssid: impl Into<String>, security: ApSecurity) -> HarnessResult<Self> {
        let ssid = ssid.into();
        if ssid.is_empty() {
            return Err(HarnessError::InvalidIdentity("empty SSID".to_string()));
        }
        if ssid.len() > MAX_SSID_BYTES {
            return Err(HarnessError::InvalidIdentity(format!(
                "SSID '{ssid}' is {} bytes, maximum is {MAX_SSID_BYTES}",
                ssid.len()
            )));
        }
        Ok(Self { ssid, security })
    }

    /// A collision-free identity for one test run: `TEST-`/`OPEN-` plus a
    /// random six-character suffix.
    pub fn ephemeral(security: ApSecurity) -> Self {
        let prefix = if security.is_open() { "OPEN" } else { "TEST" };
        let hex = Uuid::new_v4().simple().to_string();
        Self {
            ssid: format!("{prefix}-{}", hex[..6].to_uppercase()),
            security,
        }
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn security(&self) -> &ApSecurity {
        &self.security
    }

    pub fn passphrase(&self) -> &str {
        self.security.passphrase()
    }
}

/// A running test AP on the instrument.
///
/// `acquire` returns only once the AP is broadcasting; [`TestAp::release`]
/// stops it and is idempotent. Prefer [`with_test_ap`], which guarantees the
/// stop on every exit path including a panicking test body.
pub struct TestAp<'a> {
    instrument: &'a dyn AccessPointControl,
    identity: NetworkIdentity,
    active: bool,
}

impl<'a> TestAp<'a> {
    pub async fn acquire(
        instrument: &'a dyn AccessPointControl,
        security: ApSecurity,
    ) -> HarnessResult<TestAp<'a>> {
        Self::acquire_named(instrument, NetworkIdentity::ephemeral(security)).await
    }

    pub async fn acquire_named(
        instrument: &'a dyn AccessPointControl,
        identity: NetworkIdentity,
    ) -> HarnessResult<TestAp<'a>> {
        instrument
            .ap_start(identity.ssid(), identity.passphrase())
            .await?;
        info!(ssid = identity.ssid(), open = identity.security().is_open(), "test AP up");
        Ok(Self {
            instrument,
            identity,
            active: true,
        })
    }

    pub fn identity(&self) -> &NetworkIdentity {
        &self.identity
    }

    /// Stop the AP. Calling release twice is a no-op, not an error.
    pub async fn release(&mut self) -> HarnessResult<()> {
        if !self.active {
            return Ok(());
        }
        self.instrument.ap_stop().await?;
        self.active = false;
        info!(ssid = self.identity.ssid(), "test AP stopped");
        Ok(())
    }
}

impl Drop for TestAp<'_> {
    fn drop(&mut self) {
        if self.active {
            // No async drop; the scope helpers release explicitly. Reaching
            // this means a caller bypassed them.
            warn!(
                ssid = self.identity.ssid(),
                "test AP dropped without release; instrument still broadcasting"
            );
        }
    }
}

/// Run `body` with a fresh test AP, guaranteeing `ap_stop` afterwards.
///
/// The body receives the AP's identity. A panic inside the body is caught,
/// the AP is stopped, and the panic resumes; a teardown failure is logged,
/// never raised over the body's outcome.
pub async fn with_test_ap<F, Fut, T>(
    instrument: &dyn AccessPointControl,
    security: ApSecurity,
    body: F,
) -> HarnessResult<T>
where
    F: FnOnce(NetworkIdentity) -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
{
    let mut ap = TestAp::acquire(instrument, security).await?;
    let identity = ap.identity().clone();

    let outcome = AssertUnwindSafe(body(identity)).catch_unwind().await;

    if let Err(e) = ap.release().await {
        warn!(error = %e, "failed to stop test AP during teardown");
        ap.active = false;
    }

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::MockInstrument;

    #[test]
    fn ephemeral_identities_do_not_collide() {
        let a = NetworkIdentity::ephemeral(ApSecurity::Wpa2("pw".into()));
        let b = NetworkIdentity::ephemeral(ApSecurity::Wpa2("pw".into()));
        assert_ne!(a.ssid(), b.ssid());
        assert!(a.ssid().starts_with("TEST-"));
        assert!(a.ssid().len() <= MAX_SSID_BYTES);

        let open = NetworkIdentity::ephemeral(ApSecurity::Open);
        assert!(open.ssid().starts_with("OPEN-"));
        assert_eq!(open.passphrase(), "");
    }

    #[test]
    fn oversized_ssid_is_rejected() {
        let err = NetworkIdentity::new("A".repeat(33), ApSecurity::Open).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidIdentity(_)));
        assert!(NetworkIdentity::new("A".repeat(32), ApSecurity::Open).is_ok());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let mock = MockInstrument::new();
        let mut ap = TestAp::acquire(&mock, ApSecurity::Wpa2("testpass123".into()))
            .await
            .unwrap();
        assert!(mock.current_ap().await.is_some());

        ap.release().await.unwrap();
        ap.release().await.unwrap();
        assert!(mock.current_ap().await.is_none());
        assert_eq!(mock.ap_stop_calls().await, 1);
    }

    #[tokio::test]
    async fn scope_releases_on_body_error() {
        let mock = MockInstrument::new();
        let result: HarnessResult<()> = with_test_ap(&mock, ApSecurity::Open, |_identity| async {
            Err(HarnessError::Unreachable("dut gone".into()))
        })
        .await;
        assert!(result.is_err());
        assert!(mock.current_ap().await.is_none());
    }

    #[tokio::test]
    async fn scope_releases_on_panic() {
        let mock = MockInstrument::new();
        let attempt = AssertUnwindSafe(with_test_ap(&mock, ApSecurity::Open, |_identity| async {
            assert!(false, "test body exploded");
            Ok(())
        }))
        .catch_unwind()
        .await;
        assert!(attempt.is_err(), "panic propagates");
        assert!(mock.current_ap().await.is_none(), "AP stopped regardless");
    }
}
