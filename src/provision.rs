//! DUT provisioning and the restoration guarantee.
//!
//! Provisioning tells the DUT to switch WiFi credentials over
//! `POST /api/wifi`, which makes it reboot: often before finishing the
//! response. The controller therefore treats a transport timeout after the
//! request went out as success, then hands the wait over to the instrument's
//! station table.
//!
//! Every provisioning that reboots the DUT is paired with exactly one
//! restoration: [`ProvisionedDut::restore`] re-provisions the original
//! identity and waits (bounded, strict) for the DUT to reappear on the
//! production network. Restoration is best-effort: failures are logged and
//! swallowed, because the DUT has a local fallback credential path that will
//! eventually bring it home without us.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::DutTiming;
use crate::dut::{DeviceHttp, DutApi, DutStatus, WifiCredentials, RelayClient};
use crate::error::{HarnessError, HarnessResult};
use crate::instrument::{AccessPointControl, StationObservation};
use crate::poll::poll_until;
use crate::session::{ApSecurity, NetworkIdentity, TestAp};

/// Budget for the DUT to reappear on the production network after a
/// restoration provisioning.
const RESTORE_BUDGET: Duration = Duration::from_secs(60);

/// Interval for production reachability polling.
const PRODUCTION_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// What to send the DUT when putting it back on its home network.
///
/// The wire protocol overloads an empty password; this type keeps the two
/// meanings apart: reconnecting to a known network carries its real
/// passphrase, while `StoredFallback` deliberately sends an empty password
/// to select the DUT's built-in fallback credentials.
#[derive(Debug, Clone)]
pub enum RestoreTarget {
    /// Reconnect to a specific network with its credentials.
    Network(NetworkIdentity),
    /// Let the DUT fall back to its built-in credentials. The SSID hint may
    /// be empty; the DUT ignores it once the password is empty.
    StoredFallback { ssid: String },
}

impl RestoreTarget {
    fn credentials(&self) -> WifiCredentials {
        match self {
            RestoreTarget::Network(identity) => WifiCredentials {
                ssid: identity.ssid().to_string(),
                password: identity.passphrase().to_string(),
            },
            RestoreTarget::StoredFallback { ssid } => WifiCredentials {
                ssid: ssid.clone(),
                password: String::new(),
            },
        }
    }
}

/// Fire-and-forget WiFi credential submission.
///
/// The HTTP transaction must be issued; the response is best-effort because
/// the DUT may reboot before acknowledging. A transport timeout is success,
/// a connect-level failure is not (the DUT was never reached).
pub async fn provision(http: &dyn DeviceHttp, identity: &NetworkIdentity) -> HarnessResult<()> {
    submit_wifi(
        http,
        &WifiCredentials {
            ssid: identity.ssid().to_string(),
            password: identity.passphrase().to_string(),
        },
    )
    .await
}

/// Fire-and-forget submission of a restoration target.
pub async fn provision_restore(http: &dyn DeviceHttp, target: &RestoreTarget) -> HarnessResult<()> {
    submit_wifi(http, &target.credentials()).await
}

async fn submit_wifi(http: &dyn DeviceHttp, credentials: &WifiCredentials) -> HarnessResult<()> {
    let body = serde_json::to_value(credentials)?;
    match http.post_json("/api/wifi", &body).await {
        Ok(reply) => {
            debug!(ssid = %credentials.ssid, status = reply.status, "wifi config submitted");
            Ok(())
        }
        Err(HarnessError::Timeout { .. }) => {
            debug!(ssid = %credentials.ssid, "DUT rebooted before completing the response");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Block until the instrument observes the DUT joining its AP.
///
/// Budget is boot time plus the DUT's own connect timeout: two additive
/// constants mirrored from firmware via [`DutTiming`].
pub async fn await_join(
    instrument: &dyn AccessPointControl,
    timing: &DutTiming,
) -> HarnessResult<StationObservation> {
    instrument.wait_for_station(timing.join_budget()).await
}

/// Strict wait for the DUT to answer `/api/status` on the production
/// network.
pub async fn wait_for_production(
    production: &dyn DeviceHttp,
    budget: Duration,
) -> HarnessResult<DutStatus> {
    poll_until(
        "DUT reachable on the production network",
        || production.status(),
        |_| true,
        budget,
        PRODUCTION_POLL_INTERVAL,
    )
    .await
}

/// A DUT that has been moved onto a test network, with everything needed to
/// put it back.
pub struct ProvisionedDut<'a> {
    instrument: &'a dyn AccessPointControl,
    production: &'a dyn DeviceHttp,
    /// The instrument's observation of the DUT joining the test AP.
    pub station: StationObservation,
    original: RestoreTarget,
    restored: bool,
}

impl<'a> ProvisionedDut<'a> {
    /// HTTP client for the DUT at its test-network address, relayed through
    /// the instrument.
    pub fn relay(&self) -> RelayClient<'a> {
        RelayClient::for_station(self.instrument, &self.station)
    }

    /// Re-provision the original identity and wait for the DUT to come home.
    ///
    /// Best-effort: every failure is logged and swallowed so a broken
    /// restore can never mask the test's own result or wedge the next test.
    /// Idempotent: the scope helper and an explicit caller may both invoke
    /// it.
    pub async fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;

        let relay = self.relay();
        if let Err(e) = provision_restore(&relay, &self.original).await {
            warn!(error = %e, "restore provisioning failed; relying on the DUT's own fallback");
        }

        match wait_for_production(self.production, RESTORE_BUDGET).await {
            Ok(status) => {
                info!(ssid = %status.wifi_ssid, "DUT back on the production network");
            }
            Err(e) if e.is_timeout() => {
                warn!(
                    error = %e,
                    "DUT not back within budget; its fallback timer may still recover it"
                );
            }
            Err(e) => {
                warn!(error = %e, "production reachability check failed during restore");
            }
        }
    }
}

/// Capture the DUT's current identity, provision it onto `identity`, and
/// wait for it to join the instrument's AP.
///
/// The original SSID is captured *before* any mutation; if the DUT cannot be
/// queried, restoration falls back to the stored-credentials path with an
/// empty hint.
pub async fn join_test_network<'a>(
    instrument: &'a dyn AccessPointControl,
    production: &'a dyn DeviceHttp,
    identity: &NetworkIdentity,
    timing: &DutTiming,
) -> HarnessResult<ProvisionedDut<'a>> {
    let original = match production.status().await {
        Ok(status) => RestoreTarget::StoredFallback {
            ssid: status.wifi_ssid,
        },
        Err(e) => {
            warn!(error = %e, "could not capture original SSID before provisioning");
            RestoreTarget::StoredFallback {
                ssid: String::new(),
            }
        }
    };

    provision(production, identity).await?;
    let station = await_join(instrument, timing).await?;
    info!(ip = %station.ip, ssid = %station.ssid, "DUT joined the test network");

    Ok(ProvisionedDut {
        instrument,
        production,
        station,
        original,
        restored: false,
    })
}

/// The DUT's coordinates on the test network, handed to a test body.
#[derive(Debug, Clone)]
pub struct JoinedDut {
    pub identity: NetworkIdentity,
    pub station: StationObservation,
}

/// Full orchestration scope: fresh AP, DUT provisioned onto it, test body,
/// then restoration and AP stop: in that order, on every exit path.
///
/// Restoration runs before the AP stops (the relay still needs the test
/// network), mirroring the teardown order of the manual sequence. A panic in
/// the body resumes after cleanup.
pub async fn with_dut_on_test_ap<F, Fut, T>(
    instrument: &dyn AccessPointControl,
    production: &dyn DeviceHttp,
    security: ApSecurity,
    timing: &DutTiming,
    body: F,
) -> HarnessResult<T>
where
    F: FnOnce(JoinedDut) -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
{
    let mut ap = TestAp::acquire(instrument, security).await?;

    let mut dut = match join_test_network(instrument, production, ap.identity(), timing).await {
        Ok(dut) => dut,
        Err(e) => {
            if let Err(stop) = ap.release().await {
                warn!(error = %stop, "failed to stop test AP after setup failure");
            }
            return Err(e);
        }
    };

    let joined = JoinedDut {
        identity: ap.identity().clone(),
        station: dut.station.clone(),
    };
    let outcome = AssertUnwindSafe(body(joined)).catch_unwind().await;

    dut.restore().await;
    if let Err(e) = ap.release().await {
        warn!(error = %e, "failed to stop test AP during teardown");
    }

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Submit fallback credentials through an arbitrary transport (used by the
/// portal recovery path, where the portal's own `/api/wifi` is the target).
pub async fn submit_stored_fallback(http: &dyn DeviceHttp) -> HarnessResult<()> {
    let reply = http
        .post_json("/api/wifi", &json!({"ssid": "", "password": ""}))
        .await?;
    if reply.is_success() {
        Ok(())
    } else {
        Err(HarnessError::Protocol(format!(
            "/api/wifi answered {}",
            reply.status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_target_separates_fallback_from_open_network() {
        let fallback = RestoreTarget::StoredFallback {
            ssid: "HomeNet".into(),
        };
        let creds = fallback.credentials();
        assert_eq!(creds.ssid, "HomeNet");
        assert_eq!(creds.password, "");

        let open = RestoreTarget::Network(
            NetworkIdentity::new("OPEN-CAFE", ApSecurity::Open).unwrap(),
        );
        let creds = open.credentials();
        assert_eq!(creds.ssid, "OPEN-CAFE");
        // Same wire bytes, different meaning: the type keeps callers honest.
        assert_eq!(creds.password, "");
    }
}
