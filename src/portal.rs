//! Captive portal trigger and recovery.
//!
//! The DUT enters portal mode after a fixed number of consecutive failed
//! WiFi boots:
//!
//! ```text
//! Normal -> Connecting(1) -> Failed(1)
//!        -> Connecting(2) -> Failed(2)
//!        -> Connecting(3) -> Failed(3) -> PortalActive
//! PortalActive -> Provisioning -> Connecting(0) -> Normal
//! ```
//!
//! Every transition is driven by the DUT's own firmware; the harness only
//! provokes the first one (by provisioning toward a network that is not
//! broadcasting) and observes the result. Because nothing is observable
//! mid-flight: the portal SSID appears only after the whole sequence: the
//! trigger blocks for a computed worst case instead of polling:
//!
//! `threshold x (connect_timeout + boot_overhead) + margin`
//!
//! A firmware timing change only requires updating [`DutTiming`].

use std::time::Duration;

use tracing::{info, warn};

use crate::config::{DutTiming, HarnessConfig, PortalConfig};
use crate::dut::{DeviceHttp, RelayClient, WifiCredentials};
use crate::error::{HarnessError, HarnessResult};
use crate::instrument::AccessPointControl;
use crate::poll::blind_wait;
use crate::provision;
use crate::session::NetworkIdentity;

/// Settling margin on top of the computed worst-case activation time.
const ACTIVATION_MARGIN: Duration = Duration::from_secs(10);

/// Extra budget for the DUT to reboot out of portal mode during recovery.
const RECOVERY_MARGIN: Duration = Duration::from_secs(30);

/// Observed phase of the DUT's connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalPhase {
    /// Reachable on a network matching its credentials.
    Normal,
    /// Attempting to connect; `n` failed boots so far this streak.
    Connecting(u32),
    /// Connect window elapsed without a join; about to reboot.
    Failed(u32),
    /// Hosting its own configuration AP.
    PortalActive,
    /// A provisioning request was submitted through the portal.
    Provisioning,
}

impl PortalPhase {
    /// Phase after one more failed connect window, given the firmware's
    /// boot-failure threshold.
    pub fn after_connect_failure(self, threshold: u32) -> PortalPhase {
        match self {
            PortalPhase::Normal => PortalPhase::Failed(1),
            PortalPhase::Connecting(n) | PortalPhase::Failed(n) if n + 1 >= threshold => {
                PortalPhase::PortalActive
            }
            PortalPhase::Connecting(n) | PortalPhase::Failed(n) => PortalPhase::Failed(n + 1),
            PortalPhase::PortalActive | PortalPhase::Provisioning => self,
        }
    }
}

/// Worst-case duration from provisioning-toward-a-dark-network until the
/// portal SSID is broadcasting.
pub fn worst_case_activation(timing: &DutTiming) -> Duration {
    timing.failed_boot_cycle() * timing.portal_boot_threshold + ACTIVATION_MARGIN
}

/// Drives the DUT into portal mode and back out.
pub struct PortalSequence<'a> {
    instrument: &'a dyn AccessPointControl,
    portal: PortalConfig,
    timing: DutTiming,
}

impl<'a> PortalSequence<'a> {
    pub fn new(instrument: &'a dyn AccessPointControl, config: &HarnessConfig) -> Self {
        Self {
            instrument,
            portal: config.portal.clone(),
            timing: config.timing,
        }
    }

    /// Provoke portal mode: darken the bait network, provision the DUT
    /// toward it, wait out the failed boot cycles, and verify the portal
    /// SSID is broadcasting.
    ///
    /// Fails with a named [`HarnessError::Timeout`] listing the visible
    /// networks when the portal never appears.
    pub async fn trigger(
        &self,
        production: &dyn DeviceHttp,
        bait: &NetworkIdentity,
    ) -> HarnessResult<PortalHandle<'a>> {
        // The bait AP must be dark so every connect attempt fails.
        self.instrument.ap_stop().await?;
        provision::provision(production, bait).await?;

        let wait = worst_case_activation(&self.timing);
        info!(
            cycles = self.timing.portal_boot_threshold,
            ?wait,
            "waiting out failed boot cycles"
        );
        blind_wait("portal activation after repeated connect failures", wait).await;

        let scan = self.instrument.scan().await?;
        if !scan.contains_ssid(&self.portal.ssid) {
            return Err(HarnessError::Timeout {
                what: format!(
                    "portal SSID '{}' in scan (visible: {:?})",
                    self.portal.ssid,
                    scan.ssids()
                ),
                budget: wait,
            });
        }
        info!(ssid = %self.portal.ssid, "portal is broadcasting");

        Ok(PortalHandle {
            instrument: self.instrument,
            portal: self.portal.clone(),
            timing: self.timing,
        })
    }
}

/// An active captive portal on the DUT.
pub struct PortalHandle<'a> {
    instrument: &'a dyn AccessPointControl,
    portal: PortalConfig,
    timing: DutTiming,
}

impl std::fmt::Debug for PortalHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalHandle")
            .field("portal", &self.portal)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

impl<'a> PortalHandle<'a> {
    pub fn ssid(&self) -> &str {
        &self.portal.ssid
    }

    /// HTTP client for the portal's fixed address, relayed through the
    /// instrument. Only meaningful while joined to the portal AP.
    pub fn client(&self) -> RelayClient<'a> {
        RelayClient::new(self.instrument, self.portal.base_url())
    }

    /// Join the portal AP as a station.
    pub async fn join(&self) -> HarnessResult<()> {
        self.instrument
            .sta_join(&self.portal.ssid, self.portal.join_timeout)
            .await
    }

    pub async fn leave(&self) -> HarnessResult<()> {
        self.instrument.sta_leave().await
    }

    /// Submit credentials through the portal's own `/api/wifi`: join the
    /// portal AP, POST, leave. A successful submission reboots the DUT
    /// toward the new credentials, resetting its failure counter.
    pub async fn provision_via_portal(&self, credentials: &WifiCredentials) -> HarnessResult<()> {
        self.join().await?;
        let result = async {
            let body = serde_json::to_value(credentials)?;
            let reply = self.client().post_json("/api/wifi", &body).await?;
            if reply.is_success() {
                Ok(())
            } else {
                Err(HarnessError::Protocol(format!(
                    "portal /api/wifi answered {}",
                    reply.status
                )))
            }
        }
        .await;
        if let Err(e) = self.leave().await {
            warn!(error = %e, "failed to leave the portal AP");
        }
        result
    }

    /// Best-effort recovery: submit the stored-fallback credentials through
    /// the portal, then wait (strict, bounded by the portal's own timeout
    /// plus margin) for the DUT to reappear on the production network.
    /// Failures are logged and swallowed: the portal times out on its own
    /// and the DUT falls back without us.
    pub async fn recover(&self, production: &dyn DeviceHttp) {
        let fallback = WifiCredentials {
            ssid: String::new(),
            password: String::new(),
        };
        if let Err(e) = self.provision_via_portal(&fallback).await {
            warn!(error = %e, "portal recovery provisioning failed; waiting for portal timeout");
        }

        let budget = self.timing.portal_timeout + RECOVERY_MARGIN;
        match provision::wait_for_production(production, budget).await {
            Ok(status) => info!(ssid = %status.wifi_ssid, "DUT recovered to production"),
            Err(e) => warn!(error = %e, "DUT not back after portal recovery; leaving it to its fallback timer"),
        }
    }
}
