//! WiFi tester instrument adapter.
//!
//! The physical instrument is a serial-controlled AP controller: it can host
//! an access point, watch its station table, scan for networks, join another
//! AP as a station, and relay HTTP requests onto whatever network it is
//! currently on. Its own command protocol is opaque to the rest of the
//! harness, which only sees the [`AccessPointControl`] trait.
//!
//! The instrument and the DUT are process-wide singletons for a bench
//! session. The handle is opened once and passed explicitly to orchestration
//! routines: never stashed in a global: so ownership stays visible and a
//! future lock-based parallelization has a seam to hook into.

pub mod mock;
pub mod mock_serial;
pub mod tester;

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::HarnessResult;

/// The instrument's view of a device that joined its AP.
#[derive(Debug, Clone, Deserialize)]
pub struct StationObservation {
    pub ip: IpAddr,
    pub ssid: String,
}

/// One network visible in an instrument scan.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanNetwork {
    pub ssid: String,
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub auth: Option<String>,
}

/// Result of an instrument scan.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanResult {
    pub networks: Vec<ScanNetwork>,
}

impl ScanResult {
    pub fn contains_ssid(&self, ssid: &str) -> bool {
        self.networks.iter().any(|n| n.ssid == ssid)
    }

    /// Number of networks broadcasting the given SSID. A healthy portal
    /// appears exactly once.
    pub fn count_ssid(&self, ssid: &str) -> usize {
        self.networks.iter().filter(|n| n.ssid == ssid).count()
    }

    pub fn ssids(&self) -> Vec<&str> {
        self.networks.iter().map(|n| n.ssid.as_str()).collect()
    }
}

/// Response to an HTTP request relayed through the instrument.
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: u16,
    pub body: String,
}

/// AP lifecycle, station discovery, and relayed HTTP on the WiFi tester.
///
/// `passphrase` is the raw wire view: an empty string starts an open
/// (unauthenticated) network. The tagged distinction between "open network"
/// and "use stored fallback credentials" lives in the orchestration layer
/// ([`crate::session::ApSecurity`], [`crate::provision::RestoreTarget`]),
/// not at this boundary.
#[async_trait]
pub trait AccessPointControl: Send + Sync {
    /// Start broadcasting an AP. Returns once the AP is up.
    async fn ap_start(&self, ssid: &str, passphrase: &str) -> HarnessResult<()>;

    /// Stop the AP. Stopping an already-stopped AP is not an error.
    async fn ap_stop(&self) -> HarnessResult<()>;

    /// Scan for visible networks.
    async fn scan(&self) -> HarnessResult<ScanResult>;

    /// Block until a station joins the instrument's AP, or `timeout`
    /// elapses ([`crate::error::HarnessError::Timeout`]).
    async fn wait_for_station(&self, timeout: Duration) -> HarnessResult<StationObservation>;

    /// Join another AP as a station (used to reach the DUT's portal).
    async fn sta_join(&self, ssid: &str, timeout: Duration) -> HarnessResult<()>;

    /// Leave the currently joined AP.
    async fn sta_leave(&self) -> HarnessResult<()>;

    /// Relay an HTTP GET onto the instrument's current network.
    async fn http_get(&self, url: &str) -> HarnessResult<RelayResponse>;

    /// Relay an HTTP POST with a JSON body.
    async fn http_post(&self, url: &str, body: &serde_json::Value) -> HarnessResult<RelayResponse>;
}
