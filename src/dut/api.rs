//! JSON bodies of the DUT's REST API.
//!
//! Deserialization is strict on the fields the firmware has always reported;
//! a missing field fails decoding and surfaces as a protocol error, which is
//! exactly what a firmware regression should look like to the suite.

use serde::{Deserialize, Serialize};

/// `GET /api/status`
#[derive(Debug, Clone, Deserialize)]
pub struct DutStatus {
    pub wifi_connected: bool,
    pub wifi_ssid: String,
    pub wifi_ip: String,
    pub wifi_rssi: i32,
    /// Seconds since boot; comparing across an event proves whether the DUT
    /// rebooted in between.
    pub uptime: u64,
    pub free_heap: u64,
    pub fw_version: String,
    pub mqtt_connected: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub dtsu_power: f64,
    pub wallbox_power: f64,
    pub correction_active: bool,
    pub dtsu_updates: u64,
    pub wallbox_updates: u64,
    pub wallbox_errors: u64,
    pub debug_mode: bool,
}

/// `GET /api/config`
#[derive(Debug, Clone, Deserialize)]
pub struct DutConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub wallbox_topic: String,
    pub log_level: u8,
}

/// `POST /api/config` body, discriminated by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConfigUpdate {
    Mqtt {
        host: String,
        port: u16,
        user: String,
        pass: String,
    },
    Wallbox {
        topic: String,
    },
    #[serde(rename = "loglevel")]
    LogLevel {
        level: u8,
    },
    /// Factory reset: clears NVS including stored WiFi credentials.
    Reset,
}

/// `POST /api/wifi` body. An empty password means either "open network" or
/// "use the built-in fallback credentials" depending on context; callers go
/// through [`crate::provision::RestoreTarget`] and
/// [`crate::session::ApSecurity`] rather than building this directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

/// Generic `{status, message?}` acknowledgment.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusReply {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusReply {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// `POST /api/test/inject` body. Omitted fields use the firmware defaults
/// (5000 W, 230 V, 50 Hz, 10 A).
#[derive(Debug, Clone, Default, Serialize)]
pub struct InjectRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
}

impl InjectRequest {
    /// Inject a specific total power, firmware defaults for the rest.
    pub fn power(watts: f64) -> Self {
        Self {
            power_total: Some(watts),
            ..Self::default()
        }
    }
}

/// Successful `POST /api/test/inject` reply: the injected sample after one
/// pass through the correction pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct InjectResponse {
    pub status: String,
    pub dtsu_power: f64,
    pub wallbox_power: f64,
    pub correction_active: bool,
    pub sun2000_power: f64,
}

/// Outcome of an injection attempt; the endpoint is gated on debug mode.
#[derive(Debug, Clone)]
pub enum InjectOutcome {
    Applied(InjectResponse),
    /// 403: debug mode is disabled.
    DebugDisabled,
}
