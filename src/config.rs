//! Harness configuration.
//!
//! Configuration is loaded from three layers, later layers overriding earlier:
//!
//! 1. Built-in defaults (a bench with one DUT, one broker, one tester)
//! 2. `harness.toml` in the working directory
//! 3. Environment variables prefixed with `HARNESS_`, nested fields separated
//!    by `__` (e.g. `HARNESS_DUT__IP`, `HARNESS_INSTRUMENT__PORT`,
//!    `HARNESS_TIMING__CONNECT_TIMEOUT=30s`)
//!
//! The [`DutTiming`] block mirrors constants owned by the DUT's firmware
//! (boot time, WiFi connect timeout, portal thresholds). They are configured
//! here rather than hard-coded so a firmware timing change only requires a
//! config update, not a harness edit.

use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Top-level harness configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// DUT addressing on the production network
    pub dut: DutEndpointConfig,
    /// MQTT broker and topic layout
    pub mqtt: MqttConfig,
    /// WiFi tester instrument transport
    pub instrument: InstrumentConfig,
    /// Firmware-mirrored timing constants
    pub timing: DutTiming,
    /// Captive portal identity of the DUT
    pub portal: PortalConfig,
}

impl HarnessConfig {
    /// Load configuration from defaults, `harness.toml`, and the environment.
    pub fn load() -> HarnessResult<Self> {
        Figment::from(Serialized::defaults(HarnessConfig::default()))
            .merge(Toml::file("harness.toml"))
            .merge(Env::prefixed("HARNESS_").split("__"))
            .extract()
            .map_err(|e| HarnessError::Config(e.to_string()))
    }
}

/// Where to find the DUT on the production network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DutEndpointConfig {
    /// DUT IP address on the production network
    pub ip: String,
    /// Per-request HTTP timeout
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
}

impl DutEndpointConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.ip)
    }
}

impl Default for DutEndpointConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.0.177".to_string(),
            http_timeout: Duration::from_secs(5),
        }
    }
}

/// MQTT broker access and the DUT's topic layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Telemetry topic the DUT subscribes to for wallbox power
    pub wallbox_topic: String,
    /// Config command topic
    pub command_topic: String,
    /// Topic the DUT publishes command replies on
    pub response_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.203".to_string(),
            port: 1883,
            username: "admin".to_string(),
            password: "admin".to_string(),
            wallbox_topic: "wallbox".to_string(),
            command_topic: "MBUS-PROXY/cmd/config".to_string(),
            response_topic: "MBUS-PROXY/cmd/config/response".to_string(),
        }
    }
}

/// Serial transport to the WiFi tester instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Serial port path (e.g. `/dev/ttyACM0`)
    pub port: String,
    pub baud: u32,
    /// Budget for a single command/reply exchange on the serial link
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud: 115_200,
            command_timeout: Duration::from_secs(10),
        }
    }
}

/// Timing constants mirroring the DUT's firmware.
///
/// `boot_time` and `connect_timeout` are additive and independently
/// configured: a station-join wait must cover a full reboot plus the DUT's
/// own WiFi connect window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DutTiming {
    /// Seconds from reboot until the DUT starts its WiFi connect attempt
    #[serde(with = "humantime_serde")]
    pub boot_time: Duration,
    /// The DUT's internal WiFi connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Boot overhead added to each failed connect cycle
    #[serde(with = "humantime_serde")]
    pub boot_overhead: Duration,
    /// Consecutive failed boots that trigger the captive portal
    pub portal_boot_threshold: u32,
    /// How long the DUT keeps its portal open before rebooting
    #[serde(with = "humantime_serde")]
    pub portal_timeout: Duration,
}

impl DutTiming {
    /// Deadline for the instrument to observe the DUT joining a test AP:
    /// one reboot plus the DUT's own connect window.
    pub fn join_budget(&self) -> Duration {
        self.boot_time + self.connect_timeout
    }

    /// Duration of one failed boot cycle (connect timeout runs out, DUT
    /// reboots).
    pub fn failed_boot_cycle(&self) -> Duration {
        self.connect_timeout + self.boot_overhead
    }
}

impl Default for DutTiming {
    fn default() -> Self {
        Self {
            boot_time: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(30),
            boot_overhead: Duration::from_secs(5),
            portal_boot_threshold: 3,
            portal_timeout: Duration::from_secs(300),
        }
    }
}

/// The DUT's captive portal identity. Fixed by firmware; listed here so the
/// harness follows a firmware change without a code edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// SSID of the portal AP the DUT hosts after repeated failures
    pub ssid: String,
    /// Fixed address of the portal HTTP server
    pub ip: String,
    /// Budget for the instrument to join the portal AP as a station
    #[serde(with = "humantime_serde")]
    pub join_timeout: Duration,
}

impl PortalConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.ip)
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            ssid: "MODBUS-Proxy-Setup".to_string(),
            ip: "192.168.4.1".to_string(),
            join_timeout: Duration::from_secs(10),
        }
    }
}
