//! Shared support for the integration suites.
//!
//! [`FakeDut`] stands in for the device's production HTTP endpoint in
//! hardware-free orchestration tests. [`bench`] bootstraps the real bench
//! for the `#[ignore]`-gated hardware suites and skips when the instrument
//! is absent.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use proxy_harness::dut::{DeviceHttp, HttpReply};
use proxy_harness::error::{HarnessError, HarnessResult};
use proxy_harness::telemetry;
use proxy_harness::HarnessConfig;

// =============================================================================
// FakeDut
// =============================================================================

#[derive(Debug, Default)]
struct FakeDutState {
    status: Value,
    wifi_submissions: Vec<Value>,
    reachable: bool,
    /// Simulate the DUT rebooting mid-response on /api/wifi.
    wifi_times_out: bool,
    /// Become unreachable right after accepting WiFi credentials (reboot).
    reboots_on_wifi: bool,
}

/// In-memory stand-in for the DUT's HTTP endpoint.
#[derive(Clone, Default)]
pub struct FakeDut {
    state: Arc<Mutex<FakeDutState>>,
}

impl FakeDut {
    /// A reachable DUT on the production network with a plausible status.
    pub async fn on_production(ssid: &str) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.state.lock().await;
            state.reachable = true;
            state.status = default_status(ssid);
        }
        fake
    }

    pub async fn set_reachable(&self, reachable: bool) {
        self.state.lock().await.reachable = reachable;
    }

    pub async fn set_status_field(&self, key: &str, value: Value) {
        if let Some(map) = self.state.lock().await.status.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    /// Make `/api/wifi` time out instead of answering (the DUT rebooted
    /// before finishing the response).
    pub async fn wifi_times_out(&self) {
        self.state.lock().await.wifi_times_out = true;
    }

    /// Make the DUT drop off the network after accepting credentials.
    pub async fn reboots_on_wifi(&self) {
        self.state.lock().await.reboots_on_wifi = true;
    }

    /// Every body POSTed to `/api/wifi`, in order.
    pub async fn wifi_submissions(&self) -> Vec<Value> {
        self.state.lock().await.wifi_submissions.clone()
    }
}

pub fn default_status(ssid: &str) -> Value {
    json!({
        "wifi_connected": true,
        "wifi_ssid": ssid,
        "wifi_ip": "192.168.0.177",
        "wifi_rssi": -52,
        "uptime": 3600,
        "free_heap": 180_000,
        "fw_version": "2.4.1",
        "mqtt_connected": true,
        "mqtt_host": "192.168.0.203",
        "mqtt_port": 1883,
        "dtsu_power": 0.0,
        "wallbox_power": 0.0,
        "correction_active": false,
        "dtsu_updates": 0,
        "wallbox_updates": 0,
        "wallbox_errors": 0,
        "debug_mode": false
    })
}

#[async_trait]
impl DeviceHttp for FakeDut {
    async fn get(&self, path: &str) -> HarnessResult<HttpReply> {
        let state = self.state.lock().await;
        if !state.reachable {
            return Err(HarnessError::Unreachable(format!("{path}: no route")));
        }
        match path {
            "/api/status" => Ok(HttpReply {
                status: 200,
                body: state.status.to_string(),
            }),
            _ => Ok(HttpReply {
                status: 404,
                body: String::new(),
            }),
        }
    }

    async fn post_json(&self, path: &str, body: &Value) -> HarnessResult<HttpReply> {
        let mut state = self.state.lock().await;
        if !state.reachable {
            return Err(HarnessError::Unreachable(format!("{path}: no route")));
        }
        match path {
            "/api/wifi" => {
                state.wifi_submissions.push(body.clone());
                if state.reboots_on_wifi {
                    state.reachable = false;
                }
                if state.wifi_times_out {
                    return Err(HarnessError::timeout(
                        "HTTP response from /api/wifi",
                        std::time::Duration::from_secs(5),
                    ));
                }
                Ok(HttpReply {
                    status: 200,
                    body: json!({"status": "ok"}).to_string(),
                })
            }
            _ => Ok(HttpReply {
                status: 404,
                body: String::new(),
            }),
        }
    }
}

// =============================================================================
// Hardware bench bootstrap
// =============================================================================

#[cfg(feature = "instrument_serial")]
pub mod hw {
    use super::*;
    use proxy_harness::dut::DutClient;
    use proxy_harness::instrument::tester::WifiTester;

    /// Everything a hardware test needs: config, the instrument, and a
    /// direct client for the DUT on the production network.
    pub struct Bench {
        pub config: HarnessConfig,
        pub tester: WifiTester,
        pub production: DutClient,
    }

    /// Open the bench, or return `None` (skip) when the instrument is not
    /// connected. Any other setup failure panics: a half-present bench is
    /// a bench problem worth failing loudly on.
    pub async fn bench() -> Option<Bench> {
        telemetry::init_for_tests();
        let config = HarnessConfig::load().expect("harness configuration loads");

        let tester = match WifiTester::open(&config.instrument) {
            Ok(tester) => tester,
            Err(HarnessError::InstrumentUnavailable(reason)) => {
                eprintln!("skipping: WiFi tester not available ({reason})");
                return None;
            }
            Err(e) => panic!("opening WiFi tester: {e}"),
        };
        tester.ping().await.expect("WiFi tester answers ping");

        let production = DutClient::new(&config.dut).expect("DUT client builds");
        Some(Bench {
            config,
            tester,
            production,
        })
    }
}
