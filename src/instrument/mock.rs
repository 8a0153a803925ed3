//! In-memory instrument for hardware-free orchestration tests.
//!
//! [`MockInstrument`] implements [`AccessPointControl`] against scriptable
//! state: tests schedule station arrivals, set the scan table, and queue
//! relay responses, then assert on the recorded call log afterwards.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::sleep;

use super::{AccessPointControl, RelayResponse, ScanNetwork, ScanResult, StationObservation};
use crate::error::{HarnessError, HarnessResult};

/// One relayed HTTP call recorded by the mock.
#[derive(Debug, Clone)]
pub struct RelayedCall {
    pub method: &'static str,
    pub url: String,
    pub body: Option<Value>,
}

#[derive(Default)]
struct MockState {
    /// Currently broadcasting AP (ssid, passphrase)
    ap: Option<(String, String)>,
    /// Every AP ever started, in order
    ap_history: Vec<(String, String)>,
    ap_stop_calls: usize,
    scan_networks: Vec<ScanNetwork>,
    pending_stations: VecDeque<StationObservation>,
    joined: Option<String>,
    join_refused: bool,
    http_queue: HashMap<(&'static str, String), VecDeque<RelayResponse>>,
    http_log: Vec<RelayedCall>,
}

/// Scriptable in-memory AP controller.
#[derive(Clone, Default)]
pub struct MockInstrument {
    state: Arc<Mutex<MockState>>,
}

impl MockInstrument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a station available to the next `wait_for_station` call.
    pub async fn push_station(&self, station: StationObservation) {
        self.state.lock().await.pending_stations.push_back(station);
    }

    /// Make a station appear after `delay` (simulates DUT reboot + join).
    pub fn schedule_station(&self, delay: Duration, station: StationObservation) {
        let mock = self.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            mock.push_station(station).await;
        });
    }

    pub async fn set_scan(&self, networks: Vec<ScanNetwork>) {
        self.state.lock().await.scan_networks = networks;
    }

    /// Refuse subsequent `sta_join` calls with a timeout.
    pub async fn refuse_joins(&self) {
        self.state.lock().await.join_refused = true;
    }

    /// Queue a canned response for one relayed request. Unqueued requests
    /// answer 404.
    pub async fn queue_http(&self, method: &'static str, url: &str, response: RelayResponse) {
        self.state
            .lock()
            .await
            .http_queue
            .entry((method, url.to_string()))
            .or_default()
            .push_back(response);
    }

    pub async fn current_ap(&self) -> Option<(String, String)> {
        self.state.lock().await.ap.clone()
    }

    pub async fn ap_history(&self) -> Vec<(String, String)> {
        self.state.lock().await.ap_history.clone()
    }

    pub async fn ap_stop_calls(&self) -> usize {
        self.state.lock().await.ap_stop_calls
    }

    pub async fn joined_ssid(&self) -> Option<String> {
        self.state.lock().await.joined.clone()
    }

    pub async fn relayed_calls(&self) -> Vec<RelayedCall> {
        self.state.lock().await.http_log.clone()
    }
}

#[async_trait::async_trait]
impl AccessPointControl for MockInstrument {
    async fn ap_start(&self, ssid: &str, passphrase: &str) -> HarnessResult<()> {
        let mut state = self.state.lock().await;
        state.ap = Some((ssid.to_string(), passphrase.to_string()));
        state
            .ap_history
            .push((ssid.to_string(), passphrase.to_string()));
        Ok(())
    }

    async fn ap_stop(&self) -> HarnessResult<()> {
        let mut state = self.state.lock().await;
        state.ap = None;
        state.ap_stop_calls += 1;
        Ok(())
    }

    async fn scan(&self) -> HarnessResult<ScanResult> {
        let state = self.state.lock().await;
        Ok(ScanResult {
            networks: state.scan_networks.clone(),
        })
    }

    async fn wait_for_station(&self, timeout: Duration) -> HarnessResult<StationObservation> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(station) = state.pending_stations.pop_front() {
                    return Ok(station);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HarnessError::timeout(
                    "a station to join the instrument AP",
                    timeout,
                ));
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    async fn sta_join(&self, ssid: &str, timeout: Duration) -> HarnessResult<()> {
        let mut state = self.state.lock().await;
        if state.join_refused {
            return Err(HarnessError::timeout(
                format!("station join to '{ssid}'"),
                timeout,
            ));
        }
        state.joined = Some(ssid.to_string());
        Ok(())
    }

    async fn sta_leave(&self) -> HarnessResult<()> {
        self.state.lock().await.joined = None;
        Ok(())
    }

    async fn http_get(&self, url: &str) -> HarnessResult<RelayResponse> {
        let mut state = self.state.lock().await;
        state.http_log.push(RelayedCall {
            method: "GET",
            url: url.to_string(),
            body: None,
        });
        Ok(dequeue(&mut state, "GET", url))
    }

    async fn http_post(&self, url: &str, body: &Value) -> HarnessResult<RelayResponse> {
        let mut state = self.state.lock().await;
        state.http_log.push(RelayedCall {
            method: "POST",
            url: url.to_string(),
            body: Some(body.clone()),
        });
        Ok(dequeue(&mut state, "POST", url))
    }
}

fn dequeue(state: &mut MockState, method: &'static str, url: &str) -> RelayResponse {
    state
        .http_queue
        .get_mut(&(method, url.to_string()))
        .and_then(VecDeque::pop_front)
        .unwrap_or(RelayResponse {
            status: 404,
            body: String::new(),
        })
}
