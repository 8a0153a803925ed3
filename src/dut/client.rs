//! HTTP transports and typed operations against the DUT.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::api::{
    ConfigUpdate, DutConfig, DutStatus, InjectOutcome, InjectRequest, StatusReply,
};
use crate::config::DutEndpointConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::instrument::{AccessPointControl, StationObservation};

/// Status and body of one HTTP exchange, transport-agnostic.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> HarnessResult<Value> {
        serde_json::from_str(&self.body)
            .map_err(|e| HarnessError::Protocol(format!("body is not JSON: {e}")))
    }

    /// Decode into a typed model; a shape mismatch is a protocol error.
    pub fn decode<T: DeserializeOwned>(&self) -> HarnessResult<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| HarnessError::Protocol(format!("unexpected body shape: {e}")))
    }
}

/// Minimal HTTP surface a DUT transport must provide.
#[async_trait]
pub trait DeviceHttp: Send + Sync {
    async fn get(&self, path: &str) -> HarnessResult<HttpReply>;
    async fn post_json(&self, path: &str, body: &Value) -> HarnessResult<HttpReply>;
}

/// Typed DUT operations, available on any [`DeviceHttp`] transport.
#[async_trait]
pub trait DutApi: DeviceHttp {
    async fn status(&self) -> HarnessResult<DutStatus> {
        let reply = self.get("/api/status").await?;
        if !reply.is_success() {
            return Err(HarnessError::Protocol(format!(
                "/api/status answered {}",
                reply.status
            )));
        }
        reply.decode()
    }

    async fn config(&self) -> HarnessResult<DutConfig> {
        let reply = self.get("/api/config").await?;
        if !reply.is_success() {
            return Err(HarnessError::Protocol(format!(
                "/api/config answered {}",
                reply.status
            )));
        }
        reply.decode()
    }

    async fn apply_config(&self, update: &ConfigUpdate) -> HarnessResult<StatusReply> {
        let body = serde_json::to_value(update)?;
        let reply = self.post_json("/api/config", &body).await?;
        reply.decode()
    }

    async fn set_debug(&self, enabled: bool) -> HarnessResult<StatusReply> {
        let reply = self
            .post_json("/api/debug", &serde_json::json!({"enabled": enabled}))
            .await?;
        reply.decode()
    }

    /// Reboot the DUT. The reply may not arrive before the reboot cuts the
    /// connection, so a transport timeout counts as accepted.
    async fn restart(&self) -> HarnessResult<()> {
        match self.post_json("/api/restart", &serde_json::json!({})).await {
            Ok(_) => Ok(()),
            Err(HarnessError::Timeout { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Push a simulated meter sample through the correction pipeline.
    /// Requires debug mode; a 403 is reported as
    /// [`InjectOutcome::DebugDisabled`], not an error.
    async fn inject(&self, request: &InjectRequest) -> HarnessResult<InjectOutcome> {
        let body = serde_json::to_value(request)?;
        let reply = self.post_json("/api/test/inject", &body).await?;
        match reply.status {
            403 => Ok(InjectOutcome::DebugDisabled),
            200 => Ok(InjectOutcome::Applied(reply.decode()?)),
            status => Err(HarnessError::Protocol(format!(
                "/api/test/inject answered {status}"
            ))),
        }
    }
}

impl<T: DeviceHttp + ?Sized> DutApi for T {}

// =============================================================================
// Direct transport (reqwest)
// =============================================================================

/// Direct HTTP client for a DUT on a reachable network.
pub struct DutClient {
    http: reqwest::Client,
    base_url: String,
    timeout: std::time::Duration,
}

impl DutClient {
    pub fn new(config: &DutEndpointConfig) -> HarnessResult<Self> {
        Self::with_base_url(config.base_url(), config.http_timeout)
    }

    /// Client for an arbitrary base URL (e.g. a DUT address learned from a
    /// station observation).
    pub fn with_base_url(
        base_url: impl Into<String>,
        timeout: std::time::Duration,
    ) -> HarnessResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(&self, path: &str, err: &reqwest::Error) -> HarnessError {
        if err.is_timeout() {
            HarnessError::timeout(format!("HTTP response from {path}"), self.timeout)
        } else {
            HarnessError::Unreachable(format!("{path}: {err}"))
        }
    }
}

#[async_trait]
impl DeviceHttp for DutClient {
    async fn get(&self, path: &str) -> HarnessResult<HttpReply> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| self.transport_error(path, &e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(path, &e))?;
        Ok(HttpReply { status, body })
    }

    async fn post_json(&self, path: &str, body: &Value) -> HarnessResult<HttpReply> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(path, &e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(path, &e))?;
        Ok(HttpReply { status, body })
    }
}

// =============================================================================
// Relayed transport (through the instrument)
// =============================================================================

/// DUT client routed through the WiFi tester's serial relay. Used when the
/// DUT sits on an isolated test network only the instrument can reach.
pub struct RelayClient<'a> {
    instrument: &'a dyn AccessPointControl,
    base_url: String,
}

impl<'a> RelayClient<'a> {
    pub fn new(instrument: &'a dyn AccessPointControl, base_url: impl Into<String>) -> Self {
        Self {
            instrument,
            base_url: base_url.into(),
        }
    }

    /// Client for a DUT observed joining the instrument's AP.
    pub fn for_station(
        instrument: &'a dyn AccessPointControl,
        station: &StationObservation,
    ) -> Self {
        Self::new(instrument, format!("http://{}", station.ip))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl DeviceHttp for RelayClient<'_> {
    async fn get(&self, path: &str) -> HarnessResult<HttpReply> {
        let response = self.instrument.http_get(&self.url(path)).await?;
        Ok(HttpReply {
            status: response.status,
            body: response.body,
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> HarnessResult<HttpReply> {
        let response = self.instrument.http_post(&self.url(path), body).await?;
        Ok(HttpReply {
            status: response.status,
            body: response.body,
        })
    }
}
