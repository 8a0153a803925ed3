//! Serial driver for the WiFi tester instrument.
//!
//! Wire protocol: newline-delimited JSON, one request line per command,
//! one reply line per request.
//!
//! ```text
//! -> {"cmd":"ap_start","ssid":"TEST-AB12","password":"testpass123"}
//! <- {"ok":true}
//! -> {"cmd":"wait_for_station","timeout_ms":45000}
//! <- {"ok":true,"station":{"ip":"192.168.4.17","ssid":"TEST-AB12"}}
//! <- {"ok":false,"error":"timeout"}
//! ```
//!
//! Command/reply exchanges are serialized through a mutex on the port; the
//! instrument itself is single-threaded, so there is never more than one
//! outstanding command.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

use super::{AccessPointControl, RelayResponse, ScanResult, StationObservation};
#[cfg(feature = "instrument_serial")]
use crate::config::InstrumentConfig;
use crate::error::{HarnessError, HarnessResult};

pub trait SerialIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialIo for T {}
type DynSerial = Box<dyn SerialIo>;
type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Extra slack for relayed HTTP requests on top of the serial exchange
/// budget: the instrument performs a full HTTP transaction before replying.
const RELAY_HTTP_MARGIN: Duration = Duration::from_secs(10);

/// Handle to the physical WiFi tester.
pub struct WifiTester {
    port: SharedPort,
    command_timeout: Duration,
}

impl WifiTester {
    /// Open the instrument on its serial port.
    ///
    /// A port that cannot be opened is reported as
    /// [`HarnessError::InstrumentUnavailable`]; hardware suites translate
    /// that into a session-level skip since it means missing bench hardware,
    /// not a DUT defect.
    #[cfg(feature = "instrument_serial")]
    pub fn open(config: &InstrumentConfig) -> HarnessResult<Self> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio_serial::new(&config.port, config.baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                HarnessError::InstrumentUnavailable(format!("{}: {e}", config.port))
            })?;

        Ok(Self::from_io(Box::new(port), config.command_timeout))
    }

    /// Build a tester over an arbitrary byte stream. Used by protocol tests
    /// with the in-crate mock serial pair.
    pub fn from_io(io: DynSerial, command_timeout: Duration) -> Self {
        Self {
            port: Arc::new(Mutex::new(BufReader::new(io))),
            command_timeout,
        }
    }

    /// Liveness check; returns the instrument's identity object.
    pub async fn ping(&self) -> HarnessResult<Value> {
        self.command(json!({"cmd": "ping"}), self.command_timeout)
            .await
    }

    /// One command/reply exchange. Instrument-reported failures become
    /// [`HarnessError::Instrument`] carrying the instrument's error string.
    async fn command(&self, request: Value, reply_budget: Duration) -> HarnessResult<Value> {
        let cmd = request
            .get("cmd")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string();
        let mut line = request.to_string();
        line.push('\n');

        let mut guard = self.port.lock().await;
        guard.get_mut().write_all(line.as_bytes()).await?;
        guard.get_mut().flush().await?;

        let mut reply_line = String::new();
        let read = tokio::time::timeout(reply_budget, guard.read_line(&mut reply_line))
            .await
            .map_err(|_| HarnessError::timeout(format!("instrument reply to '{cmd}'"), reply_budget))??;
        drop(guard);

        if read == 0 {
            return Err(HarnessError::Instrument(
                "instrument closed the serial stream".to_string(),
            ));
        }
        debug!(%cmd, reply = reply_line.trim(), "instrument exchange");

        let reply: Value = serde_json::from_str(reply_line.trim())
            .map_err(|e| HarnessError::Protocol(format!("instrument reply to '{cmd}': {e}")))?;
        if reply.get("ok").and_then(Value::as_bool) == Some(true) {
            Ok(reply)
        } else {
            let message = reply
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unspecified failure");
            Err(HarnessError::Instrument(format!("'{cmd}': {message}")))
        }
    }

    fn relay_response(reply: &Value) -> HarnessResult<RelayResponse> {
        let status = reply
            .get("status")
            .and_then(Value::as_u64)
            .ok_or_else(|| HarnessError::Protocol("relay reply missing 'status'".to_string()))?;
        let body = reply
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(RelayResponse {
            status: status as u16,
            body,
        })
    }
}

#[async_trait::async_trait]
impl AccessPointControl for WifiTester {
    async fn ap_start(&self, ssid: &str, passphrase: &str) -> HarnessResult<()> {
        self.command(
            json!({"cmd": "ap_start", "ssid": ssid, "password": passphrase}),
            self.command_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn ap_stop(&self) -> HarnessResult<()> {
        self.command(json!({"cmd": "ap_stop"}), self.command_timeout)
            .await
            .map(|_| ())
    }

    async fn scan(&self) -> HarnessResult<ScanResult> {
        let reply = self
            .command(json!({"cmd": "scan"}), self.command_timeout)
            .await?;
        serde_json::from_value(reply).map_err(Into::into)
    }

    async fn wait_for_station(&self, timeout: Duration) -> HarnessResult<StationObservation> {
        // The instrument blocks on its side for up to timeout_ms; the serial
        // read budget covers that plus one command exchange.
        let request = json!({
            "cmd": "wait_for_station",
            "timeout_ms": timeout.as_millis() as u64,
        });
        match self.command(request, timeout + self.command_timeout).await {
            Ok(reply) => {
                let station = reply.get("station").cloned().ok_or_else(|| {
                    HarnessError::Protocol("wait_for_station reply missing 'station'".to_string())
                })?;
                serde_json::from_value(station).map_err(Into::into)
            }
            Err(HarnessError::Instrument(message)) if message.contains("timeout") => Err(
                HarnessError::timeout("a station to join the instrument AP", timeout),
            ),
            Err(e) => Err(e),
        }
    }

    async fn sta_join(&self, ssid: &str, timeout: Duration) -> HarnessResult<()> {
        let request = json!({
            "cmd": "sta_join",
            "ssid": ssid,
            "timeout_ms": timeout.as_millis() as u64,
        });
        match self.command(request, timeout + self.command_timeout).await {
            Ok(_) => Ok(()),
            Err(HarnessError::Instrument(message)) if message.contains("timeout") => Err(
                HarnessError::timeout(format!("station join to '{ssid}'"), timeout),
            ),
            Err(e) => Err(e),
        }
    }

    async fn sta_leave(&self) -> HarnessResult<()> {
        self.command(json!({"cmd": "sta_leave"}), self.command_timeout)
            .await
            .map(|_| ())
    }

    async fn http_get(&self, url: &str) -> HarnessResult<RelayResponse> {
        let reply = self
            .command(
                json!({"cmd": "http_get", "url": url}),
                self.command_timeout + RELAY_HTTP_MARGIN,
            )
            .await?;
        Self::relay_response(&reply)
    }

    async fn http_post(&self, url: &str, body: &Value) -> HarnessResult<RelayResponse> {
        let reply = self
            .command(
                json!({"cmd": "http_post", "url": url, "body": body}),
                self.command_timeout + RELAY_HTTP_MARGIN,
            )
            .await?;
        Self::relay_response(&reply)
    }
}
