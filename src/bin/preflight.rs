//! Bench preflight: verify both external collaborators are present before a
//! suite run: the WiFi tester on its serial port and the DUT on the
//! production network.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use proxy_harness::dut::{DutApi, DutClient};
use proxy_harness::{telemetry, HarnessConfig};

#[derive(Parser)]
#[command(about = "Check that the WiFi tester and the DUT are reachable")]
struct Args {
    /// Skip the instrument check (network-only bench)
    #[arg(long)]
    skip_instrument: bool,

    /// Skip the DUT check (instrument-only bench)
    #[arg(long)]
    skip_dut: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let args = Args::parse();
    let config = HarnessConfig::load().context("loading harness configuration")?;

    if !args.skip_instrument {
        check_instrument(&config).await?;
    }
    if !args.skip_dut {
        check_dut(&config).await?;
    }

    info!("preflight passed");
    Ok(())
}

#[cfg(feature = "instrument_serial")]
async fn check_instrument(config: &HarnessConfig) -> Result<()> {
    use proxy_harness::instrument::tester::WifiTester;

    let tester = WifiTester::open(&config.instrument)
        .with_context(|| format!("opening WiFi tester on {}", config.instrument.port))?;
    let identity = tester.ping().await.context("pinging WiFi tester")?;
    info!(%identity, port = %config.instrument.port, "WiFi tester connected");
    Ok(())
}

#[cfg(not(feature = "instrument_serial"))]
async fn check_instrument(_config: &HarnessConfig) -> Result<()> {
    anyhow::bail!("this build has no serial support; enable the instrument_serial feature")
}

async fn check_dut(config: &HarnessConfig) -> Result<()> {
    let client = DutClient::new(&config.dut).context("building DUT client")?;
    let status = client
        .status()
        .await
        .with_context(|| format!("querying {}/api/status", client.base_url()))?;
    info!(
        fw_version = %status.fw_version,
        ssid = %status.wifi_ssid,
        uptime = status.uptime,
        "DUT reachable on the production network"
    );
    Ok(())
}
