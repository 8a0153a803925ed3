//! Hardware-free orchestration tests: provisioning, station-join waits, and
//! the restoration guarantee, against the mock instrument and a fake DUT.
//!
//! Time is paused (`start_paused`), so the multi-second join and restore
//! budgets elapse instantly.

mod common;

use std::time::Duration;

use serde_json::json;

use common::FakeDut;
use proxy_harness::config::DutTiming;
use proxy_harness::dut::DutApi;
use proxy_harness::error::HarnessError;
use proxy_harness::instrument::mock::MockInstrument;
use proxy_harness::instrument::StationObservation;
use proxy_harness::provision::{
    await_join, join_test_network, provision, with_dut_on_test_ap, RestoreTarget,
};
use proxy_harness::session::{ApSecurity, NetworkIdentity};

fn station(ip: &str, ssid: &str) -> StationObservation {
    StationObservation {
        ip: ip.parse().unwrap(),
        ssid: ssid.to_string(),
    }
}

fn timing() -> DutTiming {
    DutTiming::default()
}

#[tokio::test(start_paused = true)]
async fn provisioning_tolerates_a_truncated_response() {
    // The DUT reboots before finishing the /api/wifi response; that must
    // read as success, not an error.
    let dut = FakeDut::on_production("HomeNet").await;
    dut.wifi_times_out().await;

    let identity = NetworkIdentity::new("TEST-AB12", ApSecurity::Wpa2("testpass123".into())).unwrap();
    provision(&dut, &identity).await.unwrap();

    let submissions = dut.wifi_submissions().await;
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0], json!({"ssid": "TEST-AB12", "password": "testpass123"}));
}

#[tokio::test(start_paused = true)]
async fn provisioning_fails_when_the_dut_is_unreachable() {
    let dut = FakeDut::on_production("HomeNet").await;
    dut.set_reachable(false).await;

    let identity = NetworkIdentity::ephemeral(ApSecurity::Open);
    let err = provision(&dut, &identity).await.unwrap_err();
    assert!(matches!(err, HarnessError::Unreachable(_)));
}

#[tokio::test(start_paused = true)]
async fn await_join_returns_the_observed_station() {
    let mock = MockInstrument::new();
    mock.schedule_station(Duration::from_secs(20), station("192.168.4.17", "TEST-AB12"));

    let observed = await_join(&mock, &timing()).await.unwrap();
    assert_eq!(observed.ip.to_string(), "192.168.4.17");
    assert!(observed.ip.to_string().starts_with("192.168.4."));
}

#[tokio::test(start_paused = true)]
async fn await_join_times_out_within_the_firmware_budget() {
    // No station ever appears: the wait must end with a timeout at
    // boot_time + connect_timeout, not hang.
    let mock = MockInstrument::new();
    let err = await_join(&mock, &timing()).await.unwrap_err();
    match err {
        HarnessError::Timeout { budget, .. } => {
            assert_eq!(budget, Duration::from_secs(45));
        }
        other => panic!("expected timeout, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn join_captures_the_original_identity_before_mutating() {
    let mock = MockInstrument::new();
    let dut = FakeDut::on_production("HomeNet").await;
    dut.reboots_on_wifi().await;
    mock.schedule_station(Duration::from_secs(5), station("192.168.4.23", "TEST-XY99"));

    let identity = NetworkIdentity::new("TEST-XY99", ApSecurity::Wpa2("pw".into())).unwrap();
    let provisioned = join_test_network(&mock, &dut, &identity, &timing())
        .await
        .unwrap();
    assert_eq!(provisioned.station.ssid, "TEST-XY99");

    // The only wifi submission so far is the provisioning itself.
    let submissions = dut.wifi_submissions().await;
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0]["ssid"], "TEST-XY99");
}

#[tokio::test(start_paused = true)]
async fn restore_reprovisions_the_original_ssid_through_the_relay() {
    let mock = MockInstrument::new();
    let dut = FakeDut::on_production("HomeNet").await;
    mock.schedule_station(Duration::from_secs(5), station("192.168.4.23", "TEST-XY99"));

    let identity = NetworkIdentity::new("TEST-XY99", ApSecurity::Wpa2("pw".into())).unwrap();
    let mut provisioned = join_test_network(&mock, &dut, &identity, &timing())
        .await
        .unwrap();

    provisioned.restore().await;

    // The restore goes through the instrument relay to the DUT's
    // test-network address, with the captured SSID and an empty password
    // (stored-fallback semantics).
    let calls = mock.relayed_calls().await;
    let restore = calls
        .iter()
        .find(|c| c.method == "POST" && c.url == "http://192.168.4.23/api/wifi")
        .expect("restore POST relayed");
    assert_eq!(restore.body.as_ref().unwrap()["ssid"], "HomeNet");
    assert_eq!(restore.body.as_ref().unwrap()["password"], "");
}

#[tokio::test(start_paused = true)]
async fn restore_swallows_a_missing_dut() {
    // Production never comes back: restore must log and return, not error
    // or hang past its budget.
    let mock = MockInstrument::new();
    let dut = FakeDut::on_production("HomeNet").await;
    dut.reboots_on_wifi().await;
    mock.schedule_station(Duration::from_secs(5), station("192.168.4.23", "TEST-XY99"));

    let identity = NetworkIdentity::new("TEST-XY99", ApSecurity::Wpa2("pw".into())).unwrap();
    let mut provisioned = join_test_network(&mock, &dut, &identity, &timing())
        .await
        .unwrap();

    // The DUT is now "rebooting" and never reappears.
    provisioned.restore().await;
    provisioned.restore().await; // idempotent
}

#[tokio::test(start_paused = true)]
async fn scope_restores_and_stops_the_ap_after_the_body() {
    let mock = MockInstrument::new();
    let dut = FakeDut::on_production("HomeNet").await;
    mock.schedule_station(Duration::from_secs(5), station("192.168.4.42", "ignored"));

    let result = with_dut_on_test_ap(
        &mock,
        &dut,
        ApSecurity::Wpa2("testpass123".into()),
        &timing(),
        |joined| async move {
            assert!(joined.identity.ssid().starts_with("TEST-"));
            assert_eq!(joined.station.ip.to_string(), "192.168.4.42");
            Ok(joined.identity.ssid().to_string())
        },
    )
    .await
    .unwrap();
    assert!(result.starts_with("TEST-"));

    // Teardown ran: AP stopped, restore relayed to the test-network address.
    assert!(mock.current_ap().await.is_none());
    let calls = mock.relayed_calls().await;
    assert!(calls
        .iter()
        .any(|c| c.method == "POST" && c.url == "http://192.168.4.42/api/wifi"));
}

#[tokio::test(start_paused = true)]
async fn scope_restores_even_when_the_body_fails() {
    let mock = MockInstrument::new();
    let dut = FakeDut::on_production("HomeNet").await;
    mock.schedule_station(Duration::from_secs(5), station("192.168.4.42", "ignored"));

    let result: Result<(), _> = with_dut_on_test_ap(
        &mock,
        &dut,
        ApSecurity::Wpa2("testpass123".into()),
        &timing(),
        |_joined| async move { Err(HarnessError::Protocol("assertion failed".into())) },
    )
    .await;
    assert!(result.is_err());

    assert!(mock.current_ap().await.is_none(), "AP stopped after failure");
    assert!(
        mock.relayed_calls()
            .await
            .iter()
            .any(|c| c.url.ends_with("/api/wifi")),
        "restore still ran"
    );
}

#[tokio::test(start_paused = true)]
async fn scope_stops_the_ap_when_setup_fails() {
    // No station ever joins: setup fails with a timeout, and the AP the
    // scope started must not stay up.
    let mock = MockInstrument::new();
    let dut = FakeDut::on_production("HomeNet").await;

    let result: Result<(), _> = with_dut_on_test_ap(
        &mock,
        &dut,
        ApSecurity::Wpa2("testpass123".into()),
        &timing(),
        |_joined| async move { Ok(()) },
    )
    .await;
    assert!(result.unwrap_err().is_timeout());
    assert!(mock.current_ap().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn lenient_poll_reports_monotonic_progress_on_timeout() {
    // A counter that only moves forward: even when the target is never
    // reached, the lenient poll returns a value at least as large as the
    // first observation.
    let dut = FakeDut::on_production("HomeNet").await;
    let first = dut.status().await.unwrap().dtsu_updates;

    dut.set_status_field("dtsu_updates", json!(41)).await;
    let last = proxy_harness::poll::poll(
        || dut.status(),
        |s| s.dtsu_updates >= 1_000_000,
        Duration::from_secs(3),
        Duration::from_secs(1),
    )
    .await
    .unwrap();
    assert!(last.dtsu_updates >= first);
    assert_eq!(last.dtsu_updates, 41);
}

#[tokio::test(start_paused = true)]
async fn restore_target_resolves_credentials_by_meaning() {
    let dut = FakeDut::on_production("HomeNet").await;
    let target = RestoreTarget::Network(
        NetworkIdentity::new("LAB-NET", ApSecurity::Wpa2("lab_pass".into())).unwrap(),
    );
    proxy_harness::provision::provision_restore(&dut, &target)
        .await
        .unwrap();

    let submissions = dut.wifi_submissions().await;
    assert_eq!(submissions[0], json!({"ssid": "LAB-NET", "password": "lab_pass"}));
}
