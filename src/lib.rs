//! Black-box test harness for the Modbus power-correction proxy.
//!
//! The device under test (DUT) is an embedded Modbus-to-inverter proxy,
//! reached only over its network interfaces: a REST API, an MQTT
//! command/telemetry surface, and WiFi provisioning with a captive-portal
//! recovery flow. This crate contains no firmware: it orchestrates the DUT
//! and a serial-controlled WiFi tester instrument from the outside.
//!
//! # Architecture
//!
//! - [`instrument`]: adapter for the WiFi tester (AP lifecycle, station
//!   table, scans, relayed HTTP), plus an in-memory mock.
//! - [`session`]: ephemeral test AP lifecycle with guaranteed release.
//! - [`provision`]: moves the DUT between networks and guarantees it is
//!   restored to its production identity afterwards, whatever the test did.
//! - [`poll`]: lenient/strict poll-until-predicate primitives and the
//!   blind wait used where transitions cannot be observed mid-flight.
//! - [`portal`]: drives the DUT's three-strikes captive portal flow.
//! - [`dut`]: typed REST access over direct HTTP or the instrument relay.
//! - [`mqtt`]: telemetry injection and command round-trips.
//!
//! Everything is polling: the DUT and the instrument expose request/response
//! and scan-table interfaces only, so waits are sleep-then-check with
//! per-operation budgets. The instrument and the DUT are bench singletons -
//! hardware suites run serially, enforced with `serial_test`.

pub mod config;
pub mod dut;
pub mod error;
pub mod instrument;
pub mod mqtt;
pub mod poll;
pub mod portal;
pub mod provision;
pub mod session;
pub mod telemetry;

pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
