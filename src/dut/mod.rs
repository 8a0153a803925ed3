//! Typed access to the DUT's REST surface.
//!
//! Two transports reach the same API: [`client::DutClient`] speaks HTTP
//! directly (harness host and DUT on the same network), and
//! [`client::RelayClient`] routes requests through the WiFi tester's serial
//! relay (DUT on an isolated test network). Both implement
//! [`client::DeviceHttp`]; the typed operations in [`client::DutApi`] work
//! over either.

pub mod api;
pub mod client;

pub use api::{
    ConfigUpdate, DutConfig, DutStatus, InjectOutcome, InjectRequest, InjectResponse, StatusReply,
    WifiCredentials,
};
pub use client::{DeviceHttp, DutApi, DutClient, HttpReply, RelayClient};
