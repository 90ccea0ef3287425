//! Outbound telemetry payloads and host-derived context.
//!
//! The wire format is a JSON object with camelCase keys, identical to what
//! the fleet's existing consumers already parse: `host`, `timeStamp`
//! (`YYYY-MM-DD HH:MM:SS`), `tempC`, `humidity`, `brokerAddress`,
//! `brokerPort`, `clientAddress`, `clientMAC` and an optional `notes`.
//!
//! Host context is computed once at startup and is immutable afterwards;
//! only the timestamp and measured values change per cycle.

use crate::config::AgentConfig;
use crate::sensor::Sample;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::net::UdpSocket;
use tracing::debug;

/// Immutable host identity captured at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    pub hostname: String,
    pub client_address: String,
    /// Colon-separated uppercase hex octets, e.g. `B8:27:EB:12:34:56`
    pub client_mac: String,
}

impl HostContext {
    /// Detect hostname, outbound IP address and MAC address. Detection is
    /// best-effort; failures fall back to loopback/zero values rather than
    /// aborting startup.
    pub fn detect() -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        let client_address = detect_client_address();
        let client_mac = detect_client_mac();
        debug!(%hostname, %client_address, %client_mac, "detected host context");
        HostContext {
            hostname,
            client_address,
            client_mac,
        }
    }
}

/// Find the IP the host would use for outbound traffic by "connecting" a UDP
/// socket toward a routable address. No packet is sent.
fn detect_client_address() -> String {
    fn probe() -> std::io::Result<String> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip().to_string())
    }
    probe().unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn detect_client_mac() -> String {
    match mac_address::get_mac_address() {
        Ok(Some(mac)) => format_mac(&mac.bytes()),
        _ => format_mac(&[0; 6]),
    }
}

/// Format MAC bytes as colon-separated uppercase hex octets.
pub fn format_mac(bytes: &[u8; 6]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Round to three decimal places, the precision published on the wire.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Local time in the `YYYY-MM-DD HH:MM:SS` format the consumers expect.
pub fn timestamp_now() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// A single published telemetry reading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReading {
    pub host: String,
    pub time_stamp: String,
    #[serde(rename = "tempC")]
    pub temp_c: f64,
    pub humidity: f64,
    pub broker_address: String,
    pub broker_port: u16,
    pub client_address: String,
    #[serde(rename = "clientMAC")]
    pub client_mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TelemetryReading {
    /// Build a reading from a fresh sample, rounding measured values to
    /// three decimals and stamping the current local time.
    pub fn from_sample(config: &AgentConfig, host: &HostContext, sample: Sample) -> Self {
        TelemetryReading {
            host: host.hostname.clone(),
            time_stamp: timestamp_now(),
            temp_c: round3(sample.temperature_c),
            humidity: round3(sample.relative_humidity),
            broker_address: config.broker_address.clone(),
            broker_port: config.broker_port,
            client_address: host.client_address.clone(),
            client_mac: host.client_mac.clone(),
            notes: config.notes.clone(),
        }
    }
}

/// Static/context fields published by the `publishStatus` command. No fresh
/// sample is taken for these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub host: String,
    pub time_stamp: String,
    pub broker_address: String,
    pub broker_port: u16,
    pub client_address: String,
    #[serde(rename = "clientMAC")]
    pub client_mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl StatusReport {
    pub fn new(config: &AgentConfig, host: &HostContext) -> Self {
        StatusReport {
            host: host.hostname.clone(),
            time_stamp: timestamp_now(),
            broker_address: config.broker_address.clone(),
            broker_port: config.broker_port,
            client_address: host.client_address.clone(),
            client_mac: host.client_mac.clone(),
            notes: config.notes.clone(),
        }
    }
}
