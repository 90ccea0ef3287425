//! Connection state machine and MQTT option construction.
//!
//! Pure, network-free pieces of the MQTT transport: the state enum owned by
//! the connection supervisor, QoS mapping from the numeric config value, and
//! building [`MqttOptions`] from the agent configuration.

use crate::config::AgentConfig;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::MqttOptions;
use std::time::Duration;
use thiserror::Error;

/// State of the broker session.
///
/// Transitions: `Disconnected -> Connecting -> Connected -> Subscribed`,
/// with `-> Disconnected` on any detected network failure. Reconnection is
/// requested by the scheduler's per-cycle health check, not by a background
/// retry thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
}

impl ConnectionState {
    /// Whether publishing is currently possible. Publish-only operation is
    /// valid in `Connected`; the control subscription is not required.
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Subscribed)
    }
}

/// MQTT transport errors.
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("publish failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
}

/// Map the numeric QoS from the config file (validated to 0..=2) onto the
/// protocol level.
pub fn to_qos(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// Client identifier unique per process so a restarted agent does not fight
/// its own stale session on the broker.
pub fn client_id() -> String {
    format!("{}-{}", env!("CARGO_PKG_NAME"), std::process::id())
}

/// Build MQTT options from the agent configuration.
pub fn configure_mqtt_options(config: &AgentConfig) -> MqttOptions {
    let mut options = MqttOptions::new(client_id(), &config.broker_address, config.broker_port);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_start(true);
    options
}
