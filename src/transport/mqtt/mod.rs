//! MQTT implementation of the broker transport.

pub mod client;
pub mod connection;

pub use client::MqttBrokerClient;
pub use connection::{ConnectionState, MqttError};
