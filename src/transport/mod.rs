//! Broker transport abstraction.
//!
//! The agent talks to the publish/subscribe broker through the
//! [`BrokerClient`] trait so the dispatcher and scheduler can be exercised
//! against mocks. The production implementation is the MQTT client in
//! [`mqtt`].

use bytes::Bytes;
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::{ConnectionState, MqttBrokerClient, MqttError};

/// Connection and messaging surface of the broker.
///
/// Inbound control-topic payloads are delivered onto the channel registered
/// with [`BrokerClient::set_command_sender`]; the consumer must not assume
/// which task the delivery happens on.
#[async_trait::async_trait]
pub trait BrokerClient: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish the broker session. Fatal at startup if it fails.
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Subscribe to the control topic at the configured QoS. A failure here
    /// is not fatal: publish-only operation remains valid.
    async fn subscribe_control(&mut self) -> Result<(), Self::Error>;

    /// Publish a payload to a topic at the given QoS level (0, 1 or 2).
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: u8) -> Result<(), Self::Error>;

    /// Request a reconnect and wait a bounded time for it to complete.
    /// Returns whether the connection is usable afterwards. A no-op returning
    /// true when already connected.
    async fn reconnect(&self) -> bool;

    /// Best-effort teardown: unsubscribe, stop inbound delivery, close the
    /// session. Secondary errors are swallowed so shutdown always completes.
    async fn disconnect(&self);

    /// Current state of the connection state machine.
    fn connection_state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Register the channel inbound command payloads are forwarded onto.
    fn set_command_sender(&self, sender: mpsc::Sender<Bytes>);
}
