//! Agent lifecycle: construction, startup sequence, run loop, teardown.
//!
//! Ownership is explicit: the store, dispatcher and scheduler are built here
//! and shared by `Arc`, never through globals. Startup is strict (an
//! unreachable broker is fatal, a rejected control subscription is not);
//! shutdown is best-effort and always completes.

use crate::command::CommandDispatcher;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::scheduler::TelemetryScheduler;
use crate::sensor::SensorReader;
use crate::store::ConfigStore;
use crate::telemetry::HostContext;
use crate::transport::{BrokerClient, MqttError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TelemetryAgent<B, S> {
    config: AgentConfig,
    host: HostContext,
    broker: B,
    sensor: S,
}

impl<B, S> TelemetryAgent<B, S>
where
    B: BrokerClient<Error = MqttError> + 'static,
    S: SensorReader + 'static,
{
    pub fn new(config: AgentConfig, host: HostContext, broker: B, sensor: S) -> Self {
        TelemetryAgent {
            config,
            host,
            broker,
            sensor,
        }
    }

    /// Run the agent until the shutdown signal flips.
    ///
    /// Startup: connect (fatal on failure), register the command channel,
    /// subscribe to the control topic (publish-only on failure), then tick
    /// the scheduler. Teardown disconnects the broker and stops the
    /// dispatcher before returning.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<(), AgentError> {
        info!(
            hostname = %self.host.hostname,
            client_address = %self.host.client_address,
            client_mac = %self.host.client_mac,
            broker = %self.config.broker_address,
            port = self.config.broker_port,
            qos = self.config.broker_qos,
            publish_topic = %self.config.publish_topic,
            control_topic = %self.config.control_topic,
            publish_interval = self.config.publish_interval,
            "starting telemetry agent"
        );

        self.broker.connect().await?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        self.broker.set_command_sender(command_tx);
        if let Err(e) = self.broker.subscribe_control().await {
            warn!(
                error = %e,
                topic = %self.config.control_topic,
                "control subscription failed, running publish-only"
            );
        }

        let store = Arc::new(ConfigStore::from_config(&self.config));
        let broker = Arc::new(self.broker);
        let sensor = Arc::new(self.sensor);

        let dispatcher = CommandDispatcher::new(
            self.config.clone(),
            self.host.clone(),
            store.clone(),
            broker.clone(),
            sensor.clone(),
        );
        let mut dispatcher_handle = tokio::spawn(dispatcher.run(command_rx));

        let scheduler =
            TelemetryScheduler::new(self.config, self.host, store, broker.clone(), sensor);
        scheduler.run(shutdown).await;

        info!("shutting down");
        // disconnect drops the broker's command sender, closing the channel
        // so the dispatcher finishes any in-flight command and exits.
        broker.disconnect().await;
        match tokio::time::timeout(DISPATCHER_DRAIN_TIMEOUT, &mut dispatcher_handle).await {
            Ok(Err(e)) if !e.is_cancelled() => warn!(error = %e, "command dispatcher failed"),
            Err(_) => {
                warn!("command dispatcher did not drain in time, aborting");
                dispatcher_handle.abort();
            }
            _ => {}
        }
        info!("telemetry agent stopped");
        Ok(())
    }
}
