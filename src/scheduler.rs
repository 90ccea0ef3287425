//! Telemetry cycle scheduler.
//!
//! Ticks once per second on a monotonic tokio interval. Each tick runs a
//! connection health check first (one reconnect attempt, skip the tick if the
//! broker stays unreachable), then an edge-unbiased due check against the
//! runtime interval, then sample + publish. The cadence timestamp advances
//! only after a successful publish, so a failed cycle retries on the next
//! tick instead of silently losing a reading.

use crate::config::AgentConfig;
use crate::sensor::SensorReader;
use crate::store::{epoch_now, ConfigStore};
use crate::telemetry::{HostContext, TelemetryReading};
use crate::transport::BrokerClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Whether a reading is due. `>=` keeps the check edge-unbiased: an interval
/// change that makes the cadence already overdue fires on the next tick.
pub fn publish_due(now: u64, last_publish: u64, interval: u64) -> bool {
    now.saturating_sub(last_publish) >= interval
}

pub struct TelemetryScheduler<B, S> {
    config: AgentConfig,
    host: HostContext,
    store: Arc<ConfigStore>,
    broker: Arc<B>,
    sensor: Arc<S>,
}

impl<B, S> TelemetryScheduler<B, S>
where
    B: BrokerClient,
    S: SensorReader,
{
    pub fn new(
        config: AgentConfig,
        host: HostContext,
        store: Arc<ConfigStore>,
        broker: Arc<B>,
        sensor: Arc<S>,
    ) -> Self {
        TelemetryScheduler {
            config,
            host,
            store,
            broker,
            sensor,
        }
    }

    /// Tick until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            interval = self.store.publish_interval(),
            topic = %self.config.publish_topic,
            "telemetry scheduler started"
        );
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_cycle(epoch_now()).await;
                }
            }
        }
        info!("telemetry scheduler stopped");
    }

    /// One scheduler cycle at the given wall-clock second.
    pub async fn run_cycle(&self, now: u64) {
        if !self.broker.is_connected() {
            if !self.broker.reconnect().await {
                debug!("broker unreachable, skipping cycle");
                return;
            }
            info!("broker connection restored");
        }

        if !publish_due(now, self.store.last_publish(), self.store.publish_interval()) {
            return;
        }

        let sample = match self.sensor.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "sensor read failed, skipping cycle");
                return;
            }
        };

        let reading = TelemetryReading::from_sample(&self.config, &self.host, sample);
        let payload = match serde_json::to_vec(&reading) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode telemetry reading");
                return;
            }
        };

        match self
            .broker
            .publish(&self.config.publish_topic, payload, self.config.broker_qos)
            .await
        {
            Ok(()) => {
                self.store.mark_published(now);
                info!(
                    topic = %self.config.publish_topic,
                    temp_c = reading.temp_c,
                    humidity = reading.humidity,
                    "published telemetry"
                );
            }
            Err(e) => {
                // last_publish stays put; the next tick retries.
                warn!(error = %e, "telemetry publish failed");
            }
        }
    }
}
