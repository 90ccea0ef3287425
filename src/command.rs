//! Control-topic command parsing and dispatch.
//!
//! Inbound payloads are JSON objects with a `command` field and, for the
//! parameter-changing commands, a numeric `value`. Command names are matched
//! case-insensitively. Anything malformed is logged and ignored; a control
//! message never aborts the agent and never partially applies a change.

use crate::config::AgentConfig;
use crate::sensor::SensorReader;
use crate::store::{epoch_now, ConfigStore};
use crate::telemetry::{HostContext, StatusReport, TelemetryReading};
use crate::transport::BrokerClient;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const SUPPORTED_COMMANDS: &str =
    "publishTelemetry, publishStatus, changeTelemetryInterval, changeSeaLevelPressure, debug";

/// A successfully parsed control command.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    /// Publish a fresh reading immediately, resetting the cadence
    PublishTelemetry,
    /// Publish the static/context report, no sample taken
    PublishStatus,
    /// New publish interval in seconds
    ChangeInterval(u64),
    /// New sea-level pressure reference in hPa
    ChangePressure(f64),
    /// Diagnostic log of the current runtime state
    Debug,
    /// Known shape, unknown verb; carried for the notice log
    Unrecognized(String),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommandParseError {
    #[error("payload is not valid JSON: {0}")]
    MalformedJson(String),
    #[error("payload has no string `command` field")]
    MissingCommand,
    #[error("command `{command}` requires a numeric `value` field")]
    MissingValue { command: String },
    #[error("command `{command}` has a non-numeric or out-of-range `value`")]
    InvalidValue { command: String },
}

/// Parse a raw control payload. Pure, no side effects.
pub fn parse_command(payload: &[u8]) -> Result<ControlCommand, CommandParseError> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| CommandParseError::MalformedJson(e.to_string()))?;
    let command = value
        .get("command")
        .and_then(|c| c.as_str())
        .ok_or(CommandParseError::MissingCommand)?;

    if command.eq_ignore_ascii_case("publishTelemetry") || command.eq_ignore_ascii_case("publishNow")
    {
        return Ok(ControlCommand::PublishTelemetry);
    }
    if command.eq_ignore_ascii_case("publishStatus") {
        return Ok(ControlCommand::PublishStatus);
    }
    if command.eq_ignore_ascii_case("debug") {
        return Ok(ControlCommand::Debug);
    }
    if command.eq_ignore_ascii_case("changeTelemetryInterval") {
        let seconds = numeric_value(&value, command)?;
        let seconds = seconds.as_u64().ok_or_else(|| CommandParseError::InvalidValue {
            command: command.to_string(),
        })?;
        return Ok(ControlCommand::ChangeInterval(seconds));
    }
    if command.eq_ignore_ascii_case("changeSeaLevelPressure") {
        let pressure = numeric_value(&value, command)?;
        let pressure = pressure.as_f64().ok_or_else(|| CommandParseError::InvalidValue {
            command: command.to_string(),
        })?;
        return Ok(ControlCommand::ChangePressure(pressure));
    }
    Ok(ControlCommand::Unrecognized(command.to_string()))
}

fn numeric_value<'a>(
    value: &'a serde_json::Value,
    command: &str,
) -> Result<&'a serde_json::Number, CommandParseError> {
    match value.get("value") {
        Some(serde_json::Value::Number(n)) => Ok(n),
        Some(_) => Err(CommandParseError::InvalidValue {
            command: command.to_string(),
        }),
        None => Err(CommandParseError::MissingValue {
            command: command.to_string(),
        }),
    }
}

/// Executes parsed commands against the store, sensor and broker.
pub struct CommandDispatcher<B, S> {
    config: AgentConfig,
    host: HostContext,
    store: Arc<ConfigStore>,
    broker: Arc<B>,
    sensor: Arc<S>,
}

impl<B, S> CommandDispatcher<B, S>
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
        CommandDispatcher {
            config,
            host,
            store,
            broker,
            sensor,
        }
    }

    /// Consume inbound payloads until the channel closes.
    pub async fn run(self, mut commands: mpsc::Receiver<Bytes>) {
        while let Some(payload) = commands.recv().await {
            self.dispatch(&payload).await;
        }
        debug!("command channel closed, dispatcher stopping");
    }

    /// Handle one inbound control payload.
    pub async fn dispatch(&self, payload: &[u8]) {
        let command = match parse_command(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "ignoring control message");
                return;
            }
        };
        debug!(?command, "dispatching control command");

        match command {
            ControlCommand::PublishTelemetry => self.publish_telemetry().await,
            ControlCommand::PublishStatus => self.publish_status().await,
            ControlCommand::ChangeInterval(seconds) => {
                self.store.try_set_interval(seconds);
            }
            ControlCommand::ChangePressure(hpa) => {
                self.store.try_set_pressure(hpa);
            }
            ControlCommand::Debug => {
                let snapshot = self.store.snapshot();
                info!(
                    hostname = %self.host.hostname,
                    client_address = %self.host.client_address,
                    client_mac = %self.host.client_mac,
                    publish_interval = snapshot.publish_interval,
                    sea_level_pressure = snapshot.sea_level_pressure,
                    last_publish = snapshot.last_publish,
                    state = ?self.broker.connection_state(),
                    "debug command received"
                );
            }
            ControlCommand::Unrecognized(name) => {
                warn!(
                    command = %name,
                    supported = SUPPORTED_COMMANDS,
                    "unrecognized control command"
                );
            }
        }
    }

    /// Sample and publish immediately. On success the cadence timestamp is
    /// advanced so the scheduler restarts its interval from now.
    async fn publish_telemetry(&self) {
        let sample = match self.sensor.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "on-demand sample failed, nothing published");
                return;
            }
        };
        let reading = TelemetryReading::from_sample(&self.config, &self.host, sample);
        match serde_json::to_vec(&reading) {
            Ok(payload) => {
                match self
                    .broker
                    .publish(&self.config.publish_topic, payload, self.config.broker_qos)
                    .await
                {
                    Ok(()) => {
                        self.store.mark_published(epoch_now());
                        info!(
                            topic = %self.config.publish_topic,
                            temp_c = reading.temp_c,
                            humidity = reading.humidity,
                            "published on-demand telemetry"
                        );
                    }
                    Err(e) => warn!(error = %e, "on-demand publish failed"),
                }
            }
            Err(e) => warn!(error = %e, "failed to encode telemetry reading"),
        }
    }

    async fn publish_status(&self) {
        let report = StatusReport::new(&self.config, &self.host);
        match serde_json::to_vec(&report) {
            Ok(payload) => {
                match self
                    .broker
                    .publish(&self.config.publish_topic, payload, self.config.broker_qos)
                    .await
                {
                    Ok(()) => info!(topic = %self.config.publish_topic, "published status report"),
                    Err(e) => warn!(error = %e, "status publish failed"),
                }
            }
            Err(e) => warn!(error = %e, "failed to encode status report"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_publish_telemetry_variants() {
        for raw in [
            br#"{"command":"publishTelemetry"}"#.as_slice(),
            br#"{"command":"PUBLISHTELEMETRY"}"#.as_slice(),
            br#"{"command":"publishnow"}"#.as_slice(),
        ] {
            assert_eq!(parse_command(raw), Ok(ControlCommand::PublishTelemetry));
        }
    }

    #[test]
    fn parses_interval_change() {
        let parsed = parse_command(br#"{"command":"changeTelemetryInterval","value":30}"#);
        assert_eq!(parsed, Ok(ControlCommand::ChangeInterval(30)));
    }

    #[test]
    fn parses_pressure_change() {
        let parsed = parse_command(br#"{"command":"changeSeaLevelPressure","value":1020.5}"#);
        assert_eq!(parsed, Ok(ControlCommand::ChangePressure(1020.5)));
    }

    #[test]
    fn parses_status_and_debug() {
        assert_eq!(
            parse_command(br#"{"command":"publishStatus"}"#),
            Ok(ControlCommand::PublishStatus)
        );
        assert_eq!(
            parse_command(br#"{"command":"Debug"}"#),
            Ok(ControlCommand::Debug)
        );
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            parse_command(b"not json"),
            Err(CommandParseError::MalformedJson(_))
        ));
    }

    #[test]
    fn rejects_missing_command_field() {
        assert_eq!(
            parse_command(br#"{"value":30}"#),
            Err(CommandParseError::MissingCommand)
        );
        assert_eq!(
            parse_command(br#"{"command":42}"#),
            Err(CommandParseError::MissingCommand)
        );
    }

    #[test]
    fn rejects_missing_or_bad_value() {
        assert_eq!(
            parse_command(br#"{"command":"changeTelemetryInterval"}"#),
            Err(CommandParseError::MissingValue {
                command: "changeTelemetryInterval".to_string()
            })
        );
        assert_eq!(
            parse_command(br#"{"command":"changeTelemetryInterval","value":"ten"}"#),
            Err(CommandParseError::InvalidValue {
                command: "changeTelemetryInterval".to_string()
            })
        );
        // Negative or fractional seconds are not valid interval values.
        assert!(parse_command(br#"{"command":"changeTelemetryInterval","value":-5}"#).is_err());
        assert!(parse_command(br#"{"command":"changeTelemetryInterval","value":7.5}"#).is_err());
    }

    #[test]
    fn unknown_commands_are_carried_for_logging() {
        assert_eq!(
            parse_command(br#"{"command":"reboot"}"#),
            Ok(ControlCommand::Unrecognized("reboot".to_string()))
        );
    }
}
