//! Startup configuration loaded from a JSON file.
//!
//! The configuration file is a JSON object with camelCase keys, matching the
//! wire contract of the deployed agents. Required keys: `brokerAddress`,
//! `brokerPort`, `brokerQoS`, `publishTopic`, `controlTopic`,
//! `publishInterval`. Optional: `notes`, `seaLevelPressure`.
//!
//! All bounds are checked explicitly after parsing; a missing or out-of-bounds
//! value is a fatal startup error. Runtime mutation of `publishInterval` and
//! `seaLevelPressure` happens through the [`crate::store::ConfigStore`], never
//! here.

use crate::store::{interval_in_bounds, pressure_in_bounds, DEFAULT_SEA_LEVEL_PRESSURE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Agent configuration as read from the JSON config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Broker hostname or IP address
    pub broker_address: String,
    /// Broker TCP port (1-65535)
    pub broker_port: u16,
    /// Quality-of-service level for both publishes and the control
    /// subscription (0, 1 or 2)
    #[serde(rename = "brokerQoS")]
    pub broker_qos: u8,
    /// Topic telemetry readings are published to
    pub publish_topic: String,
    /// Topic the agent subscribes to for inbound commands
    pub control_topic: String,
    /// Seconds between telemetry publishes (>= 5)
    pub publish_interval: u64,
    /// Free-text note echoed into every telemetry payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Sea-level pressure reference in hPa (100 < p < 10000)
    #[serde(default = "default_sea_level_pressure")]
    pub sea_level_pressure: f64,
}

fn default_sea_level_pressure() -> f64 {
    DEFAULT_SEA_LEVEL_PRESSURE
}

/// Configuration loading errors. All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse config JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AgentConfig {
    /// Load and validate configuration from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate bounds on the parsed configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_address.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "brokerAddress must not be empty".to_string(),
            ));
        }
        if self.broker_port == 0 {
            return Err(ConfigError::InvalidConfig(
                "brokerPort must be between 1 and 65535".to_string(),
            ));
        }
        if self.broker_qos > 2 {
            return Err(ConfigError::InvalidConfig(format!(
                "brokerQoS must be 0, 1 or 2, got {}",
                self.broker_qos
            )));
        }
        if self.publish_topic.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "publishTopic must not be empty".to_string(),
            ));
        }
        if self.control_topic.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "controlTopic must not be empty".to_string(),
            ));
        }
        if !interval_in_bounds(self.publish_interval) {
            return Err(ConfigError::InvalidConfig(format!(
                "publishInterval must be at least 5 seconds, got {}",
                self.publish_interval
            )));
        }
        if !pressure_in_bounds(self.sea_level_pressure) {
            return Err(ConfigError::InvalidConfig(format!(
                "seaLevelPressure must be strictly between 100 and 10000, got {}",
                self.sea_level_pressure
            )));
        }
        Ok(())
    }

    /// Create a known-good configuration for unit and integration testing.
    pub fn test_config() -> Self {
        let json = r#"{
            "brokerAddress": "localhost",
            "brokerPort": 1883,
            "brokerQoS": 1,
            "publishTopic": "office/sht40/telemetry",
            "controlTopic": "office/sht40/control",
            "publishInterval": 10,
            "notes": "test fixture",
            "seaLevelPressure": 1013.25
        }"#;
        serde_json::from_str(json).expect("test config should parse")
    }
}
