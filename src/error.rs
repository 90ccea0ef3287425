//! Top-level error type for agent startup and shutdown paths.
//!
//! Runtime failures (sensor reads, lost connections, bad control messages)
//! are handled locally and logged; only startup problems surface here and
//! terminate the process with a non-zero exit code.

use crate::config::ConfigError;
use crate::sensor::SensorError;
use crate::transport::MqttError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("broker error: {0}")]
    Broker(#[from] MqttError),

    #[error("sensor error: {0}")]
    Sensor(#[from] SensorError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_config_errors() {
        let err: AgentError = ConfigError::InvalidConfig("brokerPort".to_string()).into();
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("brokerPort"));
    }

    #[test]
    fn wraps_broker_errors() {
        let err: AgentError = MqttError::ConnectionFailed("refused".to_string()).into();
        assert!(err.to_string().contains("broker error"));
    }
}
