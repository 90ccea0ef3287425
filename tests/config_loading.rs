//! Configuration file loading: happy path, defaults and fatal rejections.

use sht40_telemetry::config::{AgentConfig, ConfigError};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}

#[test]
fn loads_a_complete_config_file() {
    let file = write_config(
        r#"{
            "brokerAddress": "broker.lan",
            "brokerPort": 1883,
            "brokerQoS": 1,
            "publishTopic": "office/sht40/telemetry",
            "controlTopic": "office/sht40/control",
            "publishInterval": 60,
            "notes": "window desk",
            "seaLevelPressure": 1009.1
        }"#,
    );

    let config = AgentConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.broker_address, "broker.lan");
    assert_eq!(config.publish_interval, 60);
    assert_eq!(config.notes.as_deref(), Some("window desk"));
    assert_eq!(config.sea_level_pressure, 1009.1);
}

#[test]
fn optional_fields_may_be_omitted() {
    let file = write_config(
        r#"{
            "brokerAddress": "broker.lan",
            "brokerPort": 1883,
            "brokerQoS": 0,
            "publishTopic": "t",
            "controlTopic": "c",
            "publishInterval": 30
        }"#,
    );

    let config = AgentConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.notes, None);
    assert_eq!(config.sea_level_pressure, 1013.25);
}

#[test]
fn missing_file_is_a_read_error() {
    let result = AgentConfig::load_from_file(std::path::Path::new("/nonexistent/config.json"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn invalid_json_is_a_parse_error() {
    let file = write_config("{ not json");
    let result = AgentConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::JsonParse(_))));
}

#[test]
fn out_of_bounds_interval_is_fatal() {
    let file = write_config(
        r#"{
            "brokerAddress": "broker.lan",
            "brokerPort": 1883,
            "brokerQoS": 0,
            "publishTopic": "t",
            "controlTopic": "c",
            "publishInterval": 2
        }"#,
    );
    let result = AgentConfig::load_from_file(file.path());
    match result {
        Err(ConfigError::InvalidConfig(message)) => {
            assert!(message.contains("publishInterval"), "got: {message}")
        }
        other => panic!("expected InvalidConfig, got {other:?}"),
    }
}
