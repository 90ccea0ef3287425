//! SHT40 telemetry agent.
//!
//! Samples a temperature/humidity sensor on a runtime-adjustable cadence and
//! publishes JSON readings to an MQTT broker, while listening on a control
//! topic for commands that trigger publishes or retune the cadence and the
//! sea-level pressure reference.
//!
//! # Architecture
//!
//! - [`config`] - startup configuration from a JSON file, validated once
//! - [`store`] - shared store for the runtime-mutable parameters
//! - [`sensor`] - sampling seam plus a simulated sensor for benches
//! - [`transport`] - broker abstraction and the rumqttc-backed client
//! - [`telemetry`] - wire payloads and host context
//! - [`command`] - control-topic command parsing and dispatch
//! - [`scheduler`] - one-second tick loop driving publish cycles
//! - [`agent`] - lifecycle wiring from startup to graceful shutdown

pub mod agent;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod sensor;
pub mod store;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use agent::TelemetryAgent;
pub use config::AgentConfig;
pub use error::AgentError;
