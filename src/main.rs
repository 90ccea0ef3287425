//! Telemetry agent entry point.
//!
//! Loads the JSON configuration, connects to the broker and runs the
//! scheduler until SIGINT or SIGTERM. Startup failures (bad config,
//! unreachable broker) exit non-zero; a signal-triggered shutdown exits 0.

use clap::Parser;
use sht40_telemetry::agent::TelemetryAgent;
use sht40_telemetry::config::AgentConfig;
use sht40_telemetry::logging::init_default_logging;
use sht40_telemetry::sensor::SimulatedSensor;
use sht40_telemetry::telemetry::HostContext;
use sht40_telemetry::transport::MqttBrokerClient;
use std::path::PathBuf;
use std::process;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};

/// SHT40 telemetry agent
#[derive(Parser)]
#[command(name = "sht40-telemetry")]
#[command(about = "Publishes SHT40 temperature/humidity readings over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(value_name = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "sht40 telemetry agent starting"
    );

    let config = match AgentConfig::load_from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "failed to load configuration");
            process::exit(1);
        }
    };

    let host = HostContext::detect();
    let broker = MqttBrokerClient::new(&config);
    let sensor = SimulatedSensor::default();
    let agent = TelemetryAgent::new(config, host, broker, sensor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            error!(error = %e, "signal handler setup failed");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = agent.run(shutdown_rx).await {
        error!(error = %e, "agent failed");
        process::exit(1);
    }
}

async fn wait_for_signal() -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}
