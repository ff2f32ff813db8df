//! Event Sensor - reports digital input edges to a remote log collector
//!
//! Polls one digital input at a fixed interval. On every detected edge a
//! timestamped record is sent to the collector over TCP and appended to a
//! local log. Records the collector did not acknowledge are also written to
//! an unsent log, which must be reconciled by an operator before the sensor
//! will start again.
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `EVENT_SENSOR_DEVICE_ID`: Positive device identifier (default: 1)
//! - `EVENT_SENSOR_COLLECTOR_HOST` / `EVENT_SENSOR_COLLECTOR_PORT`: Collector address
//!   (default: 127.0.0.1:8080)
//! - `EVENT_SENSOR_LOG_FILE`: Primary log (default: logfile.csv)
//! - `EVENT_SENSOR_UNSENT_LOG_FILE`: Unsent log (default: logfile_unsent.csv)
//! - `EVENT_SENSOR_POLL_INTERVAL_SECS`: Tick period (default: 0.5)
//! - `EVENT_SENSOR_NETWORK_TIMEOUT_SECS`: Per-exchange timeout (default: 1)
//! - `EVENT_SENSOR_SIGNAL_SOURCE`: `gpio` or `simulated` (default: gpio)
//! - `RUST_LOG`: Logging level filter (default: info)
//!
//! ## Exit status
//!
//! - 0 after Ctrl+C or SIGTERM
//! - 1 on invalid configuration, an unreconciled unsent log, an unreadable
//!   signal source, or a local log write failure

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use event_sensor::config::Config;
use event_sensor::sensor::{EventSensor, SensorError};
use event_sensor::signal;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                device_id = config.device_id,
                collector = %config.collector_addr(),
                log_file = %config.log_file.display(),
                unsent_log_file = %config.unsent_log_file.display(),
                poll_interval_ms = config.poll_interval.as_millis() as u64,
                network_timeout_ms = config.network_timeout.as_millis() as u64,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let source = signal::from_config(&config.signal_source);
    let mut sensor = match EventSensor::start(&config, source).await {
        Ok(sensor) => sensor,
        Err(e @ SensorError::Blocked { .. }) => {
            error!(error = %e, "Refusing to start with unreconciled backlog");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!(error = %e, "Start-up checks failed");
            return ExitCode::FAILURE;
        }
    };

    info!(
        collector = %config.collector_addr(),
        "Event sensor started. Press Ctrl+C to stop."
    );

    match sensor.run().await {
        Ok(()) => {
            info!("Event sensor stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Event sensor stopped on fatal error");
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
