//! Top-level polling loop.
//!
//! One tick samples the detector and, on an event, delivers the record before
//! the next tick may begin. Shutdown is only observed between ticks, so a
//! delivery in progress always finishes, file writes included.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::client::{DeliveryClient, DeliveryOutcome};
use crate::config::Config;
use crate::detector::EdgeDetector;
use crate::record::EventRecord;
use crate::signal::{SignalError, SignalSource};
use crate::sink::{LogSink, SinkError};

/// Errors that stop the sensor.
#[derive(Error, Debug)]
pub enum SensorError {
    /// An unsent log from an earlier run has not been reconciled
    #[error(
        "unsent log {} found with {backlog} record(s); merge it into the collector's log and remove it",
        .unsent_log.display()
    )]
    Blocked { unsent_log: PathBuf, backlog: usize },

    /// The signal source could not be read at start-up
    #[error("signal source unavailable: {0}")]
    Signal(#[from] SignalError),

    /// The local logs could not be inspected
    #[error("local log storage failed: {0}")]
    Storage(#[from] SinkError),

    /// A record could not be written to the local logs
    #[error("record `{record}` not stored: {source}")]
    RecordNotStored {
        record: String,
        #[source]
        source: SinkError,
    },
}

/// Whether the sensor may start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupState {
    Ready,

    /// Unreconciled backlog from an earlier run
    Blocked { unsent_log: PathBuf, backlog: usize },
}

/// Inspect the local logs once, before any tick runs.
pub async fn startup_state(sink: &LogSink) -> Result<StartupState, SinkError> {
    if !sink.unsent_log_exists().await {
        return Ok(StartupState::Ready);
    }

    let backlog = sink.backlog_len().await?;
    Ok(StartupState::Blocked {
        unsent_log: sink.unsent_path().to_path_buf(),
        backlog,
    })
}

/// Completes on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// The event sensor: detector, delivery client and polling cadence.
pub struct EventSensor {
    device_id: u32,
    detector: EdgeDetector,
    client: DeliveryClient,
    poll_interval: Duration,
    ticks: u64,
}

impl EventSensor {
    /// Check the start-up preconditions and build the sensor.
    ///
    /// # Errors
    ///
    /// - `SensorError::Blocked` if the unsent log exists; no tick may run.
    /// - `SensorError::Signal` if the signal source cannot be read.
    ///
    /// The source is checked without taking a sample, so the first tick sees
    /// the first level the source produces.
    pub async fn start(config: &Config, source: Box<dyn SignalSource>) -> Result<Self, SensorError> {
        let sink = LogSink::from_config(config);

        if let StartupState::Blocked {
            unsent_log,
            backlog,
        } = startup_state(&sink).await?
        {
            return Err(SensorError::Blocked {
                unsent_log,
                backlog,
            });
        }

        source.check_available()?;
        info!(
            source = %source.describe(),
            edge = %config.edge,
            "Signal source ready"
        );

        let detector = EdgeDetector::new(source, config.edge)
            .with_min_spacing(config.min_event_spacing)
            .with_message(config.event_message.clone());
        let client = DeliveryClient::new(config, sink);

        Ok(Self::from_parts(
            config.device_id,
            detector,
            client,
            config.poll_interval,
        ))
    }

    /// Assemble a sensor without start-up checks.
    pub fn from_parts(
        device_id: u32,
        detector: EdgeDetector,
        client: DeliveryClient,
        poll_interval: Duration,
    ) -> Self {
        Self {
            device_id,
            detector,
            client,
            poll_interval,
            ticks: 0,
        }
    }

    /// Run one tick: sample once, deliver if an event fired.
    pub async fn tick(&mut self) -> Result<Option<DeliveryOutcome>, SensorError> {
        self.ticks += 1;

        let Some(trigger) = self.detector.check() else {
            return Ok(None);
        };

        let record = EventRecord::new(self.device_id, trigger.message.as_deref());
        info!(
            event_id = %record.id,
            date = %record.date,
            time = %record.time.format("%H:%M:%S"),
            "Event triggered"
        );

        let outcome = self
            .client
            .deliver(&record)
            .await
            .map_err(|source| SensorError::RecordNotStored {
                record: record.body(),
                source,
            })?;
        Ok(Some(outcome))
    }

    /// Tick at the configured interval until `shutdown` completes.
    ///
    /// Returns early only when the local logs cannot be written.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), SensorError>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(ticks = self.ticks, "Shutdown signal received, stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Tick failed, stopping sensor");
                self.log_summary();
                return Err(e);
            }
        }

        self.log_summary();
        Ok(())
    }

    fn log_summary(&self) {
        let stats = self.client.stats();
        info!(
            delivered = stats.delivered,
            failed = stats.failed,
            warnings_acknowledged = stats.warnings_acknowledged,
            warnings_failed = stats.warnings_failed,
            "Delivery statistics"
        );
        if self.client.pending_warning() {
            warn!(
                unsent_log = %self.client.sink().unsent_path().display(),
                "Stopping with undelivered records"
            );
        }
    }

    /// Tick until Ctrl+C or SIGTERM.
    pub async fn run(&mut self) -> Result<(), SensorError> {
        self.run_until(shutdown_signal()).await
    }

    /// Number of ticks executed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn client(&self) -> &DeliveryClient {
        &self.client
    }

    pub fn detector(&self) -> &EdgeDetector {
        &self.detector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::ScriptedSignal;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    fn config_in(dir: &TempDir, port: u16) -> Config {
        Config {
            collector_port: port,
            log_file: dir.path().join("logfile.csv"),
            unsent_log_file: dir.path().join("logfile_unsent.csv"),
            poll_interval: Duration::from_millis(10),
            network_timeout: Duration::from_millis(200),
            ..Config::default()
        }
    }

    async fn dead_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn scripted(levels: &[u8]) -> Box<dyn SignalSource> {
        Box::new(ScriptedSignal::new(levels.iter().map(|l| *l == 1), true))
    }

    #[tokio::test]
    async fn test_startup_ready_without_unsent_log() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::new(dir.path().join("a.csv"), dir.path().join("b.csv"));
        assert_eq!(startup_state(&sink).await.unwrap(), StartupState::Ready);
    }

    #[tokio::test]
    async fn test_startup_blocked_by_unsent_log() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, dead_port().await);
        std::fs::write(&config.unsent_log_file, "2013-01-15,12:35:00,1,-\n").unwrap();

        let err = EventSensor::start(&config, scripted(&[])).await.err().unwrap();

        match err {
            SensorError::Blocked { backlog, .. } => assert_eq!(backlog, 1),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!config.log_file.exists());
    }

    #[tokio::test]
    async fn test_startup_fails_without_signal_source() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, dead_port().await);
        let source = Box::new(crate::signal::SysfsGpio::new(dir.path(), 5));

        let err = EventSensor::start(&config, source).await.err().unwrap();
        assert!(matches!(err, SensorError::Signal(_)));
    }

    #[tokio::test]
    async fn test_tick_without_edge_does_nothing() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, dead_port().await);
        let mut sensor = EventSensor::start(&config, scripted(&[1, 1, 1])).await.unwrap();

        assert_eq!(sensor.tick().await.unwrap(), None);
        assert_eq!(sensor.tick().await.unwrap(), None);
        assert_eq!(sensor.ticks(), 2);
        assert!(!config.log_file.exists());
    }

    #[tokio::test]
    async fn test_tick_with_unreachable_collector() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, dead_port().await);
        let mut sensor = EventSensor::start(&config, scripted(&[0, 1])).await.unwrap();

        assert_eq!(sensor.tick().await.unwrap(), None);
        assert_eq!(
            sensor.tick().await.unwrap(),
            Some(DeliveryOutcome::Failed)
        );
        assert!(sensor.client().pending_warning());

        let primary = std::fs::read_to_string(&config.log_file).unwrap();
        let unsent = std::fs::read_to_string(&config.unsent_log_file).unwrap();
        assert_eq!(primary.lines().count(), 1);
        assert_eq!(primary, unsent);
        assert!(primary.ends_with(",1,-\n"));
    }

    #[tokio::test]
    async fn test_run_stops_before_first_tick_when_already_shut_down() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, dead_port().await);
        let mut sensor = EventSensor::start(&config, scripted(&[1])).await.unwrap();

        sensor.run_until(async {}).await.unwrap();
        assert_eq!(sensor.ticks(), 0);
    }

    #[tokio::test]
    async fn test_run_ticks_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, dead_port().await);
        let mut sensor = EventSensor::start(&config, scripted(&[1])).await.unwrap();

        sensor
            .run_until(tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(sensor.ticks() >= 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_storage_failure() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir, dead_port().await);
        config.log_file = dir.path().join("missing").join("logfile.csv");
        config.unsent_log_file = dir.path().join("missing").join("logfile_unsent.csv");
        let mut sensor = EventSensor::start(&config, scripted(&[0, 1])).await.unwrap();

        let err = sensor
            .run_until(tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        match &err {
            SensorError::RecordNotStored { record, .. } => {
                assert!(record.ends_with(",1,-"));
                assert!(err.to_string().contains(record.as_str()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sensor.ticks(), 2);
        assert_eq!(sensor.client().stats().failed, 1);
    }

    #[tokio::test]
    async fn test_start_keeps_first_sample_for_first_tick() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, dead_port().await);
        let mut sensor = EventSensor::start(&config, scripted(&[1, 1, 0, 1])).await.unwrap();

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            outcomes.push(sensor.tick().await.unwrap());
        }

        assert_eq!(
            outcomes,
            vec![None, None, None, Some(DeliveryOutcome::Failed)]
        );
    }

    #[tokio::test]
    async fn test_start_then_rising_edge_on_second_tick() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, dead_port().await);
        let mut sensor = EventSensor::start(&config, scripted(&[0, 1])).await.unwrap();

        assert_eq!(sensor.tick().await.unwrap(), None);
        assert!(sensor.tick().await.unwrap().is_some());
        assert_eq!(sensor.client().stats().failed, 1);
    }
}
