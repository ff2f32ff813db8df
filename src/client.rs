//! Delivery client for sending event records to the collector.
//!
//! Every command travels over its own TCP connection: connect, send one
//! line, read a 3-byte acknowledgment, close. The whole exchange is bounded
//! by the network timeout, so one delivery (warning plus log) never blocks
//! for longer than twice that timeout.
//!
//! When the previous delivery failed, a `WARN <device_id>` command is sent
//! ahead of the next `LOG` command so the collector learns that this device
//! holds records it never received.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::record::{warn_command, EventRecord, ACK_TOKEN};
use crate::sink::{LogSink, SinkError};

/// Errors that can occur during one collector exchange.
///
/// These never leave the client; they turn into `DeliveryOutcome::Failed`.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// TCP connection could not be established
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Command could not be written
    #[error("failed to send command: {0}")]
    Send(#[source] std::io::Error),

    /// Acknowledgment could not be read
    #[error("failed to read acknowledgment: {0}")]
    Receive(#[source] std::io::Error),

    /// Connection closed before a full acknowledgment arrived
    #[error("short acknowledgment: got {received:?}")]
    ShortAck { received: String },

    /// Full-length reply that is not the acknowledgment token
    #[error("bad acknowledgment: got {received:?}")]
    BadAck { received: String },

    /// Exchange did not complete within the network timeout
    #[error("exchange timed out after {0:?}")]
    Timeout(Duration),
}

/// Result of delivering one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
}

/// Cross-delivery state of the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryState {
    /// Set after a failed delivery; cleared only by an acknowledged warning
    pub pending_warning: bool,
}

/// Statistics about client operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Records acknowledged by the collector
    pub delivered: u64,

    /// Records that ended up in the unsent log
    pub failed: u64,

    /// Warnings acknowledged by the collector
    pub warnings_acknowledged: u64,

    /// Warnings that were not acknowledged
    pub warnings_failed: u64,
}

/// Client delivering records to the collector and into the local logs.
///
/// # Example
///
/// ```no_run
/// use event_sensor::client::DeliveryClient;
/// use event_sensor::config::Config;
/// use event_sensor::record::EventRecord;
/// use event_sensor::sink::LogSink;
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::default();
///     let mut client = DeliveryClient::new(&config, LogSink::from_config(&config));
///
///     let record = EventRecord::new(config.device_id, None);
///     let outcome = client.deliver(&record).await.expect("local logs unavailable");
///     println!("{:?}", outcome);
/// }
/// ```
pub struct DeliveryClient {
    /// `host:port` of the collector
    addr: String,

    /// Identifier sent in warnings
    device_id: u32,

    /// Bound on each exchange
    timeout: Duration,

    /// Local logs written after every delivery
    sink: LogSink,

    state: DeliveryState,

    stats: DeliveryStats,
}

impl DeliveryClient {
    /// Create a new delivery client with the given configuration.
    pub fn new(config: &Config, sink: LogSink) -> Self {
        Self::with_settings(
            config.collector_addr(),
            config.device_id,
            config.network_timeout,
            sink,
        )
    }

    /// Create a new delivery client with custom settings.
    ///
    /// This is useful for testing or when you need more control over the client.
    pub fn with_settings(
        addr: impl Into<String>,
        device_id: u32,
        timeout: Duration,
        sink: LogSink,
    ) -> Self {
        Self {
            addr: addr.into(),
            device_id,
            timeout,
            sink,
            state: DeliveryState::default(),
            stats: DeliveryStats::default(),
        }
    }

    /// Deliver one record.
    ///
    /// 1. If the previous delivery failed, send `WARN <device_id>`; an
    ///    acknowledgment clears the pending warning, anything else leaves it
    ///    set and delivery continues.
    /// 2. Send `LOG <record>` and wait for the acknowledgment.
    /// 3. On failure set the pending warning and append the record to the
    ///    unsent log.
    /// 4. Append the record to the primary log, whatever the outcome. The
    ///    primary append is attempted even when the unsent append failed.
    ///
    /// # Errors
    ///
    /// Network and protocol problems never surface here. Only a failure to
    /// write the local logs is returned, since the record would otherwise be
    /// lost without trace.
    pub async fn deliver(&mut self, record: &EventRecord) -> Result<DeliveryOutcome, SinkError> {
        let line = record.log_line();

        debug!(
            event_id = %record.id,
            record = %record.body(),
            pending_warning = self.state.pending_warning,
            addr = %self.addr,
            "Delivering event record"
        );

        if self.state.pending_warning {
            self.send_warning().await;
        }

        match self.exchange(&record.log_command()).await {
            Ok(()) => {
                self.sink.append_primary(&line).await?;
                self.stats.delivered += 1;
                info!(
                    event_id = %record.id,
                    record = %record.body(),
                    "Event delivered"
                );
                Ok(DeliveryOutcome::Delivered)
            }
            Err(e) => {
                self.state.pending_warning = true;
                self.stats.failed += 1;
                // Unsent log first, so the start-up gate is armed even if the
                // primary append fails.
                let unsent = self.sink.append_unsent(&line).await;
                if let Err(ref sink_err) = unsent {
                    error!(
                        event_id = %record.id,
                        record = %record.body(),
                        error = %sink_err,
                        "Failed to append undelivered record to unsent log"
                    );
                }
                self.sink.append_primary(&line).await?;
                unsent?;
                warn!(
                    event_id = %record.id,
                    record = %record.body(),
                    error = %e,
                    unsent_log = %self.sink.unsent_path().display(),
                    "Event delivery FAILED"
                );
                Ok(DeliveryOutcome::Failed)
            }
        }
    }

    /// Best-effort backlog warning; failure keeps the warning pending.
    async fn send_warning(&mut self) {
        match self.exchange(&warn_command(self.device_id)).await {
            Ok(()) => {
                self.state.pending_warning = false;
                self.stats.warnings_acknowledged += 1;
                info!(device_id = self.device_id, "Backlog warning acknowledged");
            }
            Err(e) => {
                self.stats.warnings_failed += 1;
                warn!(
                    device_id = self.device_id,
                    error = %e,
                    "Backlog warning not acknowledged, will retry with next event"
                );
            }
        }
    }

    /// One bounded request/acknowledgment exchange on a fresh connection.
    async fn exchange(&self, command: &[u8]) -> Result<(), DeliveryError> {
        match timeout(self.timeout, self.exchange_unbounded(command)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.timeout)),
        }
    }

    async fn exchange_unbounded(&self, command: &[u8]) -> Result<(), DeliveryError> {
        let mut stream =
            TcpStream::connect(&self.addr)
                .await
                .map_err(|source| DeliveryError::Connect {
                    addr: self.addr.clone(),
                    source,
                })?;

        stream.write_all(command).await.map_err(DeliveryError::Send)?;
        stream.flush().await.map_err(DeliveryError::Send)?;

        let mut ack = [0u8; 3];
        let mut filled = 0;
        while filled < ack.len() {
            let n = stream
                .read(&mut ack[filled..])
                .await
                .map_err(DeliveryError::Receive)?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let received = &ack[..filled];
        if filled < ack.len() {
            return Err(DeliveryError::ShortAck {
                received: String::from_utf8_lossy(received).into_owned(),
            });
        }
        if received != ACK_TOKEN {
            return Err(DeliveryError::BadAck {
                received: String::from_utf8_lossy(received).into_owned(),
            });
        }

        Ok(())
    }

    /// Whether the next delivery will start with a backlog warning.
    pub fn pending_warning(&self) -> bool {
        self.state.pending_warning
    }

    pub fn state(&self) -> &DeliveryState {
        &self.state
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    /// Get the configured collector address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Get the exchange timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
