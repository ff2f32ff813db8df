//! Durable local logs.
//!
//! Every record goes to the primary log. Records whose delivery failed also go
//! to the unsent log, whose presence blocks the next start until an operator
//! has merged it into the collector's log and removed it.
//!
//! Each append opens the file, writes one whole line, flushes and syncs it,
//! then closes the file again. Nothing is kept open between events.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::Config;

/// Errors raised by the local log files.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to append to {}: {source}", .path.display())]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The primary and unsent log files.
#[derive(Debug, Clone)]
pub struct LogSink {
    primary: PathBuf,
    unsent: PathBuf,
}

impl LogSink {
    pub fn new(primary: impl Into<PathBuf>, unsent: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            unsent: unsent.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.log_file, &config.unsent_log_file)
    }

    pub fn primary_path(&self) -> &Path {
        &self.primary
    }

    pub fn unsent_path(&self) -> &Path {
        &self.unsent
    }

    /// Append one line to the primary log.
    pub async fn append_primary(&self, line: &str) -> Result<(), SinkError> {
        append_line(&self.primary, line).await
    }

    /// Append one line to the unsent log.
    pub async fn append_unsent(&self, line: &str) -> Result<(), SinkError> {
        append_line(&self.unsent, line).await
    }

    /// Whether an unsent log is present. An empty file counts.
    ///
    /// Anything other than a clean "not found" is reported as present.
    pub async fn unsent_log_exists(&self) -> bool {
        match tokio::fs::metadata(&self.unsent).await {
            Ok(_) => true,
            Err(e) => e.kind() != ErrorKind::NotFound,
        }
    }

    /// Number of records waiting in the unsent log.
    pub async fn backlog_len(&self) -> Result<usize, SinkError> {
        match tokio::fs::read_to_string(&self.unsent).await {
            Ok(content) => Ok(content.lines().filter(|l| !l.trim().is_empty()).count()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(source) => Err(SinkError::Read {
                path: self.unsent.clone(),
                source,
            }),
        }
    }
}

async fn append_line(path: &Path, line: &str) -> Result<(), SinkError> {
    let map_err = |source: std::io::Error| SinkError::Append {
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(map_err)?;

    file.write_all(line.as_bytes()).await.map_err(map_err)?;
    file.flush().await.map_err(map_err)?;
    file.sync_data().await.map_err(map_err)?;

    debug!(path = %path.display(), bytes = line.len(), "Appended log line");
    Ok(())
}
