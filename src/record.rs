//! Event records and their wire/file representations.
//!
//! A record is built once per detected edge and never changes afterwards.
//! The same comma-separated line is written to the log files and carried
//! inside the `LOG` command sent to the collector.

use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use uuid::Uuid;

/// Placeholder written when an event carries no message.
pub const EMPTY_MESSAGE: &str = "-";

/// Acknowledgment token the collector answers every command with.
pub const ACK_TOKEN: &[u8; 3] = b"ACK";

/// A single detected event, ready to be delivered and logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Local correlation id, only used in tracing output
    pub id: Uuid,

    /// Calendar date the event was observed
    pub date: NaiveDate,

    /// Wall-clock time the event was observed, second precision
    pub time: NaiveTime,

    /// Identifier of the device that observed the event
    pub device_id: u32,

    /// Free-form message, `-` when none was supplied
    pub message: String,
}

impl EventRecord {
    /// Create a record stamped with the current local time.
    pub fn new(device_id: u32, message: Option<&str>) -> Self {
        Self::at(Local::now(), device_id, message)
    }

    /// Create a record stamped with the given time.
    ///
    /// Field separators and line breaks in `message` are replaced with
    /// spaces, so the record always stays a single four-field line.
    pub fn at(timestamp: DateTime<Local>, device_id: u32, message: Option<&str>) -> Self {
        let message = match message {
            Some(m) if !m.is_empty() => sanitize_message(m),
            _ => EMPTY_MESSAGE.to_string(),
        };

        Self {
            id: Uuid::new_v4(),
            date: timestamp.date_naive(),
            time: timestamp.time(),
            device_id,
            message,
        }
    }

    /// Comma-separated body shared by the log files and the `LOG` command,
    /// without the trailing newline: `YYYY-MM-DD,HH:MM:SS,<id>,<message>`.
    pub fn body(&self) -> String {
        format!(
            "{},{},{},{}",
            self.date.format("%Y-%m-%d"),
            self.time.format("%H:%M:%S"),
            self.device_id,
            self.message
        )
    }

    /// Newline-terminated line appended to the primary and unsent logs.
    pub fn log_line(&self) -> String {
        format!("{}\n", self.body())
    }

    /// `LOG <body>\n` command for the collector.
    pub fn log_command(&self) -> Vec<u8> {
        format!("LOG {}\n", self.body()).into_bytes()
    }
}

fn sanitize_message(message: &str) -> String {
    message
        .chars()
        .map(|c| if matches!(c, ',' | '\n' | '\r') { ' ' } else { c })
        .collect()
}

/// `WARN <device_id>\n` command announcing a local backlog.
pub fn warn_command(device_id: u32) -> Vec<u8> {
    format!("WARN {}\n", device_id).into_bytes()
}
