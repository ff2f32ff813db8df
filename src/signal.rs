//! Signal sources the edge detector samples.
//!
//! A source returns the current binary level of one digital input on demand.
//! `true` is logical HIGH.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::config::SignalSourceKind;

/// Default probability that the simulated level flips on a given read.
const DEFAULT_FLIP_PROBABILITY: f64 = 0.05;

/// Errors raised while reading a signal level.
#[derive(Error, Debug)]
pub enum SignalError {
    /// The input cannot be read at all (missing line, no permission)
    #[error("signal source {} unavailable: {source}", .path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The input was read but did not contain a level
    #[error("signal source {} returned unexpected value '{value}'", .path.display())]
    InvalidLevel { path: PathBuf, value: String },
}

/// A digital input that can be sampled.
pub trait SignalSource: Send {
    /// Read the current level.
    fn read(&mut self) -> Result<bool, SignalError>;

    /// Human-readable description for start-up logging.
    fn describe(&self) -> String;

    /// Check that the source can be read, without consuming a sample.
    fn check_available(&self) -> Result<(), SignalError> {
        Ok(())
    }
}

/// Build the source selected by the configuration.
pub fn from_config(kind: &SignalSourceKind) -> Box<dyn SignalSource> {
    match kind {
        SignalSourceKind::Gpio { pin, root } => Box::new(SysfsGpio::new(root, *pin)),
        SignalSourceKind::Simulated => Box::new(SimulatedSignal::new()),
    }
}

/// GPIO line exported through the Linux sysfs interface.
///
/// The line must already be exported and configured as an input; this type
/// only reads `<root>/gpio<pin>/value`.
///
/// Reads use blocking `std::fs`. The value file is a kernel attribute of a
/// couple of bytes, and the detector samples synchronously inside a tick.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    value_path: PathBuf,
}

impl SysfsGpio {
    pub fn new(root: impl AsRef<Path>, pin: u32) -> Self {
        Self {
            value_path: root.as_ref().join(format!("gpio{}", pin)).join("value"),
        }
    }

    pub fn value_path(&self) -> &Path {
        &self.value_path
    }
}

impl SysfsGpio {
    fn read_level(&self) -> Result<bool, SignalError> {
        let raw = std::fs::read_to_string(&self.value_path).map_err(|source| {
            SignalError::Unavailable {
                path: self.value_path.clone(),
                source,
            }
        })?;

        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(SignalError::InvalidLevel {
                path: self.value_path.clone(),
                value: other.to_string(),
            }),
        }
    }
}

impl SignalSource for SysfsGpio {
    fn read(&mut self) -> Result<bool, SignalError> {
        self.read_level()
    }

    fn describe(&self) -> String {
        format!("sysfs gpio {}", self.value_path.display())
    }

    // Reading sysfs has no side effects, so a full read doubles as the check.
    fn check_available(&self) -> Result<(), SignalError> {
        self.read_level().map(|_| ())
    }
}

/// Randomly toggling input for running without hardware.
///
/// Starts at HIGH (the idle level of an active-low sensor) and flips with a
/// fixed probability on every read.
#[derive(Debug, Clone)]
pub struct SimulatedSignal {
    level: bool,
    flip_probability: f64,
}

impl SimulatedSignal {
    pub fn new() -> Self {
        Self::with_flip_probability(DEFAULT_FLIP_PROBABILITY)
    }

    /// Probability is clamped to `0.0..=1.0`.
    pub fn with_flip_probability(flip_probability: f64) -> Self {
        Self {
            level: true,
            flip_probability: flip_probability.clamp(0.0, 1.0),
        }
    }
}

impl Default for SimulatedSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSource for SimulatedSignal {
    fn read(&mut self) -> Result<bool, SignalError> {
        if rand::thread_rng().gen_bool(self.flip_probability) {
            self.level = !self.level;
            debug!(level = self.level, "Simulated signal flipped");
        }
        Ok(self.level)
    }

    fn describe(&self) -> String {
        format!("simulated (flip probability {})", self.flip_probability)
    }
}

/// Plays back a fixed sequence of levels, then keeps returning the last one.
///
/// A testing aid for driving the detector and sensor deterministically from
/// code, e.g. when replaying a captured trace. It is not selectable through
/// `SignalSourceKind`.
#[derive(Debug, Clone)]
pub struct ScriptedSignal {
    levels: VecDeque<bool>,
    last: bool,
}

impl ScriptedSignal {
    /// `idle` is returned when the script is empty from the start.
    pub fn new(levels: impl IntoIterator<Item = bool>, idle: bool) -> Self {
        Self {
            levels: levels.into_iter().collect(),
            last: idle,
        }
    }

    /// Number of scripted samples not yet read.
    pub fn remaining(&self) -> usize {
        self.levels.len()
    }
}

impl SignalSource for ScriptedSignal {
    fn read(&mut self) -> Result<bool, SignalError> {
        if let Some(level) = self.levels.pop_front() {
            self.last = level;
        }
        Ok(self.last)
    }

    fn describe(&self) -> String {
        format!("scripted ({} samples left)", self.levels.len())
    }
}
