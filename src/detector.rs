//! Edge detection over a sampled digital input.
//!
//! The detector is sampled once per tick. It compares the new level with the
//! level seen on the previous tick and fires at most one trigger per sample.
//! There is no coalescing of edges that happen between two samples.

use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::signal::SignalSource;

/// Decides whether a pair of consecutive samples is an event.
pub trait TriggerPredicate: Send {
    /// `true` if the transition `previous -> current` is an event.
    fn fires(&self, previous: bool, current: bool) -> bool;

    /// Level assumed before the first sample.
    fn initial_level(&self) -> bool;
}

/// Which transition of the input counts as an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EdgePolicy {
    /// LOW to HIGH
    #[default]
    Rising,

    /// HIGH to LOW
    Falling,
}

impl TriggerPredicate for EdgePolicy {
    fn fires(&self, previous: bool, current: bool) -> bool {
        match self {
            EdgePolicy::Rising => current && !previous,
            EdgePolicy::Falling => !current && previous,
        }
    }

    // The level that cannot itself produce a trigger on the first sample.
    fn initial_level(&self) -> bool {
        match self {
            EdgePolicy::Rising => true,
            EdgePolicy::Falling => false,
        }
    }
}

impl FromStr for EdgePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rising" => Ok(EdgePolicy::Rising),
            "falling" => Ok(EdgePolicy::Falling),
            other => Err(format!(
                "unknown edge policy '{}', expected 'rising' or 'falling'",
                other
            )),
        }
    }
}

impl std::fmt::Display for EdgePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgePolicy::Rising => write!(f, "rising"),
            EdgePolicy::Falling => write!(f, "falling"),
        }
    }
}

/// Emitted when the detector observes an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTrigger {
    /// Optional message attached to the resulting record
    pub message: Option<String>,
}

/// Stateful edge detector owning its signal source.
pub struct EdgeDetector {
    source: Box<dyn SignalSource>,
    predicate: Box<dyn TriggerPredicate>,
    previous_level: bool,
    min_spacing: Duration,
    last_fired: Option<Instant>,
    message: Option<String>,
}

impl EdgeDetector {
    /// Create a detector using one of the built-in edge policies.
    pub fn new(source: Box<dyn SignalSource>, policy: EdgePolicy) -> Self {
        Self::with_predicate(source, Box::new(policy))
    }

    /// Create a detector with an application-defined predicate.
    pub fn with_predicate(
        source: Box<dyn SignalSource>,
        predicate: Box<dyn TriggerPredicate>,
    ) -> Self {
        let previous_level = predicate.initial_level();
        Self {
            source,
            predicate,
            previous_level,
            min_spacing: Duration::ZERO,
            last_fired: None,
            message: None,
        }
    }

    /// Suppress triggers closer than `spacing` to the previous fired one.
    /// Zero disables debouncing.
    pub fn with_min_spacing(mut self, spacing: Duration) -> Self {
        self.min_spacing = spacing;
        self
    }

    /// Attach `message` to every trigger.
    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    /// Level recorded on the last successful sample.
    pub fn previous_level(&self) -> bool {
        self.previous_level
    }

    /// Sample the source once.
    ///
    /// A failed read is logged and treated as no sample: the previous level
    /// is kept and no trigger fires.
    pub fn check(&mut self) -> Option<EventTrigger> {
        match self.source.read() {
            Ok(level) => self.observe(level, Instant::now()),
            Err(e) => {
                warn!(error = %e, "Signal read failed, skipping sample");
                None
            }
        }
    }

    fn observe(&mut self, current: bool, now: Instant) -> Option<EventTrigger> {
        let fired = self.predicate.fires(self.previous_level, current);
        self.previous_level = current;

        if !fired {
            return None;
        }

        if let Some(last) = self.last_fired {
            if !self.min_spacing.is_zero() && now.duration_since(last) < self.min_spacing {
                debug!(
                    since_last_ms = now.duration_since(last).as_millis() as u64,
                    min_spacing_ms = self.min_spacing.as_millis() as u64,
                    "Edge suppressed by minimum event spacing"
                );
                return None;
            }
        }

        self.last_fired = Some(now);
        Some(EventTrigger {
            message: self.message.clone(),
        })
    }
}
