//! Event Sensor Library
//!
//! This library provides the components of a field-deployed event sensor that
//! reports digital input edges to a remote log collector:
//!
//! - **config**: Environment-based configuration for the sensor
//! - **signal**: Signal sources (sysfs GPIO, simulated, scripted)
//! - **detector**: Edge detection with pluggable trigger predicates
//! - **record**: Event records and their line/wire formats
//! - **client**: Acknowledged TCP delivery with backlog warnings
//! - **sink**: Durable primary and unsent logs
//! - **sensor**: Start-up gate and the fixed-period polling loop
//!
//! # Example
//!
//! ```no_run
//! use event_sensor::config::Config;
//! use event_sensor::sensor::EventSensor;
//! use event_sensor::signal;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     // Refuses to start while an unsent log is present
//!     let source = signal::from_config(&config.signal_source);
//!     let mut sensor = EventSensor::start(&config, source)
//!         .await
//!         .expect("Start-up checks failed");
//!
//!     // Poll until Ctrl+C
//!     sensor.run().await.expect("Local logs unavailable");
//! }
//! ```

// Module declarations
pub mod client;
pub mod config;
pub mod detector;
pub mod record;
pub mod sensor;
pub mod signal;
pub mod sink;

// Re-export commonly used types at crate root for convenience
pub use client::{DeliveryClient, DeliveryError, DeliveryOutcome, DeliveryState, DeliveryStats};
pub use config::{Config, ConfigError, SignalSourceKind};
pub use detector::{EdgeDetector, EdgePolicy, EventTrigger, TriggerPredicate};
pub use record::EventRecord;
pub use sensor::{EventSensor, SensorError, StartupState};
pub use signal::{ScriptedSignal, SignalError, SignalSource, SimulatedSignal, SysfsGpio};
pub use sink::{LogSink, SinkError};
