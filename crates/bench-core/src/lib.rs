//! Core Data Model
//!
//! Shared types for the workbench acquisition pipeline: the closed sensor
//! set, sample and frame records, test metadata, and the JSON configuration
//! loader.

mod config;
mod sample;
mod sensor;
mod test;

pub use config::{
    load_config, parse_config, CalculatedSensorConfig, ConfigData, ConfigError, SensorConfig,
};
pub use sample::{ProcessedFrame, SensorCommand, SensorSample};
pub use sensor::{SensorId, UnknownSensor};
pub use test::{TestMetaData, TestState};

/// Wall-clock time as fractional seconds since the Unix epoch.
pub fn epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
