//! Configuration Loading
//!
//! Sensor metadata comes from a single JSON file. A missing or unparsable
//! file falls back to built-in defaults so the acquisition core can always
//! start; the failure is logged, never propagated.

use crate::sensor::SensorId;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};

/// Errors raised while interpreting a configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A sensor appears in the wrong section, e.g. `ARC` under `sensors`.
    #[error("sensor {0} is not valid in the {1} section")]
    WrongSection(SensorId, &'static str),
}

/// Static metadata for one physical sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub id: SensorId,
    pub display_name: String,
    pub description: String,
    /// Full-scale value, used by display layers for axis ranges.
    pub max: f64,
    pub baud: u32,
    /// Expected wire-level sender id (`usSenderId=...`) for displacement
    /// sensors. Empty when the sensor format carries no sender id.
    pub serial_id: String,
    pub enabled: bool,
}

/// Static metadata for a derived channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculatedSensorConfig {
    pub id: SensorId,
    pub display_name: String,
    pub description: String,
    pub max: f64,
    /// Physical sensors this channel is computed from, in formula order.
    pub dependencies: Vec<SensorId>,
}

/// Immutable configuration snapshot for the whole pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigData {
    pub emulation: bool,
    pub sensors: HashMap<SensorId, SensorConfig>,
    pub calculated: HashMap<SensorId, CalculatedSensorConfig>,
}

impl ConfigData {
    pub fn sensor(&self, id: SensorId) -> Option<&SensorConfig> {
        self.sensors.get(&id)
    }

    pub fn calculated(&self, id: SensorId) -> Option<&CalculatedSensorConfig> {
        self.calculated.get(&id)
    }

    /// Whether a sensor is enabled. A calculated sensor is enabled when all
    /// of its dependencies are.
    pub fn is_enabled(&self, id: SensorId) -> bool {
        if let Some(calc) = self.calculated.get(&id) {
            return !calc.dependencies.is_empty()
                && calc.dependencies.iter().all(|dep| self.is_enabled(*dep));
        }
        self.sensors.get(&id).map(|s| s.enabled).unwrap_or(false)
    }

    /// Enabled physical sensors in index order.
    pub fn enabled_physical(&self) -> Vec<SensorId> {
        SensorId::PHYSICAL
            .into_iter()
            .filter(|id| self.is_enabled(*id))
            .collect()
    }

    /// Number of enabled displacement transducers, used to cap detection.
    pub fn enabled_disp_count(&self) -> usize {
        SensorId::DISPLACEMENTS
            .into_iter()
            .filter(|id| self.is_enabled(*id))
            .count()
    }

    /// Configured wire-level sender id for a sensor, if any.
    pub fn serial_id(&self, id: SensorId) -> Option<&str> {
        self.sensors
            .get(&id)
            .map(|s| s.serial_id.as_str())
            .filter(|s| !s.is_empty())
    }
}

impl Default for ConfigData {
    fn default() -> Self {
        let mut sensors = HashMap::new();
        sensors.insert(
            SensorId::Force,
            SensorConfig {
                id: SensorId::Force,
                display_name: "Force".to_string(),
                description: "Force transducer".to_string(),
                max: 1000.0,
                baud: 115200,
                serial_id: String::new(),
                enabled: true,
            },
        );
        for (i, id) in SensorId::DISPLACEMENTS.into_iter().enumerate() {
            sensors.insert(
                id,
                SensorConfig {
                    id,
                    display_name: format!("Displacement {}", i + 1),
                    description: "Displacement transducer".to_string(),
                    max: 5.0,
                    baud: 9600,
                    serial_id: String::new(),
                    // Only the first displacement channel is wired by default.
                    enabled: i == 0,
                },
            );
        }

        let mut calculated = HashMap::new();
        calculated.insert(
            SensorId::Arc,
            CalculatedSensorConfig {
                id: SensorId::Arc,
                display_name: "Arc".to_string(),
                description: "Deflection derived from DISP_1..DISP_3".to_string(),
                max: 5.0,
                dependencies: vec![SensorId::Disp1, SensorId::Disp2, SensorId::Disp3],
            },
        );

        ConfigData {
            emulation: true,
            sensors,
            calculated,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSensor {
    #[serde(default = "default_display_name")]
    display_name: String,
    #[serde(default = "default_description")]
    description: String,
    #[serde(default = "default_max")]
    max: f64,
    #[serde(default = "default_baud")]
    baud: u32,
    #[serde(default)]
    serial_id: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct RawCalculated {
    #[serde(default = "default_display_name")]
    display_name: String,
    #[serde(default = "default_description")]
    description: String,
    #[serde(default = "default_max")]
    max: f64,
    #[serde(default)]
    dependencies: Vec<SensorId>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_emulation")]
    emulation: bool,
    #[serde(default)]
    sensors: HashMap<SensorId, RawSensor>,
    #[serde(default)]
    calculated_sensors: HashMap<SensorId, RawCalculated>,
}

fn default_display_name() -> String {
    "Unnamed Sensor".to_string()
}

fn default_description() -> String {
    "No description".to_string()
}

fn default_max() -> f64 {
    5.0
}

fn default_baud() -> u32 {
    9600
}

fn default_enabled() -> bool {
    true
}

fn default_emulation() -> bool {
    true
}

/// Parse a configuration document. Sensor keys outside the closed
/// [`SensorId`] set, or sensors listed in the wrong section, are errors.
pub fn parse_config(text: &str) -> Result<ConfigData, ConfigError> {
    let raw: RawConfig = serde_json::from_str(text)?;

    let mut sensors = HashMap::new();
    for (id, s) in raw.sensors {
        if id.is_calculated() {
            return Err(ConfigError::WrongSection(id, "sensors"));
        }
        sensors.insert(
            id,
            SensorConfig {
                id,
                display_name: s.display_name,
                description: s.description,
                max: s.max,
                baud: s.baud,
                serial_id: s.serial_id,
                enabled: s.enabled,
            },
        );
    }

    let mut calculated = HashMap::new();
    for (id, c) in raw.calculated_sensors {
        if !id.is_calculated() {
            return Err(ConfigError::WrongSection(id, "calculated_sensors"));
        }
        calculated.insert(
            id,
            CalculatedSensorConfig {
                id,
                display_name: c.display_name,
                description: c.description,
                max: c.max,
                dependencies: c.dependencies,
            },
        );
    }

    Ok(ConfigData {
        emulation: raw.emulation,
        sensors,
        calculated,
    })
}

/// Load configuration from `path`. Falls back to [`ConfigData::default`]
/// when the file is missing or malformed; the failure is logged.
pub fn load_config(path: &Path) -> ConfigData {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            error!("configuration file {} not readable: {}", path.display(), e);
            return ConfigData::default();
        }
    };

    match parse_config(&text) {
        Ok(config) => {
            info!("configuration loaded from {}", path.display());
            config
        }
        Err(e) => {
            error!("failed to parse {}: {}", path.display(), e);
            ConfigData::default()
        }
    }
}
