//! Sensor Identity
//!
//! The closed set of sensors known to the workbench. Values double as dense
//! array indices so per-sensor state can live in fixed-size arrays.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A sensor name that is not part of the closed sensor set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sensor: {0}")]
pub struct UnknownSensor(pub String);

/// The sensors of the workbench. `Arc` is calculated from the displacement
/// channels; all others are physical serial links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorId {
    /// Force transducer (0)
    #[serde(rename = "FORCE")]
    Force = 0,
    /// Displacement transducer 1
    #[serde(rename = "DISP_1")]
    Disp1 = 1,
    /// Displacement transducer 2
    #[serde(rename = "DISP_2")]
    Disp2 = 2,
    /// Displacement transducer 3
    #[serde(rename = "DISP_3")]
    Disp3 = 3,
    /// Displacement transducer 4
    #[serde(rename = "DISP_4")]
    Disp4 = 4,
    /// Displacement transducer 5
    #[serde(rename = "DISP_5")]
    Disp5 = 5,
    /// Calculated deflection channel: `DISP_1 - (DISP_2 + DISP_3) / 2`
    #[serde(rename = "ARC")]
    Arc = 6,
}

impl SensorId {
    /// Number of sensors, calculated channel included.
    pub const COUNT: usize = 7;

    /// All sensors in index order.
    pub const ALL: [SensorId; Self::COUNT] = [
        SensorId::Force,
        SensorId::Disp1,
        SensorId::Disp2,
        SensorId::Disp3,
        SensorId::Disp4,
        SensorId::Disp5,
        SensorId::Arc,
    ];

    /// The physical (serial-attached) sensors.
    pub const PHYSICAL: [SensorId; 6] = [
        SensorId::Force,
        SensorId::Disp1,
        SensorId::Disp2,
        SensorId::Disp3,
        SensorId::Disp4,
        SensorId::Disp5,
    ];

    /// The displacement transducers.
    pub const DISPLACEMENTS: [SensorId; 5] = [
        SensorId::Disp1,
        SensorId::Disp2,
        SensorId::Disp3,
        SensorId::Disp4,
        SensorId::Disp5,
    ];

    /// Dense array index of this sensor.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Inverse of [`SensorId::index`].
    pub fn from_index(index: usize) -> Option<SensorId> {
        Self::ALL.get(index).copied()
    }

    /// Whether this sensor is derived rather than read from hardware.
    pub const fn is_calculated(self) -> bool {
        matches!(self, SensorId::Arc)
    }

    /// Whether this sensor is one of the displacement transducers.
    pub const fn is_displacement(self) -> bool {
        matches!(
            self,
            SensorId::Disp1 | SensorId::Disp2 | SensorId::Disp3 | SensorId::Disp4 | SensorId::Disp5
        )
    }

    /// Canonical wire/config name, e.g. `DISP_2`.
    pub const fn name(self) -> &'static str {
        match self {
            SensorId::Force => "FORCE",
            SensorId::Disp1 => "DISP_1",
            SensorId::Disp2 => "DISP_2",
            SensorId::Disp3 => "DISP_3",
            SensorId::Disp4 => "DISP_4",
            SensorId::Disp5 => "DISP_5",
            SensorId::Arc => "ARC",
        }
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SensorId {
    type Err = UnknownSensor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.name() == s)
            .ok_or_else(|| UnknownSensor(s.to_string()))
    }
}
