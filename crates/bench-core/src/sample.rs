//! Sample and Frame Records

use crate::sensor::SensorId;
use serde::{Deserialize, Serialize};

/// A single sensor reading. Raw (pre-offset) and calibrated (post-offset)
/// samples share this shape and are distinguished by the topic they are
/// published on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Absolute wall-clock seconds since the Unix epoch.
    pub timestamp: f64,
    pub sensor: SensorId,
    pub value: f64,
}

/// One fused snapshot of every sensor at a processor tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessedFrame {
    /// Wall-clock seconds at the tick that produced this frame.
    pub timestamp: f64,
    /// Values indexed by [`SensorId::index`]. Disconnected sensors carry NaN.
    pub values: [f64; SensorId::COUNT],
}

impl ProcessedFrame {
    /// Value for a sensor by id.
    pub fn value(&self, sensor: SensorId) -> f64 {
        self.values[sensor.index()]
    }
}

/// Commands addressed to the sensor manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum SensorCommand {
    /// Record the sensor's current calibrated reading as its new zero.
    Zero { sensor_id: SensorId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_value_lookup() {
        let mut values = [0.0; SensorId::COUNT];
        values[SensorId::Disp2.index()] = 1.5;
        let frame = ProcessedFrame {
            timestamp: 10.0,
            values,
        };
        assert_eq!(frame.value(SensorId::Disp2), 1.5);
        assert_eq!(frame.value(SensorId::Force), 0.0);
    }

    #[test]
    fn test_zero_command_wire_shape() {
        let cmd = SensorCommand::Zero {
            sensor_id: SensorId::Force,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"action":"zero","sensor_id":"FORCE"}"#);
    }
}
