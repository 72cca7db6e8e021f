//! Sensor Sources
//!
//! Where readings come from: either real serial links or the emulated
//! waveform generator. The rest of the pipeline never branches on an
//! emulation flag; it asks the source.

use crate::reader::ReaderHandle;
use bench_core::{ConfigData, SensorId};
use sensor_health::HealthRegistry;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::info;

/// A reading before offset correction, as produced by a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub sensor: SensorId,
    pub value: f64,
}

/// Thread-safe inlet into the sensor manager. Sources on other threads may
/// send freely; delivery happens on the runtime.
pub type SampleSink = mpsc::UnboundedSender<RawSample>;

/// Capability implemented by both the hardware and emulation data paths.
pub trait SensorSource: Send + Sync {
    /// Begin producing data. The emulation source feeds `sink` from its
    /// waveform thread; the hardware source's readers publish serial lines
    /// instead and are attached as ports are detected.
    fn start(&self, sink: SampleSink);

    /// Stop producing data and release underlying resources.
    fn stop(&self);

    /// Whether `sensor` currently delivers data. For a calculated sensor
    /// this is the conjunction over its configured dependencies.
    fn is_connected(&self, sensor: SensorId) -> bool;
}

/// The real data path: one reader task per detected sensor, health-tracked.
pub struct HardwareSource {
    config: ConfigData,
    health: HealthRegistry,
    readers: Mutex<HashMap<SensorId, ReaderHandle>>,
}

impl HardwareSource {
    pub fn new(config: ConfigData, health: HealthRegistry) -> Self {
        Self {
            config,
            health,
            readers: Mutex::new(HashMap::new()),
        }
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Adopt a reader task for a sensor, stopping any previous one. Called
    /// at startup for initially detected sensors and again on reconnection
    /// or rediscovery.
    pub fn attach_reader(&self, handle: ReaderHandle) {
        let sensor = handle.sensor();
        let previous = self
            .readers
            .lock()
            .expect("reader table lock poisoned")
            .insert(sensor, handle);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    pub fn has_reader(&self, sensor: SensorId) -> bool {
        self.readers
            .lock()
            .expect("reader table lock poisoned")
            .contains_key(&sensor)
    }
}

impl SensorSource for HardwareSource {
    fn start(&self, _sink: SampleSink) {
        // Hardware readings arrive as serial-line events from the attached
        // reader tasks; nothing flows through the sink.
    }

    fn stop(&self) {
        let mut readers = self.readers.lock().expect("reader table lock poisoned");
        for (sensor, handle) in readers.drain() {
            info!("stopping reader for {}", sensor);
            handle.stop();
        }
    }

    fn is_connected(&self, sensor: SensorId) -> bool {
        if let Some(calc) = self.config.calculated(sensor) {
            return !calc.dependencies.is_empty()
                && calc.dependencies.iter().all(|dep| self.is_connected(*dep));
        }
        self.has_reader(sensor) && self.health.is_connected(sensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_health::MonitorConfig;

    fn config_with_enabled(ids: &[SensorId]) -> ConfigData {
        let mut config = ConfigData::default();
        for sensor in config.sensors.values_mut() {
            sensor.enabled = ids.contains(&sensor.id);
        }
        config
    }

    #[test]
    fn test_hardware_connectivity_requires_reader_and_health() {
        let health = HealthRegistry::new();
        let source = HardwareSource::new(
            config_with_enabled(&[SensorId::Force]),
            health.clone(),
        );

        // Health record alone is not enough without a reader task.
        health.add_sensor(SensorId::Force, MonitorConfig::default(), true);
        assert!(!source.is_connected(SensorId::Force));
        assert!(!source.is_connected(SensorId::Disp1));
    }

    #[test]
    fn test_hardware_arc_follows_dependencies() {
        let health = HealthRegistry::new();
        let source = HardwareSource::new(ConfigData::default(), health.clone());
        // No DISP readers: the calculated channel is down.
        assert!(!source.is_connected(SensorId::Arc));
    }
}
