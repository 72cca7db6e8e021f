//! Sensor Manager
//!
//! Consumes raw serial lines and emulated samples, applies per-sensor zero
//! offsets, and republishes every reading twice: pre-offset on
//! `sensor_raw_update`, post-offset on `sensor_update`, in that order.

use crate::source::{RawSample, SensorSource};
use bench_core::{epoch_secs, ConfigData, SensorCommand, SensorId, SensorSample};
use event_bus::{Event, EventBus, Topic};
use sensor_wire::{parse_disp_line, parse_force_line};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct CacheState {
    values: [f64; SensorId::COUNT],
    offsets: [f64; SensorId::COUNT],
}

/// Current calibrated value and zero offset per sensor. Written only by the
/// sensor manager; snapshotted by whoever needs the latest readings.
#[derive(Debug, Default)]
pub struct SensorCache {
    inner: Mutex<CacheState>,
}

impl SensorCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
        let mut state = self.inner.lock().expect("sensor cache lock poisoned");
        f(&mut state)
    }

    /// Latest calibrated value for one sensor.
    pub fn value(&self, sensor: SensorId) -> f64 {
        self.with(|state| state.values[sensor.index()])
    }

    /// Snapshot of all calibrated values.
    pub fn values(&self) -> [f64; SensorId::COUNT] {
        self.with(|state| state.values)
    }

    pub fn offset(&self, sensor: SensorId) -> f64 {
        self.with(|state| state.offsets[sensor.index()])
    }

    /// Apply the offset to a raw reading, cache the result, return it.
    pub fn correct_and_store(&self, sensor: SensorId, raw: f64) -> f64 {
        self.with(|state| {
            let corrected = raw - state.offsets[sensor.index()];
            state.values[sensor.index()] = corrected;
            corrected
        })
    }

    /// Fold the current calibrated value into the offset so subsequent
    /// readings start near zero. Returns the new offset.
    pub fn zero(&self, sensor: SensorId) -> f64 {
        self.with(|state| {
            state.offsets[sensor.index()] += state.values[sensor.index()];
            state.offsets[sensor.index()]
        })
    }
}

/// Parses, calibrates and republishes sensor readings.
pub struct SensorManager {
    config: ConfigData,
    source: Arc<dyn SensorSource>,
    bus: EventBus,
    cache: Arc<SensorCache>,
}

impl SensorManager {
    pub fn new(config: ConfigData, source: Arc<dyn SensorSource>, bus: EventBus) -> Self {
        Self {
            config,
            source,
            bus,
            cache: Arc::new(SensorCache::new()),
        }
    }

    /// Shared handle onto the current values and offsets.
    pub fn cache(&self) -> Arc<SensorCache> {
        self.cache.clone()
    }

    /// Delegates to the source; a calculated sensor is up when all of its
    /// dependencies are.
    pub fn is_sensor_connected(&self, sensor: SensorId) -> bool {
        self.source.is_connected(sensor)
    }

    /// Run the manager on the runtime, consuming serial lines, commands and
    /// emulated samples until the bus closes.
    pub fn spawn(self, samples: mpsc::UnboundedReceiver<RawSample>) -> JoinHandle<()> {
        tokio::spawn(self.run(samples))
    }

    async fn run(self, mut samples: mpsc::UnboundedReceiver<RawSample>) {
        let mut serial_rx = self.bus.subscribe(Topic::SerialData);
        let mut command_rx = self.bus.subscribe(Topic::SensorCommand);
        let mut samples_open = true;
        info!("sensor manager started");

        loop {
            tokio::select! {
                event = serial_rx.recv() => match event {
                    Ok(Event::SerialData { sensor, line }) => self.on_serial_line(sensor, &line),
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!("sensor manager dropped {} serial events", n),
                    Err(RecvError::Closed) => break,
                },
                event = command_rx.recv() => match event {
                    Ok(Event::SensorCommand(command)) => self.on_command(command),
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!("sensor manager dropped {} commands", n),
                    Err(RecvError::Closed) => break,
                },
                sample = samples.recv(), if samples_open => match sample {
                    Some(sample) => self.notify(sample.sensor, sample.value),
                    None => samples_open = false,
                },
            }
        }
        info!("sensor manager stopped");
    }

    fn on_serial_line(&self, sensor: SensorId, line: &str) {
        match sensor {
            SensorId::Force => {
                // Malformed frames are dropped without note; they are routine
                // at link setup and teardown.
                if let Some(value) = parse_force_line(line) {
                    self.notify(sensor, value);
                }
            }
            s if s.is_displacement() => {
                let Some(reading) = parse_disp_line(line) else {
                    return;
                };
                match self.config.serial_id(s) {
                    Some(expected) if reading.sender_id == expected => {
                        self.notify(s, reading.value);
                    }
                    Some(expected) => debug!(
                        "{}: dropping line from sender {} (configured {})",
                        s, reading.sender_id, expected
                    ),
                    None => debug!("{}: no configured sender id, dropping line", s),
                }
            }
            _ => {}
        }
    }

    fn on_command(&self, command: SensorCommand) {
        match command {
            SensorCommand::Zero { sensor_id } => {
                let offset = self.cache.zero(sensor_id);
                info!("zeroed {} (offset now {:.6})", sensor_id, offset);
            }
        }
    }

    /// Publish the raw sample, apply the offset, publish the calibrated one.
    /// Raw strictly precedes calibrated for every reading.
    fn notify(&self, sensor: SensorId, raw: f64) {
        let timestamp = epoch_secs();
        self.bus.publish(Event::SensorRawUpdate(SensorSample {
            timestamp,
            sensor,
            value: raw,
        }));
        let corrected = self.cache.correct_and_store(sensor, raw);
        self.bus.publish(Event::SensorUpdate(SensorSample {
            timestamp,
            sensor,
            value: corrected,
        }));
    }
}
