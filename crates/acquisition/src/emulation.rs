//! Emulated Sensor Source
//!
//! Deterministic waveforms plus uniform noise, published at 10 Hz from a
//! dedicated OS thread so the emulated data path crosses the same thread
//! boundary real hardware would.

use crate::source::{RawSample, SampleSink, SensorSource};
use bench_core::{ConfigData, SensorId};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Emission rate of the waveform thread.
pub const EMULATION_RATE_HZ: f64 = 10.0;

/// Per-channel phase offsets, seconds.
const DISP_PHASES: [f64; 5] = [0.0, 1.5, 3.0, 4.5, 6.0];

/// Per-channel amplitude scaling.
const DISP_SCALES: [f64; 5] = [1.00, 1.10, 0.90, 1.20, 0.80];

/// Noiseless force waveform: a slow swing across most of the transducer
/// range.
pub fn force_waveform(t: f64) -> f64 {
    500.0 + 500.0 * t.sin()
}

/// Phase offset for displacement channel `k` (0-based).
pub fn disp_phase(k: usize) -> f64 {
    DISP_PHASES[k]
}

/// Amplitude scale for displacement channel `k` (0-based).
pub fn disp_scale(k: usize) -> f64 {
    DISP_SCALES[k]
}

/// Noiseless displacement ramp before scaling: a sawtooth advancing 0.1/s,
/// wrapping every 10 units.
pub fn disp_waveform(k: usize, t: f64) -> f64 {
    ((t + disp_phase(k)) * 0.1).rem_euclid(10.0)
}

/// Synthesizes readings for every enabled sensor.
pub struct EmulationSource {
    config: ConfigData,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EmulationSource {
    pub fn new(config: ConfigData) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    fn waveform_loop(config: ConfigData, sink: SampleSink, running: Arc<AtomicBool>) {
        let started = Instant::now();
        let period = Duration::from_secs_f64(1.0 / EMULATION_RATE_HZ);
        let mut rng = rand::rng();

        while running.load(Ordering::SeqCst) {
            let t = started.elapsed().as_secs_f64();
            let mut samples = Vec::with_capacity(SensorId::PHYSICAL.len());

            if config.is_enabled(SensorId::Force) {
                samples.push(RawSample {
                    sensor: SensorId::Force,
                    value: force_waveform(t) + rng.random_range(-10.0..10.0),
                });
            }
            for (k, sensor) in SensorId::DISPLACEMENTS.into_iter().enumerate() {
                if config.is_enabled(sensor) {
                    samples.push(RawSample {
                        sensor,
                        value: (disp_waveform(k, t) + rng.random_range(-0.05..0.05))
                            * disp_scale(k),
                    });
                }
            }

            for sample in samples {
                if sink.send(sample).is_err() {
                    debug!("sample sink closed, emulation thread exiting");
                    return;
                }
            }

            std::thread::sleep(period);
        }
    }
}

impl SensorSource for EmulationSource {
    fn start(&self, sink: SampleSink) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("starting emulation source at {} Hz", EMULATION_RATE_HZ);
        let config = self.config.clone();
        let running = self.running.clone();
        let handle = std::thread::spawn(move || Self::waveform_loop(config, sink, running));
        *self.thread.lock().expect("emulation thread lock poisoned") = Some(handle);
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self
            .thread
            .lock()
            .expect("emulation thread lock poisoned")
            .take()
        {
            let _ = handle.join();
        }
        info!("emulation source stopped");
    }

    fn is_connected(&self, sensor: SensorId) -> bool {
        // Emulated sensors never drop out; connectivity is configuration.
        self.config.is_enabled(sensor)
    }
}

impl Drop for EmulationSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    fn all_enabled() -> ConfigData {
        let mut config = ConfigData::default();
        for sensor in config.sensors.values_mut() {
            sensor.enabled = true;
        }
        config
    }

    #[test]
    fn test_force_waveform_envelope() {
        for i in 0..100 {
            let t = f64::from(i) * 0.37;
            let v = force_waveform(t);
            assert!((0.0..=1000.0).contains(&v));
        }
    }

    #[test]
    fn test_disp_waveform_ramp_and_wrap() {
        // Channel 0 has no phase: at t = 5 s the ramp reads 0.5.
        assert!((disp_waveform(0, 5.0) - 0.5).abs() < 1e-12);
        // Wraps every 100 s of ramp input.
        assert!((disp_waveform(0, 100.0) - 0.0).abs() < 1e-12);
        // Phase offsets shift the ramp forward.
        assert!((disp_waveform(1, 0.0) - 0.15).abs() < 1e-12);
        assert!(disp_waveform(4, 0.0) > disp_waveform(0, 0.0));
    }

    #[tokio::test]
    async fn test_emulation_publishes_only_enabled_sensors() {
        let mut config = all_enabled();
        config.sensors.get_mut(&SensorId::Disp4).unwrap().enabled = false;
        config.sensors.get_mut(&SensorId::Disp5).unwrap().enabled = false;

        let source = EmulationSource::new(config);
        let (sink, mut rx) = mpsc::unbounded_channel();
        source.start(sink);

        let mut seen = HashSet::new();
        for _ in 0..20 {
            let sample = rx.recv().await.expect("emulation emits samples");
            assert!(sample.value.is_finite());
            seen.insert(sample.sensor);
        }
        source.stop();

        assert!(seen.contains(&SensorId::Force));
        assert!(seen.contains(&SensorId::Disp1));
        assert!(!seen.contains(&SensorId::Disp4));
        assert!(!seen.contains(&SensorId::Disp5));
    }

    #[tokio::test]
    async fn test_stop_ends_the_stream() {
        let source = EmulationSource::new(all_enabled());
        let (sink, mut rx) = mpsc::unbounded_channel();
        source.start(sink);
        let _ = rx.recv().await;
        source.stop();

        // Drain whatever was in flight; the channel must then close.
        while rx.try_recv().is_ok() {}
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_emulated_connectivity_is_configuration() {
        let source = EmulationSource::new(all_enabled());
        assert!(source.is_connected(SensorId::Disp5));
        assert!(source.is_connected(SensorId::Arc));

        let source = EmulationSource::new(ConfigData::default());
        // DISP_2/3 disabled by default, so the calculated channel is down.
        assert!(!source.is_connected(SensorId::Arc));
        assert!(!source.is_connected(SensorId::Disp2));
    }
}
