//! Serial Port Auto-Detection
//!
//! Binds sensors to serial device paths by probing every unclaimed port at
//! each requested sensor's baud and classifying what it emits. Displacement
//! sensors are additionally validated by their configured wire-level sender
//! id, so two identical transducers never swap channels.

use crate::parser::{classify_line, LineKind};
use bench_core::{ConfigData, SensorId};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

/// Lines to inspect per probe before giving up on a port.
pub const PROBE_MAX_LINES: usize = 30;

/// How long a probe listens for classifiable traffic.
pub const PROBE_WINDOW: Duration = Duration::from_secs(3);

/// Confidence assigned to a force match. The force frame shape is stricter
/// than the displacement one, hence the higher figure.
pub const FORCE_CONFIDENCE: f64 = 0.95;

/// Confidence assigned to a displacement match.
pub const DISP_CONFIDENCE: f64 = 0.90;

/// Outcome of probing one port for one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeHit {
    Force,
    Disp,
}

/// A sensor bound to a serial device path.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedSensor {
    pub sensor: SensorId,
    pub path: String,
    pub baud: u32,
    pub confidence: f64,
}

/// Access to the platform serial layer, abstracted so detection logic can be
/// exercised without hardware.
pub trait PortScanner {
    /// Candidate serial device paths currently present.
    fn available_ports(&self) -> Vec<String>;

    /// Open `path` at `baud` and collect up to `max_lines` decoded text
    /// lines within `window`. Implementations let the device settle after
    /// opening and silently drop undecodable data (likely a wrong baud).
    fn sample_lines(
        &self,
        path: &str,
        baud: u32,
        max_lines: usize,
        window: Duration,
    ) -> impl std::future::Future<Output = Vec<String>> + Send;
}

/// Maps sensors onto serial ports and remembers which ports are claimed so
/// repeated invocations (reconnection, rediscovery) never offer a port twice.
pub struct PortDetector<S> {
    scanner: S,
    used_ports: HashSet<String>,
    detected: HashMap<SensorId, DetectedSensor>,
}

impl<S: PortScanner> PortDetector<S> {
    pub fn new(scanner: S) -> Self {
        Self {
            scanner,
            used_ports: HashSet::new(),
            detected: HashMap::new(),
        }
    }

    /// Probe one port for one sensor kind. `expected_sender_id` narrows a
    /// displacement match to the configured transducer; a line with any
    /// other sender id does not count.
    pub async fn probe(
        &self,
        path: &str,
        baud: u32,
        expected_sender_id: Option<&str>,
        window: Duration,
    ) -> Option<ProbeHit> {
        let lines = self
            .scanner
            .sample_lines(path, baud, PROBE_MAX_LINES, window)
            .await;
        for line in &lines {
            match classify_line(line) {
                Some(LineKind::Force) => return Some(ProbeHit::Force),
                Some(LineKind::Disp { sender_id }) => match expected_sender_id {
                    Some(expected) if sender_id != expected => {
                        debug!(
                            "{}: sender id {} does not match expected {}",
                            path, sender_id, expected
                        );
                    }
                    _ => return Some(ProbeHit::Disp),
                },
                None => {}
            }
        }
        None
    }

    /// Single pass over unclaimed ports, trying each requested sensor at its
    /// baud. Matched ports are claimed until released.
    pub async fn auto_detect(
        &mut self,
        requested: &HashMap<SensorId, u32>,
        config: &ConfigData,
    ) -> HashMap<SensorId, DetectedSensor> {
        let ports = self.scanner.available_ports();
        info!(
            "probing {} port(s) for {} sensor(s)",
            ports.len(),
            requested.len()
        );

        // Deterministic probe order: sensors by id.
        let mut wanted: Vec<(SensorId, u32)> =
            requested.iter().map(|(id, baud)| (*id, *baud)).collect();
        wanted.sort_by_key(|(id, _)| *id);

        let disp_cap = config.enabled_disp_count();
        let mut disp_found = 0usize;
        let mut found = HashMap::new();

        for port in ports {
            if self.used_ports.contains(&port) {
                continue;
            }
            for (sensor, baud) in &wanted {
                if found.contains_key(sensor) || self.detected.contains_key(sensor) {
                    continue;
                }
                if sensor.is_displacement() && disp_found >= disp_cap {
                    continue;
                }

                let expected = if sensor.is_displacement() {
                    config.serial_id(*sensor)
                } else {
                    None
                };
                let hit = self.probe(&port, *baud, expected, PROBE_WINDOW).await;

                let confidence = match hit {
                    Some(ProbeHit::Force) if *sensor == SensorId::Force => FORCE_CONFIDENCE,
                    Some(ProbeHit::Disp) if sensor.is_displacement() => {
                        disp_found += 1;
                        DISP_CONFIDENCE
                    }
                    _ => continue,
                };

                let detected = DetectedSensor {
                    sensor: *sensor,
                    path: port.clone(),
                    baud: *baud,
                    confidence,
                };
                info!(
                    "detected {} on {} @ {} baud (confidence {:.0}%)",
                    sensor,
                    port,
                    baud,
                    confidence * 100.0
                );
                self.used_ports.insert(port.clone());
                self.detected.insert(*sensor, detected.clone());
                found.insert(*sensor, detected);
                break;
            }
        }

        found
    }

    /// Return a sensor's claimed port to the free pool, e.g. after a failed
    /// reconnection, so the next attempt may re-claim it.
    pub fn release_port(&mut self, sensor: SensorId) {
        if let Some(detected) = self.detected.remove(&sensor) {
            self.used_ports.remove(&detected.path);
            info!("released {} for {}", detected.path, sensor);
        }
    }

    /// The currently bound port for a sensor, if any.
    pub fn binding(&self, sensor: SensorId) -> Option<&DetectedSensor> {
        self.detected.get(&sensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORCE_LINE: &str = "ASC2 20945595 -165341 -1.527986e-01 -4.965955e+01 -0.000000e+00";

    fn disp_line(sender: &str) -> String {
        format!("12 us SPC_VAL usSenderId={sender} ulMicros=100 Val=0.25")
    }

    /// Scripted scanner: fixed ports, fixed lines per (path, baud).
    struct FakeScanner {
        ports: Vec<String>,
        lines: HashMap<(String, u32), Vec<String>>,
    }

    impl FakeScanner {
        fn new(ports: &[&str]) -> Self {
            Self {
                ports: ports.iter().map(|p| p.to_string()).collect(),
                lines: HashMap::new(),
            }
        }

        fn emit(mut self, path: &str, baud: u32, lines: &[String]) -> Self {
            self.lines
                .insert((path.to_string(), baud), lines.to_vec());
            self
        }
    }

    impl PortScanner for FakeScanner {
        fn available_ports(&self) -> Vec<String> {
            self.ports.clone()
        }

        async fn sample_lines(
            &self,
            path: &str,
            baud: u32,
            _max_lines: usize,
            _window: Duration,
        ) -> Vec<String> {
            self.lines
                .get(&(path.to_string(), baud))
                .cloned()
                .unwrap_or_default()
        }
    }

    fn test_config() -> ConfigData {
        let mut config = ConfigData::default();
        for (id, serial_id) in [
            (SensorId::Disp1, "0x2E01"),
            (SensorId::Disp2, "0x2E02"),
            (SensorId::Disp3, "0x2E03"),
        ] {
            let sensor = config.sensors.get_mut(&id).unwrap();
            sensor.enabled = true;
            sensor.serial_id = serial_id.to_string();
        }
        config
    }

    fn request(sensors: &[(SensorId, u32)]) -> HashMap<SensorId, u32> {
        sensors.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_detects_force_and_disp_by_sender_id() {
        let scanner = FakeScanner::new(&["/dev/ttyUSB0", "/dev/ttyUSB1"])
            .emit("/dev/ttyUSB0", 9600, &[disp_line("0x2E02")])
            .emit("/dev/ttyUSB1", 115200, &[FORCE_LINE.to_string()]);
        let mut detector = PortDetector::new(scanner);

        let found = detector
            .auto_detect(
                &request(&[(SensorId::Force, 115200), (SensorId::Disp2, 9600)]),
                &test_config(),
            )
            .await;

        assert_eq!(found.len(), 2);
        assert_eq!(found[&SensorId::Force].path, "/dev/ttyUSB1");
        assert_eq!(found[&SensorId::Force].confidence, FORCE_CONFIDENCE);
        assert_eq!(found[&SensorId::Disp2].path, "/dev/ttyUSB0");
        assert_eq!(found[&SensorId::Disp2].confidence, DISP_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_sender_id_mismatch_is_not_a_match() {
        let scanner = FakeScanner::new(&["/dev/ttyUSB0"])
            .emit("/dev/ttyUSB0", 9600, &[disp_line("0x2E99")]);
        let mut detector = PortDetector::new(scanner);

        let found = detector
            .auto_detect(&request(&[(SensorId::Disp1, 9600)]), &test_config())
            .await;

        assert!(found.is_empty());
        assert!(detector.binding(SensorId::Disp1).is_none());
    }

    #[tokio::test]
    async fn test_claimed_port_not_reoffered() {
        let scanner = FakeScanner::new(&["/dev/ttyUSB0"])
            .emit("/dev/ttyUSB0", 9600, &[disp_line("0x2E01")]);
        let mut detector = PortDetector::new(scanner);
        let config = test_config();

        let first = detector
            .auto_detect(&request(&[(SensorId::Disp1, 9600)]), &config)
            .await;
        assert_eq!(first.len(), 1);

        // Same port would also satisfy DISP_2 but is already claimed.
        let second = detector
            .auto_detect(&request(&[(SensorId::Disp2, 9600)]), &config)
            .await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_release_returns_port_to_pool() {
        let scanner = FakeScanner::new(&["/dev/ttyUSB0"])
            .emit("/dev/ttyUSB0", 9600, &[disp_line("0x2E01")]);
        let mut detector = PortDetector::new(scanner);
        let config = test_config();

        detector
            .auto_detect(&request(&[(SensorId::Disp1, 9600)]), &config)
            .await;
        detector.release_port(SensorId::Disp1);

        let again = detector
            .auto_detect(&request(&[(SensorId::Disp1, 9600)]), &config)
            .await;
        assert_eq!(again[&SensorId::Disp1].path, "/dev/ttyUSB0");
    }

    #[tokio::test]
    async fn test_disp_probing_stops_at_configured_count() {
        // Only DISP_1 is enabled: after one displacement match, remaining
        // displacement requests must not claim further ports.
        let mut config = ConfigData::default();
        config.sensors.get_mut(&SensorId::Disp1).unwrap().serial_id = "0x2E01".to_string();

        let scanner = FakeScanner::new(&["/dev/ttyUSB0", "/dev/ttyUSB1"])
            .emit("/dev/ttyUSB0", 9600, &[disp_line("0x2E01")])
            .emit("/dev/ttyUSB1", 9600, &[disp_line("0x2E01")]);
        let mut detector = PortDetector::new(scanner);

        let found = detector
            .auto_detect(
                &request(&[(SensorId::Disp1, 9600), (SensorId::Disp2, 9600)]),
                &config,
            )
            .await;

        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&SensorId::Disp1));
    }

    #[tokio::test]
    async fn test_probe_expected_sender_id_filters_lines() {
        let scanner = FakeScanner::new(&[]).emit(
            "/dev/ttyACM0",
            9600,
            &[disp_line("0x2E05"), disp_line("0x2E01")],
        );
        let detector = PortDetector::new(scanner);

        // The matching line appears after a foreign one; the probe keeps
        // scanning instead of bailing on the first sender mismatch.
        let hit = detector
            .probe("/dev/ttyACM0", 9600, Some("0x2E01"), PROBE_WINDOW)
            .await;
        assert_eq!(hit, Some(ProbeHit::Disp));

        let miss = detector
            .probe("/dev/ttyACM0", 9600, Some("0x2E07"), PROBE_WINDOW)
            .await;
        assert_eq!(miss, None);
    }
}
