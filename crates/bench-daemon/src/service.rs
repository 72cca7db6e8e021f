//! Service Composition
//!
//! Wires the acquisition pipeline together and owns every background task.
//! In hardware mode this includes initial port detection, one reader task
//! per detected sensor, the reconnection supervisor, and a rediscovery loop
//! for sensors that never appeared.

use acquisition::{
    DataProcessor, EmulationSource, HardwareSource, SensorCache, SensorManager, SensorSource,
    SerialReaderTask,
};
use bench_core::{ConfigData, SensorId};
use event_bus::EventBus;
use sensor_health::{
    DiscoverCallback, HealthRegistry, MonitorConfig, ReconnectCallback, ReconnectCallbacks,
    ReconnectionSupervisor, RediscoveryLoop,
};
use sensor_wire::{PortDetector, SerialScanner};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use test_session::{spawn_event_pump, TestManager};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

type SharedDetector = Arc<AsyncMutex<PortDetector<SerialScanner>>>;

/// Owns the running pipeline.
pub struct ServiceManager {
    bus: EventBus,
    config: ConfigData,
    source: Arc<dyn SensorSource>,
    cache: Arc<SensorCache>,
    test_manager: Arc<Mutex<TestManager>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceManager {
    /// Start every service. The mode comes from the configuration's
    /// `emulation` flag.
    pub async fn start(
        storage_root: impl AsRef<Path>,
        config: ConfigData,
    ) -> anyhow::Result<Self> {
        info!(
            "starting services ({} mode)",
            if config.emulation {
                "emulation"
            } else {
                "hardware"
            }
        );

        let bus = EventBus::new();
        let test_manager = Arc::new(Mutex::new(TestManager::new(
            storage_root,
            config.emulation,
            bus.clone(),
        )?));
        let mut tasks = vec![spawn_event_pump(test_manager.clone(), bus.clone())];

        let source: Arc<dyn SensorSource> = if config.emulation {
            Arc::new(EmulationSource::new(config.clone()))
        } else {
            Self::start_hardware(&config, &bus, &mut tasks).await
        };

        let manager = SensorManager::new(config.clone(), source.clone(), bus.clone());
        let cache = manager.cache();
        let (sink, samples) = mpsc::unbounded_channel();
        tasks.push(manager.spawn(samples));
        tasks.push(DataProcessor::new(source.clone(), bus.clone()).spawn());
        source.start(sink);

        info!("services started");
        Ok(Self {
            bus,
            config,
            source,
            cache,
            test_manager,
            tasks,
        })
    }

    /// Detect sensors, spawn their readers, and hand the supervision loops
    /// to the runtime.
    async fn start_hardware(
        config: &ConfigData,
        bus: &EventBus,
        tasks: &mut Vec<JoinHandle<()>>,
    ) -> Arc<dyn SensorSource> {
        let health = HealthRegistry::new();
        let hardware = Arc::new(HardwareSource::new(config.clone(), health.clone()));
        let detector: SharedDetector = Arc::new(AsyncMutex::new(PortDetector::new(SerialScanner)));

        let requested: HashMap<SensorId, u32> = config
            .enabled_physical()
            .into_iter()
            .filter_map(|sensor| config.sensor(sensor).map(|s| (sensor, s.baud)))
            .collect();

        let detected = detector.lock().await.auto_detect(&requested, config).await;
        if detected.is_empty() {
            warn!("no sensors detected; check connections and baud rates");
        }

        let callbacks = ReconnectCallbacks::new();
        let reconnect = make_reconnect_callback(
            detector.clone(),
            config.clone(),
            bus.clone(),
            health.clone(),
            hardware.clone(),
            requested.clone(),
        );

        for (sensor, binding) in &detected {
            health.add_sensor(*sensor, MonitorConfig::default(), true);
            callbacks.register(*sensor, reconnect.clone());
            hardware.attach_reader(SerialReaderTask::spawn(
                *sensor,
                binding.path.clone(),
                binding.baud,
                bus.clone(),
                health.clone(),
            ));
        }

        tasks.push(tokio::spawn(
            ReconnectionSupervisor::new(health.clone(), callbacks.clone()).run(),
        ));

        let mut missing: Vec<SensorId> = requested
            .keys()
            .filter(|sensor| !detected.contains_key(sensor))
            .copied()
            .collect();
        missing.sort();
        if !missing.is_empty() {
            info!("sensors not present at startup: {:?}", missing);
            let discover = make_discover_callback(
                detector,
                config.clone(),
                bus.clone(),
                health,
                hardware.clone(),
                callbacks,
                reconnect,
                requested,
            );
            tasks.push(tokio::spawn(RediscoveryLoop::new(missing, discover).run()));
        }

        hardware
    }

    /// Stop every service: supervision loops, readers, processor, manager,
    /// and any test still recording.
    pub async fn stop(&mut self) {
        info!("stopping services");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.source.stop();
        self.test_manager
            .lock()
            .expect("test manager lock poisoned")
            .stop();
        info!("services stopped");
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &ConfigData {
        &self.config
    }

    /// Latest calibrated values and offsets.
    pub fn cache(&self) -> &Arc<SensorCache> {
        &self.cache
    }

    pub fn test_manager(&self) -> Arc<Mutex<TestManager>> {
        self.test_manager.clone()
    }

    pub fn is_sensor_connected(&self, sensor: SensorId) -> bool {
        self.source.is_connected(sensor)
    }
}

/// Reconnection path: re-detect the one sensor; on success spawn a fresh
/// reader, on failure release its port so the next attempt can re-claim it.
fn make_reconnect_callback(
    detector: SharedDetector,
    config: ConfigData,
    bus: EventBus,
    health: HealthRegistry,
    hardware: Arc<HardwareSource>,
    requested: HashMap<SensorId, u32>,
) -> ReconnectCallback {
    Arc::new(move |sensor| {
        let detector = detector.clone();
        let config = config.clone();
        let bus = bus.clone();
        let health = health.clone();
        let hardware = hardware.clone();
        let requested = requested.clone();
        Box::pin(async move {
            let Some(baud) = requested.get(&sensor).copied() else {
                return false;
            };
            let mut detector = detector.lock().await;
            let found = detector
                .auto_detect(&HashMap::from([(sensor, baud)]), &config)
                .await;
            match found.get(&sensor) {
                Some(binding) => {
                    info!("re-detected {} on {}", sensor, binding.path);
                    hardware.attach_reader(SerialReaderTask::spawn(
                        sensor,
                        binding.path.clone(),
                        binding.baud,
                        bus,
                        health,
                    ));
                    true
                }
                None => {
                    detector.release_port(sensor);
                    false
                }
            }
        })
    })
}

/// Rediscovery path for sensors never seen at startup: on success, register
/// the monitor and reconnection callback, then spawn the reader.
#[allow(clippy::too_many_arguments)]
fn make_discover_callback(
    detector: SharedDetector,
    config: ConfigData,
    bus: EventBus,
    health: HealthRegistry,
    hardware: Arc<HardwareSource>,
    callbacks: ReconnectCallbacks,
    reconnect: ReconnectCallback,
    requested: HashMap<SensorId, u32>,
) -> DiscoverCallback {
    Arc::new(move |sensor| {
        let detector = detector.clone();
        let config = config.clone();
        let bus = bus.clone();
        let health = health.clone();
        let hardware = hardware.clone();
        let callbacks = callbacks.clone();
        let reconnect = reconnect.clone();
        let requested = requested.clone();
        Box::pin(async move {
            let Some(baud) = requested.get(&sensor).copied() else {
                return false;
            };
            let found = detector
                .lock()
                .await
                .auto_detect(&HashMap::from([(sensor, baud)]), &config)
                .await;
            let Some(binding) = found.get(&sensor) else {
                return false;
            };

            info!("{} appeared on {} @ {} baud", sensor, binding.path, binding.baud);
            health.add_sensor(sensor, MonitorConfig::default(), true);
            callbacks.register(sensor, reconnect.clone());
            hardware.attach_reader(SerialReaderTask::spawn(
                sensor,
                binding.path.clone(),
                binding.baud,
                bus,
                health,
            ));
            true
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::TestMetaData;
    use event_bus::{Event, Topic};
    use std::fs;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn temp_root(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path =
            std::env::temp_dir().join(format!("bench-daemon-{tag}-{}-{nanos}", std::process::id()));
        fs::create_dir_all(&path).unwrap();
        path
    }

    fn emulation_config() -> ConfigData {
        let mut config = ConfigData::default();
        config.emulation = true;
        for sensor in config.sensors.values_mut() {
            sensor.enabled = true;
        }
        config
    }

    #[tokio::test]
    async fn test_emulation_pipeline_end_to_end() {
        let root = temp_root("e2e");
        let mut services = ServiceManager::start(&root, emulation_config())
            .await
            .unwrap();

        let mut frames = services.bus().subscribe(Topic::ProcessedData);
        let frame = loop {
            let event = tokio::time::timeout(Duration::from_secs(5), frames.recv())
                .await
                .expect("frame within deadline")
                .expect("bus open");
            if let Event::ProcessedData(frame) = event {
                // Skip frames from before the first emulated samples landed.
                if frame.value(SensorId::Disp1) != 0.0 {
                    break frame;
                }
            }
        };

        // Every channel enabled: the whole frame is finite, and the
        // calculated channel obeys its formula.
        for sensor in SensorId::PHYSICAL {
            assert!(
                frame.value(sensor).is_finite(),
                "{sensor} should be finite"
            );
        }
        let expected = frame.value(SensorId::Disp1)
            - (frame.value(SensorId::Disp2) + frame.value(SensorId::Disp3)) / 2.0;
        assert!((frame.value(SensorId::Arc) - expected).abs() < 1e-12);

        assert!(services.is_sensor_connected(SensorId::Force));
        assert!(services.is_sensor_connected(SensorId::Arc));

        services.stop().await;
        fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn test_recording_through_the_composed_pipeline() {
        let root = temp_root("record");
        let mut services = ServiceManager::start(&root, emulation_config())
            .await
            .unwrap();

        let manager = services.test_manager();
        let prepared = {
            let mut manager = manager.lock().unwrap();
            let prepared = manager
                .prepare(TestMetaData {
                    test_id: "smoke".to_string(),
                    date: "2026-01-14".to_string(),
                    operator_name: "op".to_string(),
                    specimen_code: "S-1".to_string(),
                    dim_length: 0.0,
                    dim_height: 0.0,
                    dim_width: 0.0,
                    loading_mode: String::new(),
                    sensor_spacing: 0.0,
                    ext_sensor_spacing: 0.0,
                    ext_support_spacing: 0.0,
                    load_point_spacing: 0.0,
                })
                .unwrap();
            manager.start().unwrap();
            prepared
        };

        // Let a few frames and raw samples flow.
        let csv_path = root
            .join(test_session::TEST_DATA_DIR)
            .join(&prepared.test_id)
            .join("data.csv");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let rows = fs::read_to_string(&csv_path)
                .map(|t| t.lines().count())
                .unwrap_or(0);
            if rows >= 3 {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "no frames recorded in time"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        {
            let mut manager = manager.lock().unwrap();
            manager.stop();
            manager.finalize().unwrap();
            assert_eq!(manager.get_history().len(), 1);
        }

        services.stop().await;
        fs::remove_dir_all(&root).ok();
    }
}
