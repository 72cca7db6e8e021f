//! Test Manager
//!
//! Owns the lifecycle state machine, the open file handles of the running
//! test, and the ring-buffer store behind windowed sensor queries. All
//! writes happen on the runtime via the event pump, so file I/O needs no
//! locking beyond the manager handle itself.

use crate::artifacts::{
    csv_sensor_order, default_description, format_sensor_value, format_time, sanitize_test_id,
    scan_history, ARCHIVE_DIR, TEST_DATA_DIR,
};
use crate::error::TestError;
use acquisition::PROCESSING_RATE_HZ;
use bench_core::{epoch_secs, ProcessedFrame, SensorCommand, SensorId, SensorSample, TestMetaData, TestState};
use event_bus::{Event, EventBus, Topic};
use ring_buffer::{SamplePoint, SensorDataStorage};
use std::fs::{self, File};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Configured storage rate. The effective rate is the minimum of this and
/// the processor cadence, enforced by the per-sensor append gate.
pub const STORAGE_SAMPLING_FREQ_HZ: f64 = 5.0;

/// Tolerance when comparing a frame's time against the append gate.
const APPEND_EPSILON: f64 = 1e-6;

/// Lifecycle, artifacts and sensor history for the one test at a time.
pub struct TestManager {
    test_data_dir: PathBuf,
    archive_dir: PathBuf,
    bus: EventBus,
    emulation: bool,

    current: Option<TestMetaData>,
    current_dir: Option<PathBuf>,
    is_running: bool,
    is_stopped: bool,
    start_time: f64,
    /// Monotonic clock for a live display time outside any test, emulation
    /// mode only.
    emulation_start: Option<Instant>,

    raw_log: Option<LineWriter<File>>,
    data_csv: Option<csv::Writer<File>>,
    data_header_written: bool,
    raw_csv: Option<csv::Writer<File>>,
    raw_header_written: bool,

    storage: SensorDataStorage,
    history: Vec<TestMetaData>,
}

impl TestManager {
    /// Create the manager, its on-disk roots, and scan existing history.
    pub fn new(
        storage_root: impl AsRef<Path>,
        emulation: bool,
        bus: EventBus,
    ) -> Result<Self, TestError> {
        let root = storage_root.as_ref();
        let test_data_dir = root.join(TEST_DATA_DIR);
        let archive_dir = root.join(ARCHIVE_DIR);
        fs::create_dir_all(&test_data_dir)?;
        fs::create_dir_all(&archive_dir)?;

        // Point spacing follows the slower of the configured storage rate
        // and the processor publish rate, so window spans stay truthful.
        let effective_freq = STORAGE_SAMPLING_FREQ_HZ.min(PROCESSING_RATE_HZ);

        let mut manager = Self {
            test_data_dir,
            archive_dir,
            bus,
            emulation,
            current: None,
            current_dir: None,
            is_running: false,
            is_stopped: false,
            start_time: 0.0,
            emulation_start: None,
            raw_log: None,
            data_csv: None,
            data_header_written: false,
            raw_csv: None,
            raw_header_written: false,
            storage: SensorDataStorage::new(SensorId::COUNT, effective_freq),
            history: Vec::new(),
        };
        manager.reload_history();
        Ok(manager)
    }

    /// Current lifecycle state, derived from the running/stopped flags and
    /// the presence of prepared metadata.
    pub fn state(&self) -> TestState {
        if self.is_running {
            TestState::Running
        } else if self.is_stopped {
            TestState::Stopped
        } else if self.current.is_some() {
            TestState::Prepared
        } else {
            TestState::Nothing
        }
    }

    /// Register metadata and create the test directory with `metadata.json`
    /// and a default `description.md`. Returns the metadata with its
    /// assigned id.
    pub fn prepare(&mut self, mut meta: TestMetaData) -> Result<TestMetaData, TestError> {
        let state = self.state();
        if state != TestState::Nothing {
            return Err(TestError::Conflict {
                operation: "prepare",
                state,
            });
        }

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        meta.test_id = format!("{stamp}_{}", sanitize_test_id(&meta.test_id));

        let dir = self.test_data_dir.join(&meta.test_id);
        fs::create_dir_all(&dir)?;
        fs::write(
            dir.join("metadata.json"),
            serde_json::to_string_pretty(&meta)?,
        )?;
        fs::write(dir.join("description.md"), default_description(&meta))?;

        info!("test prepared: {}", meta.test_id);
        self.current_dir = Some(dir);
        self.current = Some(meta.clone());
        self.bus.publish(Event::TestPrepared(meta.clone()));
        Ok(meta)
    }

    /// Open the recording files, reset the ring buffers and start the test
    /// clock.
    pub fn start(&mut self) -> Result<(), TestError> {
        let state = self.state();
        if state == TestState::Running || state == TestState::Stopped {
            return Err(TestError::Conflict {
                operation: "start",
                state,
            });
        }
        let Some(meta) = self.current.clone() else {
            return Err(TestError::InvalidArgument(
                "no test metadata prepared".to_string(),
            ));
        };
        let dir = self.current_dir.clone().ok_or_else(|| {
            TestError::InvalidArgument("test directory not initialized".to_string())
        })?;

        self.raw_log = Some(LineWriter::new(File::create(dir.join("raw.log"))?));
        self.data_csv = Some(csv::Writer::from_path(dir.join("data.csv"))?);
        self.data_header_written = false;
        self.raw_csv = Some(csv::Writer::from_path(dir.join("raw_data.csv"))?);
        self.raw_header_written = false;

        self.storage.clear_all();
        self.start_time = epoch_secs();
        self.emulation_start = None;
        self.is_running = true;

        info!("test started: {}", meta.test_id);
        self.bus.publish(Event::TestStarted(meta));
        self.bus.publish(Event::TestStateChanged(true));
        Ok(())
    }

    /// End recording: flush and close every file, keep ring-buffer content
    /// for review. Idempotent once stopped; close failures are logged but
    /// never block the transition.
    pub fn stop(&mut self) {
        if !self.is_running {
            return;
        }
        let Some(meta) = self.current.clone() else {
            return;
        };

        // Files close before the state change is published, so nobody
        // reacting to the event can race a still-open writer.
        if let Some(mut writer) = self.raw_log.take() {
            if let Err(e) = writer.flush() {
                warn!("closing raw.log: {}", e);
            }
        }
        if let Some(mut writer) = self.data_csv.take() {
            if let Err(e) = writer.flush() {
                warn!("closing data.csv: {}", e);
            }
        }
        if let Some(mut writer) = self.raw_csv.take() {
            if let Err(e) = writer.flush() {
                warn!("closing raw_data.csv: {}", e);
            }
        }

        self.is_running = false;
        self.is_stopped = true;

        info!("test stopped: {}", meta.test_id);
        self.bus.publish(Event::TestStopped(meta));
        self.bus.publish(Event::TestStateChanged(false));
    }

    /// Release the stopped test from memory and rescan history, which now
    /// surfaces it.
    pub fn finalize(&mut self) -> Result<(), TestError> {
        let state = self.state();
        if state != TestState::Stopped {
            return Err(TestError::Conflict {
                operation: "finalize",
                state,
            });
        }
        let meta = self
            .current
            .take()
            .expect("stopped state implies current metadata");

        self.storage.clear_all();
        self.current_dir = None;
        self.is_stopped = false;
        self.emulation_start = None;

        info!("test finalized: {}", meta.test_id);
        self.reload_history();
        self.bus.publish(Event::TestFinalized(meta));
        Ok(())
    }

    fn guard_persisted_id(&self, test_id: &str) -> Result<(), TestError> {
        if test_id.contains('/') || test_id.contains('\\') || test_id.contains("..") {
            return Err(TestError::InvalidArgument(format!(
                "malformed test id: {test_id}"
            )));
        }
        if self.current.as_ref().map(|m| m.test_id.as_str()) == Some(test_id) {
            return Err(TestError::Conflict {
                operation: "modify an in-flight test",
                state: self.state(),
            });
        }
        Ok(())
    }

    /// Move a persisted test into the archive root.
    pub fn archive(&mut self, test_id: &str) -> Result<(), TestError> {
        self.guard_persisted_id(test_id)?;
        let src = self.test_data_dir.join(test_id);
        if !src.is_dir() {
            return Err(TestError::NotFound(test_id.to_string()));
        }
        fs::rename(src, self.archive_dir.join(test_id))?;
        info!("archived test {}", test_id);
        self.reload_history();
        Ok(())
    }

    /// Irreversibly delete a persisted test.
    pub fn delete(&mut self, test_id: &str) -> Result<(), TestError> {
        self.guard_persisted_id(test_id)?;
        let target = self.test_data_dir.join(test_id);
        if !target.is_dir() {
            return Err(TestError::NotFound(test_id.to_string()));
        }
        fs::remove_dir_all(target)?;
        info!("deleted test {}", test_id);
        self.reload_history();
        Ok(())
    }

    fn reload_history(&mut self) {
        let exclude = self.current.as_ref().map(|m| m.test_id.as_str());
        self.history = scan_history(&self.test_data_dir, exclude);
        self.bus.publish(Event::HistoryUpdated);
    }

    /// Persisted tests, rescanned from disk, newest first. The in-flight
    /// test is excluded even though its directory already exists.
    pub fn get_history(&mut self) -> Vec<TestMetaData> {
        self.reload_history();
        self.history.clone()
    }

    /// Windowed samples for one sensor. Only meaningful while data is being
    /// or has just been recorded.
    pub fn get_sensor_history(
        &self,
        sensor: SensorId,
        window_seconds: u32,
    ) -> Result<Vec<SamplePoint>, TestError> {
        if !(self.is_running || self.is_stopped) {
            return Err(TestError::Conflict {
                operation: "query sensor history",
                state: self.state(),
            });
        }
        Ok(self.storage.query(sensor.index(), window_seconds)?)
    }

    /// Ask the sensor manager to re-zero a sensor.
    pub fn zero(&self, sensor: SensorId) {
        self.bus.publish(Event::SensorCommand(SensorCommand::Zero {
            sensor_id: sensor,
        }));
    }

    fn description_path(&self, test_id: &str) -> Option<PathBuf> {
        [&self.test_data_dir, &self.archive_dir]
            .into_iter()
            .map(|root| root.join(test_id).join("description.md"))
            .find(|path| path.exists())
    }

    /// Read `description.md`, looking first under the live root, then the
    /// archive.
    pub fn get_description(&self, test_id: &str) -> Result<String, TestError> {
        let path = self
            .description_path(test_id)
            .ok_or_else(|| TestError::NotFound(test_id.to_string()))?;
        Ok(fs::read_to_string(path)?)
    }

    /// Overwrite `description.md` for a live or archived test.
    pub fn set_description(&self, test_id: &str, content: &str) -> Result<(), TestError> {
        let path = self
            .description_path(test_id)
            .ok_or_else(|| TestError::NotFound(test_id.to_string()))?;
        fs::write(path, content)?;
        info!("updated description for {}", test_id);
        Ok(())
    }

    /// Seconds since test start while recording. Outside a test, emulation
    /// mode exposes a free-running clock so displays do not freeze at zero.
    pub fn relative_time(&mut self) -> f64 {
        if self.is_running && self.start_time > 0.0 {
            return epoch_secs() - self.start_time;
        }
        if self.emulation {
            let started = self.emulation_start.get_or_insert_with(Instant::now);
            return started.elapsed().as_secs_f64();
        }
        0.0
    }

    /// Raw serial line while recording: append to `raw.log`, ISO-stamped.
    pub fn on_serial_line(&mut self, line: &str) {
        if !self.is_running {
            return;
        }
        let Some(writer) = self.raw_log.as_mut() else {
            return;
        };
        let stamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f");
        if let Err(e) = writeln!(writer, "[{stamp}] {line}") {
            warn!("raw.log write failed: {}", e);
        }
    }

    /// Pre-offset sample while recording: one `raw_data.csv` row.
    pub fn on_raw_update(&mut self, sample: &SensorSample) {
        if !self.is_running {
            return;
        }
        let start_time = self.start_time;
        let header_written = self.raw_header_written;
        let Some(writer) = self.raw_csv.as_mut() else {
            return;
        };

        let result = (|| -> csv::Result<()> {
            if !header_written {
                writer.write_record(["timestamp", "relative_time", "sensor_id", "raw_value"])?;
            }
            writer.write_record([
                format_time(sample.timestamp),
                format_time(sample.timestamp - start_time),
                sample.sensor.name().to_string(),
                format_sensor_value(sample.sensor, sample.value),
            ])?;
            writer.flush()?;
            Ok(())
        })();
        match result {
            Ok(()) => self.raw_header_written = true,
            Err(e) => warn!("raw_data.csv write failed: {}", e),
        }
    }

    /// Processed frame while recording: one `data.csv` row plus rate-gated
    /// ring-buffer appends.
    pub fn on_processed_frame(&mut self, frame: &ProcessedFrame) {
        if !self.is_running {
            return;
        }
        let rel_time = frame.timestamp - self.start_time;

        let header_written = self.data_header_written;
        if let Some(writer) = self.data_csv.as_mut() {
            let result = (|| -> csv::Result<()> {
                if !header_written {
                    let mut header = vec!["timestamp".to_string(), "relative_time".to_string()];
                    header.extend(csv_sensor_order().iter().map(|id| id.name().to_string()));
                    writer.write_record(header)?;
                }
                let mut row = vec![format_time(frame.timestamp), format_time(rel_time)];
                row.extend(
                    csv_sensor_order()
                        .iter()
                        .map(|id| format_sensor_value(*id, frame.value(*id))),
                );
                writer.write_record(row)?;
                writer.flush()?;
                Ok(())
            })();
            match result {
                Ok(()) => self.data_header_written = true,
                Err(e) => warn!("data.csv write failed: {}", e),
            }
        }

        // Ring-buffer routing, rate-limited per sensor to the storage
        // frequency: a point lands only once the previous one is a full
        // sample period old.
        let spacing = 1.0 / self.storage.sampling_frequency();
        for sensor in SensorId::ALL {
            let index = sensor.index();
            let due = match self.storage.last_time(index) {
                Ok(None) => true,
                Ok(Some(last)) => rel_time + APPEND_EPSILON >= last + spacing,
                Err(_) => false,
            };
            if due {
                let _ = self.storage.append(index, rel_time, frame.value(sensor));
            }
        }
    }
}

/// Forward bus traffic into the manager on the runtime thread. File writes
/// and ring-buffer appends all funnel through here.
pub fn spawn_event_pump(manager: Arc<Mutex<TestManager>>, bus: EventBus) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut serial_rx = bus.subscribe(Topic::SerialData);
        let mut raw_rx = bus.subscribe(Topic::SensorRawUpdate);
        let mut frame_rx = bus.subscribe(Topic::ProcessedData);

        loop {
            tokio::select! {
                event = serial_rx.recv() => match event {
                    Ok(Event::SerialData { line, .. }) => {
                        manager
                            .lock()
                            .expect("test manager lock poisoned")
                            .on_serial_line(&line);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!("test manager dropped {} serial events", n),
                    Err(RecvError::Closed) => break,
                },
                event = raw_rx.recv() => match event {
                    Ok(Event::SensorRawUpdate(sample)) => {
                        manager
                            .lock()
                            .expect("test manager lock poisoned")
                            .on_raw_update(&sample);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!("test manager dropped {} raw samples", n),
                    Err(RecvError::Closed) => break,
                },
                event = frame_rx.recv() => match event {
                    Ok(Event::ProcessedData(frame)) => {
                        manager
                            .lock()
                            .expect("test manager lock poisoned")
                            .on_processed_frame(&frame);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!("test manager dropped {} frames", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}
