//! Serial Reader Task
//!
//! One cooperative task per detected sensor. Owns the serial handle, reads
//! line by line with a short timeout, publishes raw lines on the bus and
//! feeds the health registry. On any I/O error the handle is dropped and
//! reopening is retried until the task is stopped.

use bench_core::SensorId;
use event_bus::{Event, EventBus};
use sensor_health::HealthRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Upper bound on one blocking read; also how often the running flag is
/// re-checked on a quiet link.
pub const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Pause between reopen attempts after an open or read failure.
pub const REOPEN_DELAY: Duration = Duration::from_millis(500);

/// Control handle for a spawned reader.
#[derive(Debug)]
pub struct ReaderHandle {
    sensor: SensorId,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ReaderHandle {
    pub fn sensor(&self) -> SensorId {
        self.sensor
    }

    /// Cooperative stop; the task closes its serial handle at the next I/O
    /// boundary.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Reconnecting line reader for one sensor.
pub struct SerialReaderTask {
    sensor: SensorId,
    path: String,
    baud: u32,
    bus: EventBus,
    health: HealthRegistry,
    running: Arc<AtomicBool>,
}

impl SerialReaderTask {
    /// Spawn the reader on the runtime.
    pub fn spawn(
        sensor: SensorId,
        path: impl Into<String>,
        baud: u32,
        bus: EventBus,
        health: HealthRegistry,
    ) -> ReaderHandle {
        let running = Arc::new(AtomicBool::new(true));
        let task = Self {
            sensor,
            path: path.into(),
            baud,
            bus,
            health,
            running: running.clone(),
        };
        let join = tokio::spawn(task.run());
        ReaderHandle {
            sensor,
            running,
            task: join,
        }
    }

    async fn run(self) {
        // Link transitions are logged exactly once each way.
        let mut link_up = false;

        while self.running.load(Ordering::SeqCst) {
            let stream = match tokio_serial::new(&self.path, self.baud).open_native_async() {
                Ok(stream) => stream,
                Err(e) => {
                    if link_up {
                        warn!("{}: failed to reopen {}: {}", self.sensor, self.path, e);
                        link_up = false;
                    }
                    self.health.mark_disconnected(self.sensor);
                    tokio::time::sleep(REOPEN_DELAY).await;
                    continue;
                }
            };

            info!(
                "{}: serial link open on {} @ {} baud",
                self.sensor, self.path, self.baud
            );
            link_up = true;

            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            while self.running.load(Ordering::SeqCst) {
                buf.clear();
                match timeout(READ_TIMEOUT, reader.read_until(b'\n', &mut buf)).await {
                    // Quiet interval; loop around and re-check the flag.
                    Err(_) => continue,
                    Ok(Ok(0)) => {
                        warn!("{}: link on {} closed by device", self.sensor, self.path);
                        break;
                    }
                    Ok(Ok(_)) => match std::str::from_utf8(&buf) {
                        Ok(text) => {
                            let line = text.trim();
                            if !line.is_empty() {
                                self.health.record_data(self.sensor);
                                self.bus.publish(Event::SerialData {
                                    sensor: self.sensor,
                                    line: line.to_string(),
                                });
                            }
                        }
                        Err(_) => {
                            debug!("{}: dropping undecodable line", self.sensor);
                        }
                    },
                    Ok(Err(e)) => {
                        warn!("{}: read error on {}: {}", self.sensor, self.path, e);
                        break;
                    }
                }
            }
            // The stream drops here, releasing the device.

            if self.running.load(Ordering::SeqCst) {
                link_up = false;
                self.health.mark_disconnected(self.sensor);
                tokio::time::sleep(REOPEN_DELAY).await;
            }
        }

        debug!("{}: reader task exiting", self.sensor);
    }
}
