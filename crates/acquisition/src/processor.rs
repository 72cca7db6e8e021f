//! Fixed-Rate Data Processor
//!
//! Every 250 ms, fuses the latest calibrated value of each sensor into one
//! frame, blanks disconnected channels with NaN, derives the calculated
//! channel and publishes the result. Sample-and-hold: no interpolation, and
//! a late tick is not caught up.

use crate::source::SensorSource;
use bench_core::{epoch_secs, ProcessedFrame, SensorId, SensorSample};
use event_bus::{Event, EventBus, Topic};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Frames per second.
pub const PROCESSING_RATE_HZ: f64 = 4.0;

/// Tick period derived from [`PROCESSING_RATE_HZ`].
pub const PROCESSING_INTERVAL: Duration = Duration::from_millis(250);

/// Consecutive NaN inputs after which a sensor's cached value is poisoned.
pub const CONSECUTIVE_NAN_LIMIT: u32 = 3;

/// The calculated deflection channel:
/// `DISP_1 - (DISP_2 + DISP_3) / 2`. NaN in any input yields NaN.
pub fn compute_arc(values: &[f64; SensorId::COUNT]) -> f64 {
    values[SensorId::Disp1.index()]
        - (values[SensorId::Disp2.index()] + values[SensorId::Disp3.index()]) / 2.0
}

/// Builds and publishes processed frames at the fixed rate.
pub struct DataProcessor {
    source: Arc<dyn SensorSource>,
    bus: EventBus,
    latest: [f64; SensorId::COUNT],
    nan_streak: [u32; SensorId::COUNT],
}

impl DataProcessor {
    pub fn new(source: Arc<dyn SensorSource>, bus: EventBus) -> Self {
        Self {
            source,
            bus,
            latest: [0.0; SensorId::COUNT],
            nan_streak: [0; SensorId::COUNT],
        }
    }

    /// Run the processor on the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut updates = self.bus.subscribe(Topic::SensorUpdate);
        let mut ticker = tokio::time::interval(PROCESSING_INTERVAL);
        // No catch-up: an overrunning tick just delays the next one.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("data processor started at {} Hz", PROCESSING_RATE_HZ);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let frame = self.build_frame(epoch_secs());
                    self.bus.publish(Event::ProcessedData(frame));
                }
                event = updates.recv() => match event {
                    Ok(Event::SensorUpdate(sample)) => self.on_update(sample),
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("data processor dropped {} sensor updates", n);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        info!("data processor stopped");
    }

    /// Track a calibrated sample. Finite values replace the cache and clear
    /// the NaN streak; the third consecutive NaN poisons the cache.
    fn on_update(&mut self, sample: SensorSample) {
        let index = sample.sensor.index();
        if sample.value.is_nan() {
            self.nan_streak[index] += 1;
            if self.nan_streak[index] >= CONSECUTIVE_NAN_LIMIT {
                warn!(
                    "{} sent {} consecutive NaN values",
                    sample.sensor, self.nan_streak[index]
                );
                self.latest[index] = f64::NAN;
            }
        } else {
            self.nan_streak[index] = 0;
            self.latest[index] = sample.value;
        }
    }

    /// Snapshot the cache, blank disconnected physical sensors, derive the
    /// calculated channel.
    fn build_frame(&self, timestamp: f64) -> ProcessedFrame {
        let mut values = self.latest;
        for sensor in SensorId::PHYSICAL {
            if !self.source.is_connected(sensor) {
                values[sensor.index()] = f64::NAN;
            }
        }
        values[SensorId::Arc.index()] = compute_arc(&values);
        ProcessedFrame { timestamp, values }
    }
}
