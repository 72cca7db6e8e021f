//! Sensor Rediscovery
//!
//! A low-rate loop for sensors that never appeared at startup. One missing
//! sensor is probed per iteration, round-robin; the interval starts short
//! and doubles up to a cap while nothing is found, resetting whenever a
//! sensor turns up.

use crate::supervisor::ReconnectFuture;
use bench_core::SensorId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const REDISCOVERY_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
pub const REDISCOVERY_MAX_INTERVAL: Duration = Duration::from_secs(10);

/// Callback that probes for one missing sensor and, on success, performs the
/// full attach (monitor, reconnection callback, reader task).
pub type DiscoverCallback = Arc<dyn Fn(SensorId) -> ReconnectFuture + Send + Sync>;

/// Round-robin prober for never-seen sensors. The loop exits once every
/// sensor has been found.
pub struct RediscoveryLoop {
    missing: Vec<SensorId>,
    cursor: usize,
    interval: Duration,
    discover: DiscoverCallback,
}

impl RediscoveryLoop {
    pub fn new(missing: Vec<SensorId>, discover: DiscoverCallback) -> Self {
        Self {
            missing,
            cursor: 0,
            interval: REDISCOVERY_INITIAL_INTERVAL,
            discover,
        }
    }

    /// Sensors still unseen.
    pub fn missing(&self) -> &[SensorId] {
        &self.missing
    }

    /// Current idle interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Probe the next missing sensor. Returns the sensor if it was found.
    pub async fn step(&mut self) -> Option<SensorId> {
        if self.missing.is_empty() {
            return None;
        }

        self.cursor %= self.missing.len();
        let sensor = self.missing[self.cursor];
        debug!("rediscovery probing for {}", sensor);

        if (self.discover)(sensor).await {
            self.missing.remove(self.cursor);
            self.interval = REDISCOVERY_INITIAL_INTERVAL;
            info!("{} appeared, {} sensor(s) still missing", sensor, self.missing.len());
            Some(sensor)
        } else {
            self.cursor = (self.cursor + 1) % self.missing.len();
            self.interval = (self.interval * 2).min(REDISCOVERY_MAX_INTERVAL);
            None
        }
    }

    /// Run until every missing sensor has been found or the task is
    /// cancelled.
    pub async fn run(mut self) {
        if self.missing.is_empty() {
            return;
        }
        info!(
            "rediscovery watching for {} missing sensor(s)",
            self.missing.len()
        );
        while !self.missing.is_empty() {
            tokio::time::sleep(self.interval).await;
            self.step().await;
        }
        info!("all sensors discovered, rediscovery loop exiting");
    }
}
