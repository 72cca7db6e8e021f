//! Per-Sensor Health Monitor

use bench_core::SensorId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Connection state of one serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
    Reconnecting,
    Failed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::Reconnecting => "reconnecting",
            LinkState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tunables for silence detection and backoff.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Seconds without data before a link counts as disconnected.
    pub max_silence: Duration,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_silence: Duration::from_secs(5),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            backoff_multiplier: 1.5,
        }
    }
}

/// Health record for one sensor. State changes are logged exactly once per
/// transition.
#[derive(Debug)]
pub struct HealthMonitor {
    sensor: SensorId,
    config: MonitorConfig,
    state: LinkState,
    last_data: Instant,
    reconnect_attempts: u32,
    current_backoff: Duration,
}

impl HealthMonitor {
    pub fn new(sensor: SensorId, config: MonitorConfig, initially_connected: bool) -> Self {
        let current_backoff = config.initial_reconnect_delay;
        Self {
            sensor,
            config,
            state: if initially_connected {
                LinkState::Connected
            } else {
                LinkState::Disconnected
            },
            last_data: Instant::now(),
            reconnect_attempts: 0,
            current_backoff,
        }
    }

    /// Data arrived: the link is live and backoff resets.
    pub fn record_data(&mut self) {
        self.last_data = Instant::now();
        if self.state != LinkState::Connected {
            info!("{} reconnected", self.sensor);
            self.state = LinkState::Connected;
            self.reconnect_attempts = 0;
            self.current_backoff = self.config.initial_reconnect_delay;
        }
    }

    /// Time since the last data arrival.
    pub fn silence(&self) -> Duration {
        self.last_data.elapsed()
    }

    pub fn is_silent(&self) -> bool {
        self.silence() > self.config.max_silence
    }

    pub fn mark_disconnected(&mut self) {
        if self.state != LinkState::Disconnected {
            warn!(
                "{} disconnected (no data for {:.1}s)",
                self.sensor,
                self.silence().as_secs_f64()
            );
            self.state = LinkState::Disconnected;
            self.reconnect_attempts = 0;
            self.current_backoff = self.config.initial_reconnect_delay;
        }
    }

    pub fn mark_reconnecting(&mut self) {
        self.state = LinkState::Reconnecting;
        self.reconnect_attempts += 1;
        info!(
            "reconnecting {} (attempt {}, waited {:.1}s)",
            self.sensor,
            self.reconnect_attempts,
            self.current_backoff.as_secs_f64()
        );
    }

    pub fn mark_failed(&mut self) {
        self.state = LinkState::Failed;
    }

    /// The delay before the next attempt. Advances the backoff:
    /// `d, min(d·k, D_max), min(d·k², D_max), ...`
    pub fn next_retry_delay(&mut self) -> Duration {
        let delay = self.current_backoff;
        self.current_backoff = self
            .current_backoff
            .mul_f64(self.config.backoff_multiplier)
            .min(self.config.max_reconnect_delay);
        delay
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }
}

/// Point-in-time view of one monitor, for status reporting.
#[derive(Debug, Clone)]
pub struct SensorStatus {
    pub sensor: SensorId,
    pub state: LinkState,
    pub silence: Duration,
    pub reconnect_attempts: u32,
    pub current_backoff: Duration,
}

/// Shared map of monitors. Readers observe; the supervisor and reader tasks
/// mutate through the registry's methods.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<Mutex<HashMap<SensorId, HealthMonitor>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<SensorId, HealthMonitor>) -> R) -> R {
        let mut monitors = self.inner.lock().expect("health registry lock poisoned");
        f(&mut monitors)
    }

    /// Register a monitor for a sensor, replacing any previous one.
    pub fn add_sensor(&self, sensor: SensorId, config: MonitorConfig, initially_connected: bool) {
        info!(
            "monitoring {} (max silence {:.1}s, initially {})",
            sensor,
            config.max_silence.as_secs_f64(),
            if initially_connected {
                "connected"
            } else {
                "disconnected"
            }
        );
        self.with(|monitors| {
            monitors.insert(sensor, HealthMonitor::new(sensor, config, initially_connected));
        });
    }

    pub fn contains(&self, sensor: SensorId) -> bool {
        self.with(|monitors| monitors.contains_key(&sensor))
    }

    /// Sensors with a registered monitor.
    pub fn sensors(&self) -> Vec<SensorId> {
        self.with(|monitors| {
            let mut ids: Vec<SensorId> = monitors.keys().copied().collect();
            ids.sort();
            ids
        })
    }

    pub fn record_data(&self, sensor: SensorId) {
        self.with(|monitors| {
            if let Some(monitor) = monitors.get_mut(&sensor) {
                monitor.record_data();
            }
        });
    }

    pub fn mark_disconnected(&self, sensor: SensorId) {
        self.with(|monitors| {
            if let Some(monitor) = monitors.get_mut(&sensor) {
                monitor.mark_disconnected();
            }
        });
    }

    pub fn mark_failed(&self, sensor: SensorId) {
        self.with(|monitors| {
            if let Some(monitor) = monitors.get_mut(&sensor) {
                monitor.mark_failed();
            }
        });
    }

    /// Consume the current backoff delay and enter `Reconnecting`. Returns
    /// the delay to wait before the attempt, or `None` for an unknown sensor.
    pub fn begin_reconnect(&self, sensor: SensorId) -> Option<Duration> {
        self.with(|monitors| {
            let monitor = monitors.get_mut(&sensor)?;
            let delay = monitor.next_retry_delay();
            monitor.mark_reconnecting();
            Some(delay)
        })
    }

    pub fn state(&self, sensor: SensorId) -> Option<LinkState> {
        self.with(|monitors| monitors.get(&sensor).map(|m| m.state()))
    }

    pub fn is_connected(&self, sensor: SensorId) -> bool {
        self.state(sensor) == Some(LinkState::Connected)
    }

    pub fn is_silent(&self, sensor: SensorId) -> bool {
        self.with(|monitors| monitors.get(&sensor).map(|m| m.is_silent()).unwrap_or(false))
    }

    /// Status of every monitored sensor.
    pub fn snapshot(&self) -> Vec<SensorStatus> {
        self.with(|monitors| {
            let mut statuses: Vec<SensorStatus> = monitors
                .values()
                .map(|m| SensorStatus {
                    sensor: m.sensor,
                    state: m.state(),
                    silence: m.silence(),
                    reconnect_attempts: m.reconnect_attempts(),
                    current_backoff: m.current_backoff(),
                })
                .collect();
            statuses.sort_by_key(|s| s.sensor);
            statuses
        })
    }
}
