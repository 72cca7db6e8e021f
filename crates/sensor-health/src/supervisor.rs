//! Reconnection Supervisor
//!
//! A 1 Hz loop over the health registry. Silent links are marked
//! disconnected; disconnected and failed links get a reconnection attempt,
//! at most one in flight per sensor, spaced by the monitor's backoff delay.

use crate::monitor::{HealthRegistry, LinkState};
use bench_core::SensorId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Cadence of the supervisor loop.
pub const SUPERVISOR_TICK: Duration = Duration::from_secs(1);

/// A reconnection attempt: resolves to true when the sensor is back.
pub type ReconnectFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Callback invoked to re-detect and re-attach one sensor.
pub type ReconnectCallback = Arc<dyn Fn(SensorId) -> ReconnectFuture + Send + Sync>;

/// Shared callback table. Rediscovery registers callbacks for sensors that
/// appear after the supervisor has started, hence the interior mutability.
#[derive(Clone, Default)]
pub struct ReconnectCallbacks {
    inner: Arc<Mutex<HashMap<SensorId, ReconnectCallback>>>,
}

impl ReconnectCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sensor: SensorId, callback: ReconnectCallback) {
        self.inner
            .lock()
            .expect("callback table lock poisoned")
            .insert(sensor, callback);
    }

    fn get(&self, sensor: SensorId) -> Option<ReconnectCallback> {
        self.inner
            .lock()
            .expect("callback table lock poisoned")
            .get(&sensor)
            .cloned()
    }
}

/// Drives the per-sensor reconnection state machines.
pub struct ReconnectionSupervisor {
    registry: HealthRegistry,
    callbacks: ReconnectCallbacks,
    attempts: HashMap<SensorId, JoinHandle<bool>>,
}

impl ReconnectionSupervisor {
    pub fn new(registry: HealthRegistry, callbacks: ReconnectCallbacks) -> Self {
        Self {
            registry,
            callbacks,
            attempts: HashMap::new(),
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        info!("reconnection supervisor started");
        let mut ticker = tokio::time::interval(SUPERVISOR_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One supervision cycle over every monitored sensor.
    pub async fn tick(&mut self) {
        for sensor in self.registry.sensors() {
            let Some(state) = self.registry.state(sensor) else {
                continue;
            };
            match state {
                LinkState::Connected => {
                    if self.registry.is_silent(sensor) {
                        self.registry.mark_disconnected(sensor);
                    }
                }
                LinkState::Disconnected | LinkState::Failed => self.start_attempt(sensor),
                LinkState::Reconnecting => self.harvest_attempt(sensor).await,
            }
        }
    }

    fn start_attempt(&mut self, sensor: SensorId) {
        if self.attempts.contains_key(&sensor) {
            return;
        }
        let Some(callback) = self.callbacks.get(sensor) else {
            debug!("no reconnection callback registered for {}", sensor);
            return;
        };
        let Some(delay) = self.registry.begin_reconnect(sensor) else {
            return;
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback(sensor).await
        });
        self.attempts.insert(sensor, handle);
    }

    async fn harvest_attempt(&mut self, sensor: SensorId) {
        let finished = self
            .attempts
            .get(&sensor)
            .map(|handle| handle.is_finished())
            .unwrap_or(true);
        if !finished {
            return;
        }

        let Some(handle) = self.attempts.remove(&sensor) else {
            // Reconnecting with no attempt task: recover via the retry path.
            self.registry.mark_failed(sensor);
            return;
        };
        match handle.await {
            Ok(true) => {
                self.registry.record_data(sensor);
                info!("{} successfully reconnected", sensor);
            }
            Ok(false) => self.registry.mark_failed(sensor),
            Err(e) => {
                error!("reconnection attempt for {} panicked: {}", sensor, e);
                self.registry.mark_failed(sensor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Short backoff, long silence window: reconnection behavior only.
    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            max_silence: Duration::from_secs(60),
            initial_reconnect_delay: Duration::from_millis(1),
            max_reconnect_delay: Duration::from_millis(8),
            backoff_multiplier: 2.0,
        }
    }

    fn counting_callback(
        counter: Arc<AtomicUsize>,
        succeed_after: usize,
    ) -> ReconnectCallback {
        Arc::new(move |_sensor| {
            let counter = counter.clone();
            Box::pin(async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                n > succeed_after
            })
        })
    }

    async fn drive(supervisor: &mut ReconnectionSupervisor, cycles: usize) {
        for _ in 0..cycles {
            supervisor.tick().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_silent_link_goes_disconnected() {
        let registry = HealthRegistry::new();
        let mut config = fast_config();
        config.max_silence = Duration::ZERO;
        registry.add_sensor(SensorId::Force, config, true);
        std::thread::sleep(Duration::from_millis(2));

        let mut supervisor =
            ReconnectionSupervisor::new(registry.clone(), ReconnectCallbacks::new());
        supervisor.tick().await;
        // No callback registered: the link stays disconnected.
        assert_eq!(registry.state(SensorId::Force), Some(LinkState::Disconnected));
    }

    #[tokio::test]
    async fn test_failed_attempts_then_success() {
        let registry = HealthRegistry::new();
        registry.add_sensor(SensorId::Disp1, fast_config(), false);

        let calls = Arc::new(AtomicUsize::new(0));
        let callbacks = ReconnectCallbacks::new();
        callbacks.register(SensorId::Disp1, counting_callback(calls.clone(), 2));

        let mut supervisor = ReconnectionSupervisor::new(registry.clone(), callbacks);
        drive(&mut supervisor, 20).await;

        assert_eq!(registry.state(SensorId::Disp1), Some(LinkState::Connected));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Success resets the backoff for the next outage.
        assert_eq!(
            registry.begin_reconnect(SensorId::Disp1),
            Some(Duration::from_millis(1))
        );
    }

    #[tokio::test]
    async fn test_one_attempt_in_flight_per_sensor() {
        let registry = HealthRegistry::new();
        registry.add_sensor(SensorId::Disp2, fast_config(), false);

        let calls = Arc::new(AtomicUsize::new(0));
        let gate_calls = calls.clone();
        let callbacks = ReconnectCallbacks::new();
        callbacks.register(
            SensorId::Disp2,
            Arc::new(move |_| {
                let calls = gate_calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    // Outlive several supervisor ticks.
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    false
                })
            }),
        );

        let mut supervisor = ReconnectionSupervisor::new(registry.clone(), callbacks);
        for _ in 0..5 {
            supervisor.tick().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
