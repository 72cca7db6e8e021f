//! Sensor Health
//!
//! Tracks every serial link's liveness: silence detection, a per-sensor
//! state machine with bounded exponential backoff, a supervisor that drives
//! reconnection attempts, and a rediscovery loop for sensors that never
//! appeared at startup.

mod monitor;
mod rediscovery;
mod supervisor;

pub use monitor::{HealthMonitor, HealthRegistry, LinkState, MonitorConfig, SensorStatus};
pub use rediscovery::{
    DiscoverCallback, RediscoveryLoop, REDISCOVERY_INITIAL_INTERVAL, REDISCOVERY_MAX_INTERVAL,
};
pub use supervisor::{
    ReconnectCallback, ReconnectCallbacks, ReconnectFuture, ReconnectionSupervisor,
    SUPERVISOR_TICK,
};
