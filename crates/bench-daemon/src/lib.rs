//! Workbench Acquisition Daemon
//!
//! Composes the pipeline — event bus, test manager, sensor manager, data
//! processor and, in hardware mode, port detection with health supervision —
//! into a single start/stop service surface.

mod service;

pub use service::ServiceManager;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize logging for the daemon process.
pub fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set tracing subscriber");
}
