//! Workbench Acquisition Daemon - Main Entry Point

use bench_core::load_config;
use bench_daemon::{init_logging, ServiceManager};
use std::path::Path;
use tracing::info;

const CONFIG_PATH: &str = "config/sensors_config.json";
const STORAGE_ROOT: &str = "storage/data";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    info!("=== bench-daq v{} ===", env!("CARGO_PKG_VERSION"));

    let config = load_config(Path::new(CONFIG_PATH));
    let mut services = ServiceManager::start(STORAGE_ROOT, config).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    services.stop().await;

    Ok(())
}
