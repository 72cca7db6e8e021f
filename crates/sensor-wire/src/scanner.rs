//! Platform Serial Scanner
//!
//! [`PortScanner`] implementation over `tokio-serial`.

use crate::detector::PortScanner;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{timeout, Instant};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, warn};

/// Settle time after opening a port before the first read; some transducers
/// need a moment before they emit coherent frames.
pub const PROBE_SETTLE: Duration = Duration::from_secs(1);

/// Scanner backed by the operating system's serial devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialScanner;

impl PortScanner for SerialScanner {
    fn available_ports(&self) -> Vec<String> {
        match tokio_serial::available_ports() {
            Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
            Err(e) => {
                warn!("serial port enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn sample_lines(
        &self,
        path: &str,
        baud: u32,
        max_lines: usize,
        window: Duration,
    ) -> Vec<String> {
        let stream = match tokio_serial::new(path, baud).open_native_async() {
            Ok(stream) => stream,
            Err(e) => {
                debug!("failed to open {} at {} baud: {}", path, baud, e);
                return Vec::new();
            }
        };

        tokio::time::sleep(PROBE_SETTLE).await;

        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut lines = Vec::new();
        let deadline = Instant::now() + window;

        while lines.len() < max_lines {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            buf.clear();
            match timeout(remaining, reader.read_until(b'\n', &mut buf)).await {
                Err(_) => break,
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => {
                    // Undecodable bytes usually mean a wrong baud; skip quietly.
                    if let Ok(text) = std::str::from_utf8(&buf) {
                        let line = text.trim();
                        if !line.is_empty() {
                            lines.push(line.to_string());
                        }
                    }
                }
                Ok(Err(e)) => {
                    debug!("read error while probing {}: {}", path, e);
                    break;
                }
            }
        }

        lines
    }
}
