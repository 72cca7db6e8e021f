//! Sensor Wire Formats and Port Detection
//!
//! The two ASCII line formats spoken by the bench sensors, plus automatic
//! mapping of sensors onto serial device paths by probing candidate ports
//! and classifying what they emit.

mod detector;
mod parser;
mod scanner;

pub use detector::{
    DetectedSensor, PortDetector, PortScanner, ProbeHit, DISP_CONFIDENCE, FORCE_CONFIDENCE,
    PROBE_MAX_LINES, PROBE_WINDOW,
};
pub use parser::{classify_line, parse_disp_line, parse_force_line, DispReading, LineKind};
pub use scanner::{SerialScanner, PROBE_SETTLE};
