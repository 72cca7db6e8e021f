//! Sensor Acquisition
//!
//! Everything between the serial line and the processed frame: reconnecting
//! reader tasks, wire-format dispatch with per-sensor zero offsets, the
//! emulated waveform source, and the fixed-rate data processor that fuses
//! the latest values and derives the calculated channel.

mod emulation;
mod manager;
mod processor;
mod reader;
mod source;

pub use emulation::{
    disp_phase, disp_scale, disp_waveform, force_waveform, EmulationSource, EMULATION_RATE_HZ,
};
pub use manager::{SensorCache, SensorManager};
pub use processor::{
    compute_arc, DataProcessor, CONSECUTIVE_NAN_LIMIT, PROCESSING_INTERVAL, PROCESSING_RATE_HZ,
};
pub use reader::{ReaderHandle, SerialReaderTask, READ_TIMEOUT, REOPEN_DELAY};
pub use source::{HardwareSource, RawSample, SampleSink, SensorSource};
