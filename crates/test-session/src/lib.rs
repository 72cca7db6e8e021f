//! Test Session Management
//!
//! The lifecycle of a named test: prepare metadata and artifacts on disk,
//! record raw lines and processed frames to CSV/log files while running,
//! retain recent samples for windowed queries, and surface completed tests
//! as history.

mod artifacts;
mod error;
mod manager;

pub use artifacts::{
    csv_sensor_order, default_description, format_sensor_value, format_time, sanitize_test_id,
    scan_history, ARCHIVE_DIR, DISP_DECIMALS, FORCE_DECIMALS, TEST_DATA_DIR, TIME_DECIMALS,
};
pub use error::TestError;
pub use manager::{spawn_event_pump, TestManager, STORAGE_SAMPLING_FREQ_HZ};
pub use ring_buffer::SamplePoint;
