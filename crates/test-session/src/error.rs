//! Test Session Errors

use bench_core::TestState;
use thiserror::Error;

/// Errors surfaced by test-session operations.
#[derive(Debug, Error)]
pub enum TestError {
    /// The lifecycle state machine forbids the operation right now.
    #[error("cannot {operation} while test state is {state}")]
    Conflict {
        operation: &'static str,
        state: TestState,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("test not found: {0}")]
    NotFound(String),

    /// Window outside the closed supported set.
    #[error("unsupported window: {0}s")]
    UnsupportedWindow(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
}

impl From<ring_buffer::StorageError> for TestError {
    fn from(e: ring_buffer::StorageError) -> Self {
        match e {
            ring_buffer::StorageError::UnsupportedWindow(w) => TestError::UnsupportedWindow(w),
            ring_buffer::StorageError::InvalidSensor(i) => {
                TestError::InvalidArgument(format!("invalid sensor index {i}"))
            }
        }
    }
}
