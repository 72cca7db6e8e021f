//! Test Session Records

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operator-supplied metadata for a test, persisted verbatim as
/// `metadata.json` in the test directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMetaData {
    /// Assigned on prepare: `<yyyymmdd_HHMMSS>_<sanitized operator id>`,
    /// always equal to the directory name on disk.
    pub test_id: String,
    pub date: String,
    pub operator_name: String,
    pub specimen_code: String,
    #[serde(default)]
    pub dim_length: f64,
    #[serde(default)]
    pub dim_height: f64,
    #[serde(default)]
    pub dim_width: f64,
    #[serde(default)]
    pub loading_mode: String,
    #[serde(default)]
    pub sensor_spacing: f64,
    #[serde(default)]
    pub ext_sensor_spacing: f64,
    #[serde(default)]
    pub ext_support_spacing: f64,
    #[serde(default)]
    pub load_point_spacing: f64,
}

/// Lifecycle of the one test the system records at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    /// No test in memory.
    Nothing,
    /// Metadata set and directory created, recording not started.
    Prepared,
    /// Recording in progress.
    Running,
    /// Recording ended, test not yet finalized.
    Stopped,
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestState::Nothing => "nothing",
            TestState::Prepared => "prepared",
            TestState::Running => "running",
            TestState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_json_round_trip() {
        let meta = TestMetaData {
            test_id: "20260114_run-1".to_string(),
            date: "2026-01-14".to_string(),
            operator_name: "op".to_string(),
            specimen_code: "S-42".to_string(),
            dim_length: 120.0,
            dim_height: 30.0,
            dim_width: 15.0,
            loading_mode: "three-point".to_string(),
            sensor_spacing: 50.0,
            ext_sensor_spacing: 0.0,
            ext_support_spacing: 100.0,
            load_point_spacing: 0.0,
        };
        let json = serde_json::to_string_pretty(&meta).unwrap();
        let back: TestMetaData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_metadata_dimension_defaults() {
        let back: TestMetaData = serde_json::from_str(
            r#"{"test_id":"t","date":"2026-01-14","operator_name":"op","specimen_code":"s"}"#,
        )
        .unwrap();
        assert_eq!(back.dim_length, 0.0);
        assert_eq!(back.loading_mode, "");
    }
}
