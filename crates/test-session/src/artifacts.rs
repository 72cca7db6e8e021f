//! Test Artifact Helpers
//!
//! Naming, formatting and scanning of the on-disk test layout:
//! `<root>/test_data/<id>/` for live and retired tests,
//! `<root>/archived_data/<id>/` for archived ones.

use bench_core::{SensorId, TestMetaData};
use std::path::Path;
use tracing::{debug, error};

/// Directory under the storage root holding live and retired tests.
pub const TEST_DATA_DIR: &str = "test_data";

/// Directory under the storage root holding archived tests.
pub const ARCHIVE_DIR: &str = "archived_data";

/// CSV decimals for timestamps and relative times.
pub const TIME_DECIMALS: usize = 3;

/// CSV decimals for force values.
pub const FORCE_DECIMALS: usize = 2;

/// CSV decimals for displacement and calculated values.
pub const DISP_DECIMALS: usize = 6;

/// Reduce an operator-supplied id to `[A-Za-z0-9_-]`; an id with nothing
/// left becomes `test`.
pub fn sanitize_test_id(raw: &str) -> String {
    let safe: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if safe.is_empty() {
        "test".to_string()
    } else {
        safe
    }
}

/// Format an absolute or relative time for CSV.
pub fn format_time(t: f64) -> String {
    format!("{t:.prec$}", prec = TIME_DECIMALS)
}

/// Format a sensor value for CSV: force coarser than displacement and the
/// calculated channel. NaN becomes an empty field.
pub fn format_sensor_value(sensor: SensorId, value: f64) -> String {
    if value.is_nan() {
        return String::new();
    }
    let prec = match sensor {
        SensorId::Force => FORCE_DECIMALS,
        _ => DISP_DECIMALS,
    };
    format!("{value:.prec$}")
}

/// Sensor columns of `data.csv`, alphabetized by wire name.
pub fn csv_sensor_order() -> Vec<SensorId> {
    let mut ids = SensorId::ALL.to_vec();
    ids.sort_by_key(|id| id.name());
    ids
}

/// Default `description.md` contents for a freshly prepared test.
pub fn default_description(meta: &TestMetaData) -> String {
    format!(
        "# {}\n\nTest description.\n\n## Details\n- Date: {}\n- Operator: {}\n- Specimen: {}\n",
        meta.test_id, meta.date, meta.operator_name, meta.specimen_code
    )
}

/// Collect metadata from every test directory whose `metadata.json` parses,
/// excluding the in-flight test, newest date first. The directory name wins
/// over whatever id the metadata file carries.
pub fn scan_history(test_data_dir: &Path, exclude: Option<&str>) -> Vec<TestMetaData> {
    let mut history = Vec::new();
    let entries = match std::fs::read_dir(test_data_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("history scan: {} unreadable: {}", test_data_dir.display(), e);
            return history;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let dirname = entry.file_name().to_string_lossy().into_owned();
        if exclude == Some(dirname.as_str()) {
            continue;
        }

        let meta_path = path.join("metadata.json");
        let text = match std::fs::read_to_string(&meta_path) {
            Ok(text) => text,
            Err(_) => continue,
        };
        match serde_json::from_str::<TestMetaData>(&text) {
            Ok(mut meta) => {
                meta.test_id = dirname;
                history.push(meta);
            }
            Err(e) => error!("failed to load test {}: {}", dirname, e),
        }
    }

    history.sort_by(|a, b| b.date.cmp(&a.date));
    history
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_test_id("run-1"), "run-1");
        assert_eq!(sanitize_test_id("run 1!§"), "run1");
        assert_eq!(sanitize_test_id("béton_A"), "bton_A");
        assert_eq!(sanitize_test_id("  !!  "), "test");
        assert_eq!(sanitize_test_id(""), "test");
        assert_eq!(sanitize_test_id("../../etc"), "etc");
    }

    #[test]
    fn test_format_time_three_decimals() {
        assert_eq!(format_time(12.3456789), "12.346");
        assert_eq!(format_time(0.0), "0.000");
    }

    #[test]
    fn test_format_sensor_value_precision() {
        assert_eq!(format_sensor_value(SensorId::Force, -49.65955), "-49.66");
        assert_eq!(format_sensor_value(SensorId::Disp1, 1.234), "1.234000");
        assert_eq!(format_sensor_value(SensorId::Arc, -0.5), "-0.500000");
        assert_eq!(format_sensor_value(SensorId::Force, f64::NAN), "");
        assert_eq!(format_sensor_value(SensorId::Disp3, f64::NAN), "");
    }

    #[test]
    fn test_csv_sensor_order_is_alphabetical() {
        let names: Vec<&str> = csv_sensor_order().into_iter().map(|id| id.name()).collect();
        assert_eq!(
            names,
            vec!["ARC", "DISP_1", "DISP_2", "DISP_3", "DISP_4", "DISP_5", "FORCE"]
        );
    }

    #[test]
    fn test_default_description_mentions_key_fields() {
        let meta = TestMetaData {
            test_id: "20260114_run-1".into(),
            date: "2026-01-14".into(),
            operator_name: "op".into(),
            specimen_code: "S-42".into(),
            dim_length: 0.0,
            dim_height: 0.0,
            dim_width: 0.0,
            loading_mode: String::new(),
            sensor_spacing: 0.0,
            ext_sensor_spacing: 0.0,
            ext_support_spacing: 0.0,
            load_point_spacing: 0.0,
        };
        let text = default_description(&meta);
        assert!(text.contains("# 20260114_run-1"));
        assert!(text.contains("2026-01-14"));
        assert!(text.contains("op"));
        assert!(text.contains("S-42"));
    }
}
