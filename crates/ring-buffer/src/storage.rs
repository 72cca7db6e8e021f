//! Windowed Time-Series Storage
//!
//! One circular buffer per sensor plus precomputed sampling plans for each
//! supported display window. All windows return the same point count at
//! different spacings, so display layers never rescale.

use crate::buffer::RingBuffer;
use std::collections::HashMap;
use thiserror::Error;

/// Display windows, in seconds, that [`SensorDataStorage::query`] accepts.
pub const SUPPORTED_WINDOWS_SECS: [u32; 5] = [30, 60, 120, 300, 600];

/// Buffers hold twenty 30-second windows (ten minutes at the sampling rate).
const CAPACITY_WINDOWS: usize = 20;

/// A `(relative_time, value)` pair as stored per sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SamplePoint {
    /// Seconds since test start.
    pub time: f64,
    pub value: f64,
}

/// Errors from storage access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("invalid sensor index {0}")]
    InvalidSensor(usize),

    /// Window outside the closed supported set.
    #[error("unsupported window: {0}s")]
    UnsupportedWindow(u32),
}

/// Precomputed per-window sampling plan.
#[derive(Debug)]
struct WindowPlan {
    /// Samples spanned by a full window at the sampling rate.
    max_points: usize,
    /// Relative indices into the last `max_points` samples, evenly spaced,
    /// last pinned to the final sample.
    offsets: Vec<usize>,
}

/// Per-sensor circular buffers with uniform-spacing window queries.
#[derive(Debug)]
pub struct SensorDataStorage {
    sampling_frequency: f64,
    /// Point count every window query returns when enough data is present.
    reference_points: usize,
    total_capacity: usize,
    buffers: Vec<RingBuffer<SamplePoint>>,
    plans: HashMap<u32, WindowPlan>,
}

impl SensorDataStorage {
    /// Create storage for `sensor_count` sensors sampled at
    /// `sampling_frequency` Hz.
    pub fn new(sensor_count: usize, sampling_frequency: f64) -> Self {
        let points_per_30s = (sampling_frequency * 30.0) as usize;
        let total_capacity = points_per_30s * CAPACITY_WINDOWS;

        let mut plans = HashMap::new();
        for window in SUPPORTED_WINDOWS_SECS {
            let max_points = (sampling_frequency * f64::from(window)) as usize;
            let step = max_points as f64 / points_per_30s as f64;
            let mut offsets: Vec<usize> = (0..points_per_30s)
                .map(|i| (i as f64 * step) as usize)
                .collect();
            if let Some(last) = offsets.last_mut() {
                *last = max_points - 1;
            }
            plans.insert(
                window,
                WindowPlan {
                    max_points,
                    offsets,
                },
            );
        }

        Self {
            sampling_frequency,
            reference_points: points_per_30s,
            total_capacity,
            buffers: (0..sensor_count)
                .map(|_| RingBuffer::new(total_capacity))
                .collect(),
            plans,
        }
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    pub fn reference_points(&self) -> usize {
        self.reference_points
    }

    pub fn capacity(&self) -> usize {
        self.total_capacity
    }

    pub fn sensor_count(&self) -> usize {
        self.buffers.len()
    }

    fn buffer(&self, sensor: usize) -> Result<&RingBuffer<SamplePoint>, StorageError> {
        self.buffers
            .get(sensor)
            .ok_or(StorageError::InvalidSensor(sensor))
    }

    /// Append a point to a sensor's buffer. O(1).
    pub fn append(&mut self, sensor: usize, time: f64, value: f64) -> Result<(), StorageError> {
        let buffer = self
            .buffers
            .get_mut(sensor)
            .ok_or(StorageError::InvalidSensor(sensor))?;
        buffer.append(SamplePoint { time, value });
        Ok(())
    }

    /// Number of stored points for a sensor.
    pub fn len(&self, sensor: usize) -> Result<usize, StorageError> {
        Ok(self.buffer(sensor)?.len())
    }

    pub fn is_empty(&self, sensor: usize) -> Result<bool, StorageError> {
        Ok(self.buffer(sensor)?.is_empty())
    }

    /// Time of the most recently appended point, if any.
    pub fn last_time(&self, sensor: usize) -> Result<Option<f64>, StorageError> {
        let buffer = self.buffer(sensor)?;
        if buffer.is_empty() {
            return Ok(None);
        }
        let last = buffer
            .get(buffer.len() - 1)
            .expect("non-empty buffer has a last entry");
        Ok(Some(last.time))
    }

    /// All stored points for a sensor in chronological order.
    pub fn get_all(&self, sensor: usize) -> Result<Vec<SamplePoint>, StorageError> {
        Ok(self.buffer(sensor)?.get_all())
    }

    /// Points for a display window at uniform spacing.
    ///
    /// Three regimes, oldest data first in all of them:
    /// - fewer points than the reference count: everything available,
    ///   unchanged;
    /// - a full window of data: exactly `reference_points` entries picked by
    ///   the precomputed offsets over the last `max_points` samples;
    /// - in between: `reference_points` entries subsampled uniformly across
    ///   what is available, last pinned to the most recent sample.
    pub fn query(&self, sensor: usize, window_seconds: u32) -> Result<Vec<SamplePoint>, StorageError> {
        let plan = self
            .plans
            .get(&window_seconds)
            .ok_or(StorageError::UnsupportedWindow(window_seconds))?;
        let buffer = self.buffer(sensor)?;

        let count = buffer.len();
        if count == 0 {
            return Ok(Vec::new());
        }

        let available = count.min(plan.max_points);
        let target = self.reference_points;
        // Indices below are all derived from len(), so lookups cannot fail.
        let fetch = |index: usize| buffer.get(index).expect("index derived from buffer length");

        if available <= target {
            return Ok((count - available..count).map(fetch).collect());
        }

        if available >= plan.max_points {
            let window_start = count - plan.max_points;
            return Ok(plan
                .offsets
                .iter()
                .map(|&off| fetch(window_start + off))
                .collect());
        }

        let step = available as f64 / target as f64;
        let start = count - available;
        Ok((0..target)
            .map(|i| {
                let index = if i == target - 1 {
                    start + available - 1
                } else {
                    start + (i as f64 * step) as usize
                };
                fetch(index)
            })
            .collect())
    }

    /// Discard all points for one sensor.
    pub fn clear_sensor(&mut self, sensor: usize) -> Result<(), StorageError> {
        self.buffers
            .get_mut(sensor)
            .ok_or(StorageError::InvalidSensor(sensor))?
            .clear();
        Ok(())
    }

    /// Discard all points for every sensor.
    pub fn clear_all(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(storage: &mut SensorDataStorage, sensor: usize, count: usize, dt: f64) {
        for i in 0..count {
            storage.append(sensor, i as f64 * dt, i as f64).unwrap();
        }
    }

    #[test]
    fn test_capacity_and_reference_points() {
        let storage = SensorDataStorage::new(3, 5.0);
        assert_eq!(storage.capacity(), 3000);
        assert_eq!(storage.reference_points(), 150);
        assert_eq!(storage.sensor_count(), 3);
    }

    #[test]
    fn test_unsupported_window() {
        let storage = SensorDataStorage::new(1, 5.0);
        assert_eq!(
            storage.query(0, 45),
            Err(StorageError::UnsupportedWindow(45))
        );
    }

    #[test]
    fn test_invalid_sensor_index() {
        let mut storage = SensorDataStorage::new(2, 5.0);
        assert_eq!(
            storage.append(2, 0.0, 0.0),
            Err(StorageError::InvalidSensor(2))
        );
        assert_eq!(storage.query(5, 30), Err(StorageError::InvalidSensor(5)));
    }

    #[test]
    fn test_query_short_series_returned_unchanged() {
        let mut storage = SensorDataStorage::new(1, 5.0);
        fill(&mut storage, 0, 40, 0.2);
        let points = storage.query(0, 60).unwrap();
        assert_eq!(points.len(), 40);
        assert_eq!(points[0].time, 0.0);
        assert!((points[39].time - 7.8).abs() < 1e-9);
    }

    #[test]
    fn test_query_full_window_uses_offsets() {
        // 5 Hz, 3000 points at 0.2 s spacing: times 0.0 .. 599.8.
        let mut storage = SensorDataStorage::new(1, 5.0);
        fill(&mut storage, 0, 3000, 0.2);

        let points = storage.query(0, 60).unwrap();
        assert_eq!(points.len(), 150);
        assert!((points[0].time - 540.0).abs() < 1e-9);
        assert!((points[149].time - 599.8).abs() < 1e-9);
        for pair in points.windows(2) {
            assert!(pair[0].time < pair[1].time);
        }
    }

    #[test]
    fn test_query_last_sample_always_newest() {
        let mut storage = SensorDataStorage::new(1, 5.0);
        for count in [10usize, 200, 1500, 3000, 4000] {
            storage.clear_all();
            fill(&mut storage, 0, count, 0.2);
            let newest = storage.last_time(0).unwrap().unwrap();
            for window in SUPPORTED_WINDOWS_SECS {
                let points = storage.query(0, window).unwrap();
                assert_eq!(points.last().unwrap().time, newest);
            }
        }
    }

    #[test]
    fn test_query_partial_window_subsamples_to_reference_count() {
        // More than 150 but fewer than the 300 a full 60 s window spans.
        let mut storage = SensorDataStorage::new(1, 5.0);
        fill(&mut storage, 0, 220, 0.2);

        let points = storage.query(0, 60).unwrap();
        assert_eq!(points.len(), 150);
        assert!((points.last().unwrap().time - 43.8).abs() < 1e-9);
        for pair in points.windows(2) {
            assert!(pair[0].time <= pair[1].time);
        }
    }

    #[test]
    fn test_query_all_windows_same_point_count_when_full() {
        let mut storage = SensorDataStorage::new(1, 4.0);
        // Fill to capacity: 4 Hz -> 2400 points, covering all windows.
        fill(&mut storage, 0, 2400, 0.25);
        for window in SUPPORTED_WINDOWS_SECS {
            let points = storage.query(0, window).unwrap();
            assert_eq!(points.len(), 120, "window {window}s");
        }
    }

    #[test]
    fn test_clear_per_sensor_independent() {
        let mut storage = SensorDataStorage::new(2, 5.0);
        fill(&mut storage, 0, 10, 0.2);
        storage.append(1, 0.0, 7.0).unwrap();
        storage.clear_sensor(0).unwrap();
        assert!(storage.is_empty(0).unwrap());
        assert_eq!(storage.len(1).unwrap(), 1);
    }
}
