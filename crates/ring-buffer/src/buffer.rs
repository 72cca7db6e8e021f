//! Circular Buffer Implementation

use thiserror::Error;

/// Errors from indexed buffer access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingBufferError {
    /// Logical index outside `[0, len)`.
    #[error("index {index} out of range [0, {len})")]
    OutOfRange { index: usize, len: usize },

    /// `[start, end)` is not a valid sub-range of the buffer.
    #[error("invalid range [{start}, {end}) for buffer of length {len}")]
    InvalidRange {
        start: usize,
        end: usize,
        len: usize,
    },
}

/// Fixed-capacity circular buffer. Appends overwrite the oldest entry once
/// full; logical index 0 is the oldest valid entry, `len() - 1` the newest.
///
/// Power-of-two capacities take a bit-mask fast path for the wrap
/// arithmetic; other capacities use standard modulo. Both paths are
/// observationally identical.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    storage: Box<[T]>,
    capacity: usize,
    /// Next physical slot to write.
    write_index: usize,
    /// Number of valid entries, saturating at `capacity`.
    len: usize,
    /// `capacity - 1` when capacity is a power of two.
    mask: Option<usize>,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a buffer holding up to `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        let mask = capacity.is_power_of_two().then(|| capacity - 1);
        Self {
            storage: vec![T::default(); capacity].into_boxed_slice(),
            capacity,
            write_index: 0,
            len: 0,
            mask,
        }
    }

    #[inline]
    fn wrap(&self, raw: usize) -> usize {
        match self.mask {
            Some(mask) => raw & mask,
            None => raw % self.capacity,
        }
    }

    #[inline]
    fn physical(&self, index: usize) -> usize {
        self.wrap(self.write_index + self.capacity - self.len + index)
    }

    /// Append an entry, overwriting the oldest when full. O(1).
    pub fn append(&mut self, item: T) {
        self.storage[self.write_index] = item;
        self.write_index = self.wrap(self.write_index + 1);
        if self.len < self.capacity {
            self.len += 1;
        }
    }

    /// Entry at logical `index` (0 = oldest). O(1).
    pub fn get(&self, index: usize) -> Result<T, RingBufferError> {
        if index >= self.len {
            return Err(RingBufferError::OutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(self.storage[self.physical(index)])
    }

    /// All valid entries in chronological order. Single copy when the live
    /// region is contiguous, two otherwise.
    pub fn get_all(&self) -> Vec<T> {
        if self.len == 0 {
            return Vec::new();
        }
        if self.write_index >= self.len {
            return self.storage[self.write_index - self.len..self.write_index].to_vec();
        }
        let mut out = Vec::with_capacity(self.len);
        let tail_start = self.capacity - (self.len - self.write_index);
        out.extend_from_slice(&self.storage[tail_start..]);
        out.extend_from_slice(&self.storage[..self.write_index]);
        out
    }

    /// Entries at logical indices `[start, end)` in chronological order.
    pub fn get_range(&self, start: usize, end: usize) -> Result<Vec<T>, RingBufferError> {
        if start > end || end > self.len {
            return Err(RingBufferError::InvalidRange {
                start,
                end,
                len: self.len,
            });
        }
        let mut out = Vec::with_capacity(end - start);
        for index in start..end {
            out.push(self.storage[self.physical(index)]);
        }
        Ok(out)
    }

    /// Number of valid entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard all entries. Capacity is unchanged.
    pub fn clear(&mut self) {
        self.write_index = 0;
        self.len = 0;
    }
}
