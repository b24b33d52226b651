use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{Error, Result};

/// Fixed number of circular buckets, each covering `duration` time units.
///
/// Buckets are aligned to multiples of `duration`, i.e., the bucket for time `t` covers
/// `[t - t % duration, t - t % duration + duration)`. Adding a value first advances the
/// window to `now`, zeroing every bucket whose period passed without activity. Times earlier
/// than the last update are counted in the current bucket and never move the window back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    duration: i64,
    current: usize,
    last_update: Option<i64>,
    buckets: Vec<u64>,
}

impl TimeWindow {
    /// Create a zeroed window of `count` buckets each `duration` units long.
    ///
    /// # Panics
    /// If `count` or `duration` is 0.
    #[must_use]
    pub fn new(count: usize, duration: i64) -> Self {
        assert!(count > 0, "bucket count must be > 0");
        assert!(duration > 0, "bucket duration must be > 0");
        TimeWindow {
            duration,
            current: 0,
            last_update: None,
            buckets: vec![0; count],
        }
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn duration(&self) -> i64 {
        self.duration
    }

    /// Time of the most recent update, if any.
    #[must_use]
    pub fn last_update(&self) -> Option<i64> {
        self.last_update
    }

    /// Move the window forward to `now` without adding anything.
    pub fn advance(&mut self, now: i64) {
        let Some(last) = self.last_update else {
            self.last_update = Some(now);
            return;
        };
        if now <= last {
            return;
        }

        let elapsed = now.div_euclid(self.duration) - last.div_euclid(self.duration);
        let count = self.buckets.len();
        if elapsed >= count as i64 {
            trace!(elapsed, "window expired");
            self.buckets.fill(0);
            self.current = 0;
        } else {
            for _ in 0..elapsed {
                self.current = (self.current + 1) % count;
                self.buckets[self.current] = 0;
            }
        }
        self.last_update = Some(now);
    }

    /// Add `value` to the bucket covering `now`.
    pub fn add(&mut self, value: u64, now: i64) {
        self.advance(now);
        let bucket = &mut self.buckets[self.current];
        *bucket = bucket.saturating_add(value);
    }

    /// Bucket values ordered oldest to newest; the last value is the current bucket.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u64> {
        let start = (self.current + 1) % self.buckets.len();
        self.buckets[start..]
            .iter()
            .chain(&self.buckets[..start])
            .copied()
            .collect()
    }

    /// Zero all buckets and forget the last update time.
    pub fn clear(&mut self) {
        self.buckets.fill(0);
        self.current = 0;
        self.last_update = None;
    }

    /// Serialize this window's full state.
    ///
    /// # Errors
    /// If serialization fails.
    pub fn save(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Replace this window's state with a previously saved one.
    ///
    /// The saved window must have the same bucket count and duration as this one. On any
    /// error this window is left unchanged.
    ///
    /// # Errors
    /// [Error::Snapshot] if `blob` cannot be decoded, [Error::SnapshotShape] if it does not
    /// fit this window.
    pub fn load(&mut self, blob: &[u8]) -> Result<()> {
        let other: TimeWindow = serde_json::from_slice(blob)?;
        self.check_shape(&other)?;
        *self = other;
        Ok(())
    }

    pub(crate) fn check_shape(&self, other: &TimeWindow) -> Result<()> {
        if other.buckets.len() != self.buckets.len()
            || other.duration != self.duration
            || other.current >= other.buckets.len()
        {
            return Err(Error::SnapshotShape {
                expected_buckets: self.buckets.len(),
                expected_duration: self.duration,
                buckets: other.buckets.len(),
                duration: other.duration,
            });
        }
        Ok(())
    }
}
