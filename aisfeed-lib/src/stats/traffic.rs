use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TimeWindow;
use crate::{Error, Result};

/// Granularity of one of the standard statistics windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    #[display("second")]
    Second,
    #[display("minute")]
    Minute,
    #[display("hour")]
    Hour,
    #[display("day")]
    Day,
}

impl Resolution {
    pub const ALL: [Resolution; 4] = [
        Resolution::Second,
        Resolution::Minute,
        Resolution::Hour,
        Resolution::Day,
    ];

    #[must_use]
    pub fn bucket_count(self) -> usize {
        match self {
            Resolution::Second | Resolution::Minute => 60,
            Resolution::Hour => 24,
            Resolution::Day => 90,
        }
    }

    /// Bucket duration in seconds.
    #[must_use]
    pub fn duration(self) -> i64 {
        match self {
            Resolution::Second => 1,
            Resolution::Minute => 60,
            Resolution::Hour => 3600,
            Resolution::Day => 86400,
        }
    }

    #[must_use]
    pub fn window(self) -> TimeWindow {
        TimeWindow::new(self.bucket_count(), self.duration())
    }
}

/// Bucket values for one resolution, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub resolution: Resolution,
    pub duration: i64,
    pub messages: Vec<u64>,
    pub bytes: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    pub time: DateTime<Utc>,
    pub windows: Vec<WindowSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Counters {
    messages: Vec<TimeWindow>,
    bytes: Vec<TimeWindow>,
}

impl Default for Counters {
    fn default() -> Self {
        Counters {
            messages: Resolution::ALL.iter().map(|r| r.window()).collect(),
            bytes: Resolution::ALL.iter().map(|r| r.window()).collect(),
        }
    }
}

impl Counters {
    fn check_shape(&self, other: &Counters) -> Result<()> {
        let pairs = [
            (&self.messages, &other.messages),
            (&self.bytes, &other.bytes),
        ];
        for (ours, theirs) in pairs {
            for (idx, window) in ours.iter().enumerate() {
                let Some(saved) = theirs.get(idx) else {
                    return Err(Error::SnapshotShape {
                        expected_buckets: window.bucket_count(),
                        expected_duration: window.duration(),
                        buckets: 0,
                        duration: 0,
                    });
                };
                window.check_shape(saved)?;
            }
        }
        Ok(())
    }
}

/// Message and byte counts at second, minute, hour and day resolution.
///
/// All windows share one lock so that updates, snapshots and persistence observe a consistent
/// state across resolutions. Safe to share between ingestion and reporting threads.
#[derive(Debug, Default)]
pub struct TrafficStats {
    counters: Mutex<Counters>,
}

fn timestamp(now: DateTime<Utc>) -> i64 {
    now.timestamp()
}

impl TrafficStats {
    #[must_use]
    pub fn new() -> Self {
        TrafficStats::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_messages(&self, count: u64, now: DateTime<Utc>) {
        let now = timestamp(now);
        for window in &mut self.lock().messages {
            window.add(count, now);
        }
    }

    pub fn record_message(&self, now: DateTime<Utc>) {
        self.record_messages(1, now);
    }

    pub fn record_bytes(&self, count: u64, now: DateTime<Utc>) {
        let now = timestamp(now);
        for window in &mut self.lock().bytes {
            window.add(count, now);
        }
    }

    /// Current bucket values for every resolution as of `now`.
    ///
    /// Buckets whose period ended before `now` without activity are reported as zero.
    pub fn snapshot(&self, now: DateTime<Utc>) -> TrafficSnapshot {
        let ts = timestamp(now);
        let mut counters = self.lock();
        let Counters { messages, bytes } = &mut *counters;

        let windows = Resolution::ALL
            .iter()
            .zip(messages.iter_mut().zip(bytes.iter_mut()))
            .map(|(resolution, (messages, bytes))| {
                messages.advance(ts);
                bytes.advance(ts);
                WindowSnapshot {
                    resolution: *resolution,
                    duration: resolution.duration(),
                    messages: messages.snapshot(),
                    bytes: bytes.snapshot(),
                }
            })
            .collect();

        TrafficSnapshot { time: now, windows }
    }

    pub fn clear(&self) {
        let mut counters = self.lock();
        let Counters { messages, bytes } = &mut *counters;
        for window in messages.iter_mut().chain(bytes.iter_mut()) {
            window.clear();
        }
    }

    /// Serialize all windows as one blob.
    ///
    /// # Errors
    /// If serialization fails.
    pub fn save(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&*self.lock())?)
    }

    /// Replace all windows from a blob produced by [TrafficStats::save].
    ///
    /// Either every window is replaced or, on error, none are.
    ///
    /// # Errors
    /// [Error::Snapshot] if the blob cannot be decoded, [Error::SnapshotShape] if any window
    /// does not match the standard resolutions.
    pub fn load(&self, blob: &[u8]) -> Result<()> {
        let saved: Counters = serde_json::from_slice(blob)?;
        let mut counters = self.lock();
        counters.check_shape(&saved)?;
        *counters = saved;
        Ok(())
    }

    /// Save to a file at `path`, replacing any existing file.
    ///
    /// # Errors
    /// On serialization or I/O failure.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let blob = self.save()?;
        fs::write(path.as_ref(), blob)?;
        debug!(path = %path.as_ref().display(), "saved statistics");
        Ok(())
    }

    /// Load from a file written by [TrafficStats::save_to].
    ///
    /// # Errors
    /// On I/O failure or if the contents are not a valid snapshot.
    pub fn load_from<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let blob = fs::read(path.as_ref())?;
        self.load(&blob)?;
        debug!(path = %path.as_ref().display(), "loaded statistics");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn standard_windows() {
        let stats = TrafficStats::new();
        let snapshot = stats.snapshot(at(0));

        let shapes: Vec<_> = snapshot
            .windows
            .iter()
            .map(|w| (w.resolution, w.messages.len(), w.duration))
            .collect();
        assert_eq!(
            shapes,
            vec![
                (Resolution::Second, 60, 1),
                (Resolution::Minute, 60, 60),
                (Resolution::Hour, 24, 3600),
                (Resolution::Day, 90, 86400),
            ]
        );
    }

    #[test]
    fn records_into_every_resolution() {
        let stats = TrafficStats::new();
        stats.record_message(at(1_000));
        stats.record_messages(2, at(1_001));
        stats.record_bytes(80, at(1_001));

        let snapshot = stats.snapshot(at(1_001));
        for window in &snapshot.windows {
            assert_eq!(window.messages.iter().sum::<u64>(), 3, "{}", window.resolution);
            assert_eq!(window.bytes.iter().sum::<u64>(), 80, "{}", window.resolution);
        }
        let seconds = &snapshot.windows[0];
        assert_eq!(seconds.messages[58..], [1, 2]);
    }

    #[test]
    fn snapshot_advances_to_now() {
        let stats = TrafficStats::new();
        stats.record_message(at(0));

        let snapshot = stats.snapshot(at(120));
        assert_eq!(snapshot.windows[0].messages.iter().sum::<u64>(), 0);
        assert_eq!(snapshot.windows[1].messages.iter().sum::<u64>(), 1);
        assert_eq!(snapshot.windows[1].messages[57], 1);
    }

    #[test]
    fn clear() {
        let stats = TrafficStats::new();
        stats.record_bytes(10, at(5));
        stats.record_messages(2, at(5));
        stats.clear();

        let snapshot = stats.snapshot(at(5));
        assert!(snapshot.windows.iter().all(|w| w.bytes.iter().all(|v| *v == 0)));
        assert!(snapshot.windows.iter().all(|w| w.messages.iter().all(|v| *v == 0)));
    }

    #[test]
    fn save_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let stats = TrafficStats::new();
        stats.record_message(at(3_600));
        stats.record_bytes(42, at(3_600));
        stats.save_to(&path).unwrap();

        let loaded = TrafficStats::new();
        loaded.load_from(&path).unwrap();
        let snapshot = loaded.snapshot(at(3_600));
        assert_eq!(snapshot.windows[3].messages.iter().sum::<u64>(), 1);
        assert_eq!(snapshot.windows[3].bytes.iter().sum::<u64>(), 42);
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let stats = TrafficStats::new();

        assert!(matches!(
            stats.load_from(dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn failed_load_keeps_counts() {
        let stats = TrafficStats::new();
        stats.record_message(at(10));

        let mut truncated = TrafficStats::new().save().unwrap();
        truncated.truncate(truncated.len() / 2);
        assert!(stats.load(&truncated).is_err());

        let mismatched = br#"{"messages":[],"bytes":[]}"#;
        assert!(matches!(
            stats.load(mismatched),
            Err(Error::SnapshotShape { .. })
        ));

        let snapshot = stats.snapshot(at(10));
        assert_eq!(snapshot.windows[0].messages[59], 1);
    }
}
