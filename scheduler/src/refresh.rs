//! Estimation of the host display's refresh interval.
//!
//! The scheduler only ever sees frame callbacks; it learns the
//! display's actual refresh rate by keeping a small window of recent
//! frame timestamps and measuring the gaps between them.  The
//! estimate is the *median* gap, not the mean: a single janky frame
//! (a GC pause in the host, a dropped vsync) lands in the tail of the
//! sorted gaps and leaves the estimate untouched.

use std::collections::VecDeque;

/// Number of frame timestamps retained.  Five gaps are enough for a
/// stable median while still tracking a genuine refresh-rate change
/// (e.g. a window dragged to a different monitor) within a few
/// frames.
const TIMESTAMP_WINDOW: usize = 6;

/// A rolling window of recent frame timestamps, newest first.
#[derive(Debug, Default)]
pub struct RefreshRateEstimator {
    timestamps: VecDeque<f64>,
}

impl RefreshRateEstimator {
    #[must_use]
    pub fn new() -> RefreshRateEstimator {
        RefreshRateEstimator {
            timestamps: VecDeque::with_capacity(TIMESTAMP_WINDOW),
        }
    }

    /// Records a frame timestamp (milliseconds, monotonic), evicting
    /// the oldest once the window is full.
    pub fn push(&mut self, timestamp_ms: f64) {
        self.timestamps.push_front(timestamp_ms);
        if self.timestamps.len() > TIMESTAMP_WINDOW {
            self.timestamps.pop_back();
        }
    }

    /// Forgets all recorded timestamps.
    pub fn clear(&mut self) {
        self.timestamps.clear();
    }

    /// True once at least one timestamp has been recorded.
    #[must_use]
    pub fn has_samples(&self) -> bool {
        !self.timestamps.is_empty()
    }

    /// The median interval between consecutive recorded frames, in
    /// milliseconds, or `None` with fewer than two samples.
    #[must_use]
    pub fn estimate(&self) -> Option<f64> {
        let mut intervals: Vec<f64> = Vec::with_capacity(self.timestamps.len());
        for i in 1..self.timestamps.len() {
            intervals.push(self.timestamps[i - 1] - self.timestamps[i]);
        }
        median(&intervals)
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 != 0 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}
