use std::time::Instant;

use serde::Serialize;

/// Lifetime running brightness statistic for one camera.
///
/// This is a running mean over every sample ever recorded, not a window; it
/// smooths sensor noise without retaining history. At very large sample
/// counts the incremental update degrades in precision gracefully rather
/// than overflowing.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrightnessStat {
    pub latest_value: f64,
    /// Incrementally maintained running mean of all samples.
    pub avg: f64,
    pub samples: u64,
    /// Monotonic time of the last update, `None` before the first sample.
    pub timestamp: Option<Instant>,
}

impl BrightnessStat {
    pub fn update(&mut self, value: f64, now: Instant) {
        self.latest_value = value;
        self.timestamp = Some(now);
        self.samples = self.samples.saturating_add(1);
        // Welford-style incremental mean.
        self.avg += (value - self.avg) / self.samples as f64;
    }

    pub fn snapshot(&self, now: Instant) -> BrightnessSnapshot {
        BrightnessSnapshot {
            latest_value: self.latest_value,
            avg: self.avg,
            samples: self.samples,
            age_seconds: self
                .timestamp
                .map(|t| now.saturating_duration_since(t).as_secs_f64()),
        }
    }
}

/// Serializable view of a [BrightnessStat] for status reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BrightnessSnapshot {
    pub latest_value: f64,
    pub avg: f64,
    pub samples: u64,
    /// Seconds since the last sample, `None` if never sampled.
    pub age_seconds: Option<f64>,
}
