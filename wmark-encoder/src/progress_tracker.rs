//! Progress tracking with ETA estimation

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Thread-safe frame progress tracker for one compositing session
pub struct ProgressTracker {
    total: u64,
    processed: AtomicU64,
    start_time: Instant,
    label: String,
    report_interval: u64,
}

impl ProgressTracker {
    /// Creates a tracker expecting `total` frames.
    ///
    /// A `total` of zero means the frame count is unknown; progress is then
    /// reported without percentage or ETA.
    pub fn new(total: u64, label: &str, report_interval: u64) -> Self {
        Self {
            total,
            processed: AtomicU64::new(0),
            start_time: Instant::now(),
            label: label.to_string(),
            report_interval: report_interval.max(1),
        }
    }

    /// Interval that yields roughly ten reports over `total` frames
    pub fn interval_for(total: u64) -> u64 {
        (total / 10).max(1)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Counts one frame and logs progress every `report_interval` frames
    pub fn increment(&self) {
        let current = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if current % self.report_interval == 0 && current != self.total {
            self.report(current);
        }
    }

    /// Logs the final tally
    pub fn finish(&self) {
        let current = self.processed();
        info!(
            label = %self.label,
            frames = current,
            "Completed in {}",
            format_duration(self.elapsed().as_secs_f64())
        );
    }

    fn report(&self, current: u64) {
        let elapsed_secs = self.elapsed().as_secs_f64();
        match eta_secs(current, self.total, elapsed_secs) {
            Some(remaining) => {
                let percent = (current as f64 / self.total as f64) * 100.0;
                info!(
                    label = %self.label,
                    "{}/{} ({:.1}%) - elapsed: {} - ETA: {}",
                    current,
                    self.total,
                    percent,
                    format_duration(elapsed_secs),
                    format_duration(remaining),
                );
            }
            None => {
                info!(
                    label = %self.label,
                    "{} frames - elapsed: {}",
                    current,
                    format_duration(elapsed_secs),
                );
            }
        }
    }
}

/// Remaining seconds at the observed rate, if it can be estimated
fn eta_secs(current: u64, total: u64, elapsed_secs: f64) -> Option<f64> {
    if current == 0 || current >= total || elapsed_secs <= 0.0 {
        return None;
    }
    let rate = current as f64 / elapsed_secs;
    Some((total - current) as f64 / rate)
}

/// Formats seconds into a human-readable duration string
pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor() as u64;
        let remaining = secs - (mins as f64 * 60.0);
        format!("{}m {:.0}s", mins, remaining)
    } else {
        let hours = (secs / 3600.0).floor() as u64;
        let remaining = secs - (hours as f64 * 3600.0);
        let mins = (remaining / 60.0).floor() as u64;
        let remaining_secs = remaining - (mins as f64 * 60.0);
        format!("{}h {}m {:.0}s", hours, mins, remaining_secs)
    }
}
