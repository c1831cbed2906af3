//! Progress accounting and client-facing rate limiting.

mod format;
mod log;
mod reporter;

use std::time::{Duration, Instant};

pub use self::format::{format_bytes, format_duration};
pub use self::log::{OperationLog, SharedLog};
pub use self::reporter::{ProgressEvent, ProgressSender, ReporterSettings, TaskReporter};

/// File and byte counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub files: u64,
    pub bytes: u64,
}

impl Counts {
    pub fn new(files: u64, bytes: u64) -> Self {
        Self { files, bytes }
    }
}

/// Relative weight of file count and byte count in percent-done.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub files: f64,
    pub bytes: f64,
}

impl Weights {
    pub const BACKUP: Weights = Weights { files: 1.0, bytes: 1.0 };
    /// Restores write many small files; count completion dominates.
    pub const RESTORE: Weights = Weights { files: 4.0, bytes: 1.0 };
}

impl Default for Weights {
    fn default() -> Self {
        Self::BACKUP
    }
}

/// Weighted completion ratio in `[0, 1]`. Zero when nothing is known yet.
pub fn percent_done(total: Counts, done: Counts, weights: Weights) -> f64 {
    let denominator = total.files as f64 * weights.files + total.bytes as f64 * weights.bytes;
    if denominator <= 0.0 {
        return 0.0;
    }
    let numerator = done.files as f64 * weights.files + done.bytes as f64 * weights.bytes;
    (numerator / denominator).clamp(0.0, 1.0)
}

/// Linear extrapolation of the time still needed from bytes processed so far.
pub fn seconds_remaining(elapsed: Duration, total_bytes: u64, done_bytes: u64) -> u64 {
    if done_bytes == 0 || total_bytes <= done_bytes {
        return 0;
    }
    let rate = done_bytes as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    ((total_bytes - done_bytes) as f64 / rate).round() as u64
}

/// Suppresses non-forced messages sent within `min_pause` of the previous
/// emission. Forced messages always pass and restart the pause.
#[derive(Debug, Clone)]
pub struct Throttle {
    min_pause: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(min_pause: Duration) -> Self {
        Self {
            min_pause,
            last: None,
        }
    }

    pub fn allow(&mut self, force: bool) -> bool {
        self.allow_at(Instant::now(), force)
    }

    pub fn allow_at(&mut self, now: Instant, force: bool) -> bool {
        if !force {
            if let Some(last) = self.last {
                if now.saturating_duration_since(last) < self.min_pause {
                    return false;
                }
            }
        }
        self.last = Some(now);
        true
    }
}
