//! Rate limiting for byte-progress reports.
//!
//! Upload progress arrives once per streamed chunk, which is far too
//! chatty for an event channel. The throttle forwards at most one
//! report per interval, except that attempt starts (0 bytes) and
//! completion always pass through.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default minimum gap between forwarded progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

pub struct ProgressThrottle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
    emit: Box<dyn Fn(u64, u64, u32) + Send + Sync>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration, emit: Box<dyn Fn(u64, u64, u32) + Send + Sync>) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
            emit,
        }
    }

    /// Forwards `(sent, total, attempt)` unless a report was already
    /// forwarded within the interval. Zero-byte reports (attempt
    /// start) and final reports (`sent >= total`) bypass the limit so
    /// consumers always see both edges.
    pub fn report(&self, sent: u64, total: u64, attempt: u32) {
        let force = sent == 0 || (total > 0 && sent >= total);
        {
            let mut last = self.last.lock().unwrap();
            let now = Instant::now();
            let due = last.map_or(true, |t| now.duration_since(t) >= self.interval);
            if !force && !due {
                return;
            }
            *last = Some(now);
        }
        (self.emit)(sent, total, attempt);
    }
}
