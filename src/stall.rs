//! Buffer stall detection.
//!
//! Watches per-stream buffer throughput: when buffers stay pending longer
//! than the threshold without a single consumption, the stream is stalled.
//! The signal is edge-triggered: it raises once and does not raise again
//! until the stream has resumed consuming and then stalled anew. Recovery
//! is the caller's decision (flush, resync, or surface an error).
//!
//! All elapsed times are in the clock controller's scaled media time, so a
//! frozen or stopped clock never accumulates toward a stall.

use std::time::Duration;

use tracing::warn;

use crate::buffer::StreamKind;

/// Stall detection settings.
#[derive(Clone, Copy, Debug)]
pub struct StallConfig {
    /// How long a stream may hold pending buffers without consuming any
    /// before it is considered stalled.
    pub threshold: Duration,
    /// How often pending streams are evaluated.
    pub poll_interval: Duration,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct StreamWatch {
    /// Media time of the last consumption, or of the first submission of
    /// the current pending period.
    last_progress: Option<Duration>,
    /// Stall already raised for the current pending period.
    raised: bool,
}

/// Per-stream stall watchdog.
#[derive(Debug)]
pub struct StallDetector {
    threshold: Duration,
    streams: [StreamWatch; StreamKind::COUNT],
}

impl StallDetector {
    /// Create a detector with the given threshold.
    pub fn new(config: &StallConfig) -> Self {
        Self {
            threshold: config.threshold,
            streams: [StreamWatch::default(); StreamKind::COUNT],
        }
    }

    /// Note a buffer submission. Starts the pending period if the stream
    /// had no progress marker yet.
    pub fn record_submission(&mut self, stream: StreamKind, now: Duration) {
        let watch = &mut self.streams[stream.index()];
        if watch.last_progress.is_none() {
            watch.last_progress = Some(now);
        }
    }

    /// Note a successful consumption. Re-arms the detector for the stream.
    pub fn record_consumption(&mut self, stream: StreamKind, now: Duration) {
        let watch = &mut self.streams[stream.index()];
        watch.last_progress = Some(now);
        watch.raised = false;
    }

    /// Forget a stream's pending period (after a flush).
    pub fn reset(&mut self, stream: StreamKind) {
        self.streams[stream.index()] = StreamWatch::default();
    }

    /// Evaluate one stream.
    ///
    /// Returns true exactly once per stall: when `pending` buffers exist,
    /// nothing has been consumed for longer than the threshold, and the
    /// stall has not been raised yet.
    pub fn check(&mut self, stream: StreamKind, pending: usize, now: Duration) -> bool {
        let watch = &mut self.streams[stream.index()];
        if pending == 0 || watch.raised {
            return false;
        }
        let Some(last) = watch.last_progress else {
            return false;
        };
        if now.saturating_sub(last) < self.threshold {
            return false;
        }
        watch.raised = true;
        warn!(
            stream = %stream,
            pending,
            stalled_for_ms = now.saturating_sub(last).as_millis() as u64,
            "buffer stall detected"
        );
        true
    }
}
