//! Metrics instrumentation.
//!
//! The core records counters and gauges via `metrics-rs`; wire up an
//! exporter (prometheus, statsd, ...) in the embedding process to collect
//! them.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `lockstep_buffers_submitted` | Counter | Buffers handed to the driver |
//! | `lockstep_buffers_returned` | Counter | Buffers returned by the driver |
//! | `lockstep_buffers_lost` | Counter | Buffers written off at forced teardown |
//! | `lockstep_flushes` | Counter | Stream flushes |
//! | `lockstep_stalls` | Counter | Buffer stalls raised |
//! | `lockstep_pool_free` | Gauge | Free buffers per stream pool |
//! | `lockstep_clock_scale` | Gauge | Current clock scale multiplier |

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{Unit, counter, gauge};

use crate::buffer::StreamKind;
use crate::time::ClockScale;

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const BUFFERS_SUBMITTED: &str = "lockstep_buffers_submitted";
const BUFFERS_RETURNED: &str = "lockstep_buffers_returned";
const BUFFERS_LOST: &str = "lockstep_buffers_lost";
const FLUSHES: &str = "lockstep_flushes";
const STALLS: &str = "lockstep_stalls";
const POOL_FREE: &str = "lockstep_pool_free";
const CLOCK_SCALE: &str = "lockstep_clock_scale";

/// Initialize metric descriptions.
///
/// Called by pipeline init; safe to call multiple times (subsequent calls
/// are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        BUFFERS_SUBMITTED,
        Unit::Count,
        "Buffers handed to the driver"
    );
    metrics::describe_counter!(
        BUFFERS_RETURNED,
        Unit::Count,
        "Buffers returned to the free pool by the driver"
    );
    metrics::describe_counter!(
        BUFFERS_LOST,
        Unit::Count,
        "Buffers written off at forced teardown"
    );
    metrics::describe_counter!(FLUSHES, Unit::Count, "Stream flushes");
    metrics::describe_counter!(STALLS, Unit::Count, "Buffer stalls raised");
    metrics::describe_gauge!(POOL_FREE, Unit::Count, "Free buffers per stream pool");
    metrics::describe_gauge!(CLOCK_SCALE, Unit::Count, "Current clock scale multiplier");
}

/// Record a buffer submission.
#[inline]
pub fn record_buffer_submitted(stream: StreamKind) {
    counter!(BUFFERS_SUBMITTED, "stream" => stream.as_str()).increment(1);
}

/// Record a buffer completion.
#[inline]
pub fn record_buffer_returned(stream: StreamKind) {
    counter!(BUFFERS_RETURNED, "stream" => stream.as_str()).increment(1);
}

/// Record buffers written off at forced teardown.
#[inline]
pub fn record_buffers_lost(count: usize) {
    counter!(BUFFERS_LOST).increment(count as u64);
}

/// Record a stream flush.
#[inline]
pub fn record_flush(stream: StreamKind) {
    counter!(FLUSHES, "stream" => stream.as_str()).increment(1);
}

/// Record a raised buffer stall.
#[inline]
pub fn record_stall(stream: StreamKind) {
    counter!(STALLS, "stream" => stream.as_str()).increment(1);
}

/// Record the free-pool level of a stream.
#[inline]
pub fn record_pool_free(stream: StreamKind, free: usize) {
    gauge!(POOL_FREE, "stream" => stream.as_str()).set(free as f64);
}

/// Record the applied clock scale.
#[inline]
pub fn record_clock_scale(scale: ClockScale) {
    gauge!(CLOCK_SCALE).set(scale.as_f64());
}
