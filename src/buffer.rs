//! Media buffers and the free-pool bookkeeping.
//!
//! Buffers are allocated by the driver at init and owned by the pipeline's
//! free pool. Acquisition hands one to the playback layer, submission
//! transfers it to the driver, and the driver's completion event returns it
//! to the pool exactly once. The pool enforces the conservation invariant:
//! free + in-flight is constant for the pipeline's lifetime.

use std::collections::{HashSet, VecDeque};

use bytes::BytesMut;

use crate::time::{DriverTicks, MediaTicks};

// ============================================================================
// Stream kinds and flags
// ============================================================================

/// Which elementary stream a buffer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Encoded audio samples.
    Audio,
    /// Encoded video pictures.
    Video,
}

impl StreamKind {
    /// Number of stream kinds.
    pub const COUNT: usize = 2;

    /// Dense index for per-stream arrays.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            StreamKind::Audio => 0,
            StreamKind::Video => 1,
        }
    }

    /// Human-readable stream name.
    pub const fn as_str(self) -> &'static str {
        match self {
            StreamKind::Audio => "audio",
            StreamKind::Video => "video",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags indicating buffer properties.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// Buffer marks the end of the stream.
    pub eos: bool,
    /// Buffer carries codec configuration data rather than payload.
    pub codec_config: bool,
    /// Buffer starts a new timeline after a flush or speed change.
    pub discontinuity: bool,
    /// First timestamped buffer of a stream; anchors the clock.
    pub start_time: bool,
    /// Buffer has no meaningful timestamp.
    pub time_unknown: bool,
}

impl BufferFlags {
    /// Clear all flags.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// MediaBuffer
// ============================================================================

/// Identity of a buffer within its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct BufferId(u64);

impl BufferId {
    /// Create from a raw id.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A unit of encoded audio or video payload with presentation timing.
///
/// Created by the driver when the pipeline allocates its pools; identity
/// ([`BufferId`]) is stable for the pipeline's lifetime.
#[derive(Debug)]
pub struct MediaBuffer {
    id: BufferId,
    stream: StreamKind,
    /// Encoded payload bytes. Filled by the playback layer before submission.
    pub payload: BytesMut,
    ticks: DriverTicks,
    flags: BufferFlags,
}

impl MediaBuffer {
    /// Create a buffer with the given identity and payload capacity.
    ///
    /// Called by driver implementations when allocating a pool.
    pub fn new(id: BufferId, stream: StreamKind, capacity: usize) -> Self {
        Self {
            id,
            stream,
            payload: BytesMut::with_capacity(capacity),
            ticks: DriverTicks::UNKNOWN,
            flags: BufferFlags::default(),
        }
    }

    /// The buffer's pool identity.
    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// The stream this buffer belongs to.
    #[inline]
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Presentation timestamp in 90 kHz ticks.
    #[inline]
    pub fn pts(&self) -> MediaTicks {
        MediaTicks::from_driver(self.ticks)
    }

    /// Timestamp in the driver's representation.
    #[inline]
    pub fn driver_ticks(&self) -> DriverTicks {
        self.ticks
    }

    /// Attach a presentation timestamp, converting to the driver's
    /// representation. A NONE timestamp sets the `time_unknown` flag.
    pub fn set_pts(&mut self, pts: MediaTicks) {
        self.ticks = pts.to_driver();
        self.flags.time_unknown = pts.is_none();
    }

    /// Buffer flags.
    #[inline]
    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    /// Mutable access to the buffer flags.
    #[inline]
    pub fn flags_mut(&mut self) -> &mut BufferFlags {
        &mut self.flags
    }

    /// Reset payload, timestamp and flags for reuse from the free pool.
    pub fn reset(&mut self) {
        self.payload.clear();
        self.ticks = DriverTicks::UNKNOWN;
        self.flags.clear();
    }
}

// ============================================================================
// BufferPool
// ============================================================================

/// Snapshot of a pool's accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers charged into the pool at init.
    pub total: usize,
    /// Buffers currently in the free list.
    pub free: usize,
    /// Buffers handed out (to the playback layer or the driver).
    pub in_flight: usize,
}

/// Free-pool for one stream's buffers.
///
/// Tracks outstanding buffer ids so a double return is detected and
/// rejected rather than corrupting the accounting.
#[derive(Debug)]
pub struct BufferPool {
    stream: StreamKind,
    free: VecDeque<MediaBuffer>,
    outstanding: HashSet<BufferId>,
    total: usize,
}

impl BufferPool {
    /// Create an empty pool for a stream.
    pub fn new(stream: StreamKind) -> Self {
        Self {
            stream,
            free: VecDeque::new(),
            outstanding: HashSet::new(),
            total: 0,
        }
    }

    /// Charge driver-allocated buffers into the pool at init.
    pub fn charge(&mut self, buffers: impl IntoIterator<Item = MediaBuffer>) {
        for buf in buffers {
            debug_assert_eq!(buf.stream(), self.stream);
            self.total += 1;
            self.free.push_back(buf);
        }
    }

    /// The stream this pool serves.
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Take a buffer from the free list, marking it outstanding.
    ///
    /// Returns `None` when the pool is exhausted; callers poll and retry.
    pub fn take(&mut self) -> Option<MediaBuffer> {
        let buf = self.free.pop_front()?;
        self.outstanding.insert(buf.id());
        Some(buf)
    }

    /// Return a buffer to the free list.
    ///
    /// Rejects buffers that are not outstanding (double return or foreign
    /// buffer); the pool accounting stays intact and the buffer is dropped.
    pub fn put_back(&mut self, mut buf: MediaBuffer) -> Result<(), BufferId> {
        if !self.outstanding.remove(&buf.id()) {
            return Err(buf.id());
        }
        buf.reset();
        self.free.push_back(buf);
        Ok(())
    }

    /// Number of free buffers.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Number of outstanding buffers.
    pub fn in_flight(&self) -> usize {
        self.outstanding.len()
    }

    /// Total buffers charged at init.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Current accounting snapshot.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.total,
            free: self.free.len(),
            in_flight: self.outstanding.len(),
        }
    }

    /// Drain every free buffer for release back to the driver.
    ///
    /// Outstanding buffers are written off by the caller (forced teardown);
    /// the pool is left empty.
    pub fn drain_for_release(&mut self) -> Vec<MediaBuffer> {
        self.total = 0;
        self.outstanding.clear();
        self.free.drain(..).collect()
    }
}
