//! The Media Pipeline Driver boundary.
//!
//! Everything that actually creates hardware stages, moves bytes and paces
//! rendering sits behind [`PipelineDriver`]. The core never talks to
//! hardware directly; it issues driver calls and consumes [`DriverEvent`]s
//! delivered through an [`EventSink`] into its own serialization queue, so
//! driver callbacks never mutate core state from a foreign thread.

use std::time::Duration;

use crate::buffer::{MediaBuffer, StreamKind};
use crate::clock::{ClockReference, ClockState};
use crate::error::Result;
use crate::graph::{StageRole, TunnelRole};
use crate::time::{ClockScale, DriverTicks};

// ============================================================================
// Handles and status codes
// ============================================================================

/// Driver-assigned identity of a created stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct StageHandle(u64);

impl StageHandle {
    /// Create from a raw handle value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw handle value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Driver-assigned identity of a created tunnel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TunnelHandle(u64);

impl TunnelHandle {
    /// Create from a raw handle value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw handle value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Driver-specific status code carried by errors and error events.
///
/// Values mirror the hardware driver's numbering; [`as_str`](Self::as_str)
/// maps them to diagnostic strings for logs and surfaced errors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct DriverStatus(u32);

impl DriverStatus {
    /// Wrap a vendor status code.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw status code.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// No error.
    pub const NONE: Self = Self(0);
    /// The driver ran out of memory or hardware contexts.
    pub const INSUFFICIENT_RESOURCES: Self = Self(0x1000);
    /// Operation not valid in the stage's current state.
    pub const INVALID_STATE: Self = Self(0x1001);
    /// A parameter was malformed or out of range.
    pub const BAD_PARAMETER: Self = Self(0x1002);
    /// The hardware reported a fault.
    pub const HARDWARE: Self = Self(0x1003);
    /// A stage ran dry while rendering.
    pub const UNDERFLOW: Self = Self(0x1004);
    /// A stage received more data than it can queue.
    pub const OVERFLOW: Self = Self(0x1005);
    /// The bitstream was corrupt or unparseable.
    pub const STREAM_CORRUPT: Self = Self(0x1006);
    /// A tunnel endpoint port has no buffers.
    pub const PORT_UNPOPULATED: Self = Self(0x1007);
    /// The driver did not respond in time.
    pub const TIMEOUT: Self = Self(0x1008);

    /// Diagnostic string for this status code.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NONE => "none",
            Self::INSUFFICIENT_RESOURCES => "insufficient resources",
            Self::INVALID_STATE => "invalid state",
            Self::BAD_PARAMETER => "bad parameter",
            Self::HARDWARE => "hardware fault",
            Self::UNDERFLOW => "underflow",
            Self::OVERFLOW => "overflow",
            Self::STREAM_CORRUPT => "stream corrupt",
            Self::PORT_UNPOPULATED => "port unpopulated",
            Self::TIMEOUT => "timeout",
            _ => "unknown error",
        }
    }
}

impl std::fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:x})", self.as_str(), self.0)
    }
}

// ============================================================================
// Formats and configuration
// ============================================================================

/// Video format reported by the decoder's output port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortFormat {
    /// Picture width in pixels.
    pub width: u32,
    /// Picture height in pixels.
    pub height: u32,
    /// Frames (or fields, when interlaced) per second.
    pub frame_rate: u32,
    /// Whether the stream is interlaced.
    pub interlaced: bool,
}

impl std::fmt::Display for PortFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}@{}{}",
            self.width,
            self.height,
            self.frame_rate,
            if self.interlaced { "i" } else { "p" }
        )
    }
}

/// Destination rectangle for the video render stage, in display pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderRegion {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Typed per-stage configuration pushed through the driver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StageConfig {
    /// Clock stage: state machine transition.
    ClockState(ClockState),
    /// Clock stage: rate multiplier.
    ClockScale(ClockScale),
    /// Clock stage: which stream's timestamps are authoritative.
    ClockReference(ClockReference),
    /// Clock stage: reference timestamp for a waiting stream.
    ReferenceTime {
        /// The stream reporting its first timestamp.
        stream: StreamKind,
        /// The timestamp in driver representation.
        ticks: DriverTicks,
    },
    /// Clock stage: rendering latency target for live playback.
    LatencyTarget(DriverTicks),
    /// Decoder stage: how long a port may sit on unconsumed buffers
    /// before the driver flags a stall.
    StallThreshold(Duration),
    /// Render stage: destination rectangle on the display.
    RenderRegion(RenderRegion),
    /// Audio render stage: mute without tearing the stream down.
    Mute(bool),
}

// ============================================================================
// Events
// ============================================================================

/// Asynchronous event delivered by the driver.
///
/// Each event carries the handle of the originating stage.
#[derive(Debug)]
pub enum DriverEvent {
    /// A submitted buffer has been consumed and is returned to the core.
    BufferReturned {
        /// The stage that consumed the buffer.
        stage: StageHandle,
        /// The buffer, ownership transferred back to the core.
        buffer: MediaBuffer,
    },
    /// A decoder output port renegotiated its format.
    PortSettingsChanged {
        /// The stage whose port changed.
        stage: StageHandle,
        /// The new output format.
        format: PortFormat,
    },
    /// The last buffer of a stream has left the render stage.
    EndOfStream {
        /// The stage that reached end of stream.
        stage: StageHandle,
    },
    /// A stage reported an error.
    StageError {
        /// The failing stage.
        stage: StageHandle,
        /// Driver status code, mapped to a diagnostic string by the core.
        status: DriverStatus,
    },
}

/// Message on the serialization queue: driver events interleaved with the
/// core's own control traffic, drained in arrival order by one worker.
#[derive(Debug)]
pub(crate) enum SinkMessage {
    /// An event delivered by the driver.
    Event(DriverEvent),
    /// Periodic stall-evaluation tick.
    Tick,
    /// Stop the worker.
    Shutdown,
}

/// Handle the driver uses to deliver events into the core's queue.
///
/// Cheap to clone; safe to call from any driver thread. Delivery never
/// blocks the driver.
#[derive(Clone)]
pub struct EventSink {
    tx: kanal::Sender<SinkMessage>,
}

impl EventSink {
    pub(crate) fn new(tx: kanal::Sender<SinkMessage>) -> Self {
        Self { tx }
    }

    /// Deliver one event. Returns false if the core has shut down.
    pub fn deliver(&self, event: DriverEvent) -> bool {
        self.tx.send(SinkMessage::Event(event)).is_ok()
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

// ============================================================================
// Submission
// ============================================================================

/// A rejected buffer submission.
///
/// Carries the buffer back to the caller so pool conservation holds even
/// when the driver refuses the transfer.
#[derive(Debug)]
pub struct SubmitError {
    /// The buffer, ownership returned to the caller.
    pub buffer: MediaBuffer,
    /// Why the driver refused it.
    pub status: DriverStatus,
}

// ============================================================================
// Driver trait
// ============================================================================

/// Primitives of the hardware media pipeline.
///
/// Implementations wrap the vendor driver; tests use a scripted fake. All
/// methods are called from the core's threads and must be thread-safe.
/// Buffer completion, port renegotiation, end-of-stream and errors are
/// reported through the [`EventSink`] installed with
/// [`set_event_sink`](Self::set_event_sink), never via direct callback.
///
/// # Flush contract
///
/// [`flush_stage`](Self::flush_stage) must return every buffer the stage
/// still holds through `DriverEvent::BufferReturned` before or shortly
/// after returning; the core's teardown drain relies on this.
pub trait PipelineDriver: Send + Sync {
    /// Create the hardware stage for a role.
    fn create_stage(&self, role: StageRole) -> Result<StageHandle>;

    /// Destroy a stage. The stage must have no live tunnels.
    fn destroy_stage(&self, stage: StageHandle) -> Result<()>;

    /// Create a tunnel between two existing stages.
    fn create_tunnel(
        &self,
        role: TunnelRole,
        upstream: StageHandle,
        downstream: StageHandle,
    ) -> Result<TunnelHandle>;

    /// Destroy a tunnel.
    fn destroy_tunnel(&self, tunnel: TunnelHandle) -> Result<()>;

    /// Renegotiate a tunnel to a new port format.
    fn reconfigure_tunnel(&self, tunnel: TunnelHandle, format: &PortFormat) -> Result<()>;

    /// Enable or disable a stage.
    fn set_stage_enabled(&self, stage: StageHandle, enabled: bool) -> Result<()>;

    /// Allocate `count` input buffers of `capacity` bytes on a stage.
    ///
    /// Ownership of the returned buffers passes to the core's free pool.
    fn allocate_buffers(
        &self,
        stage: StageHandle,
        stream: StreamKind,
        count: usize,
        capacity: usize,
    ) -> Result<Vec<MediaBuffer>>;

    /// Release pool buffers back to the driver at teardown.
    fn release_buffers(&self, stage: StageHandle, buffers: Vec<MediaBuffer>) -> Result<()>;

    /// Transfer a filled buffer to a stage for consumption.
    ///
    /// On success the buffer comes back later as a
    /// [`DriverEvent::BufferReturned`]; on failure it is handed straight
    /// back in the [`SubmitError`].
    fn submit_buffer(
        &self,
        stage: StageHandle,
        buffer: MediaBuffer,
    ) -> std::result::Result<(), SubmitError>;

    /// Drop all buffers a stage has queued, returning them via events.
    fn flush_stage(&self, stage: StageHandle) -> Result<()>;

    /// Apply a typed configuration to a stage.
    fn configure(&self, stage: StageHandle, config: StageConfig) -> Result<()>;

    /// Install the sink the driver delivers events through.
    fn set_event_sink(&self, sink: EventSink);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(DriverStatus::NONE.as_str(), "none");
        assert_eq!(DriverStatus::HARDWARE.as_str(), "hardware fault");
        assert_eq!(DriverStatus(0xdead).as_str(), "unknown error");
        assert_eq!(
            format!("{}", DriverStatus::UNDERFLOW),
            "underflow (0x1004)"
        );
    }

    #[test]
    fn test_port_format_display() {
        let fmt = PortFormat { width: 1920, height: 1080, frame_rate: 50, interlaced: true };
        assert_eq!(format!("{}", fmt), "1920x1080@50i");
    }

    #[test]
    fn test_event_sink_delivery() {
        let (tx, rx) = kanal::unbounded();
        let sink = EventSink::new(tx);

        assert!(sink.deliver(DriverEvent::EndOfStream { stage: StageHandle::new(1) }));
        match rx.recv().unwrap() {
            SinkMessage::Event(DriverEvent::EndOfStream { stage }) => {
                assert_eq!(stage.raw(), 1);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        drop(rx);
        assert!(!sink.deliver(DriverEvent::EndOfStream { stage: StageHandle::new(1) }));
    }
}
