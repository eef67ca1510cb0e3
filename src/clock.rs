//! The system time clock (STC) controller.
//!
//! The STC is kept in software as an anchored integration over the
//! monotonic clock: an anchor instant plus the tick value at that anchor,
//! advanced by scaled elapsed time while the clock is running. Every scale
//! change re-anchors the integration so already-elapsed time is never
//! re-scaled; the value is therefore non-decreasing for any sequence of
//! supported scales. Every state, scale and reference change is mirrored to
//! the driver's clock stage so the hardware paces rendering identically.
//!
//! # State Machine
//!
//! ```text
//! Stopped --start(v, a)--> WaitForVideo | WaitForAudio | WaitForAudioVideo
//!                          (both flags false: straight to Running)
//!
//! WaitFor* --set_current_reference_time for every awaited stream--> Running
//!
//! any state --stop()--> Stopped
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::buffer::StreamKind;
use crate::driver::{PipelineDriver, StageConfig, StageHandle};
use crate::error::{Error, Result};
use crate::observability::record_clock_scale;
use crate::time::{ClockScale, DriverTicks, MediaTicks};

// ============================================================================
// States and references
// ============================================================================

/// State of the system time clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockState {
    /// Clock is not running; the STC holds its last value.
    Stopped,
    /// Clock advances (unless the scale is zero).
    Running,
    /// Armed, waiting for the first timestamped video buffer.
    WaitForVideo,
    /// Armed, waiting for the first timestamped audio buffer.
    WaitForAudio,
    /// Armed, waiting for the first timestamped buffer of both streams.
    WaitForAudioVideo,
}

impl ClockState {
    /// Whether this is one of the armed, waiting states.
    pub const fn is_waiting(self) -> bool {
        matches!(
            self,
            ClockState::WaitForVideo | ClockState::WaitForAudio | ClockState::WaitForAudioVideo
        )
    }

    /// Human-readable state name.
    pub const fn as_str(self) -> &'static str {
        match self {
            ClockState::Stopped => "stopped",
            ClockState::Running => "running",
            ClockState::WaitForVideo => "wait-for-video",
            ClockState::WaitForAudio => "wait-for-audio",
            ClockState::WaitForAudioVideo => "wait-for-audio-video",
        }
    }
}

impl std::fmt::Display for ClockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stream's timestamps anchor the clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockReference {
    /// Audio timestamps are authoritative.
    Audio,
    /// Video timestamps are authoritative.
    Video,
    /// No reference stream selected.
    None,
}

impl ClockReference {
    /// The stream kind this reference selects, if any.
    pub const fn stream(self) -> Option<StreamKind> {
        match self {
            ClockReference::Audio => Some(StreamKind::Audio),
            ClockReference::Video => Some(StreamKind::Video),
            ClockReference::None => None,
        }
    }

    /// Human-readable reference name.
    pub const fn as_str(self) -> &'static str {
        match self {
            ClockReference::Audio => "audio",
            ClockReference::Video => "video",
            ClockReference::None => "none",
        }
    }
}

impl std::fmt::Display for ClockReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ClockController
// ============================================================================

struct ClockInner {
    state: ClockState,
    reference: ClockReference,
    scale: ClockScale,
    wait_video: bool,
    wait_audio: bool,
    /// First valid PTS seen per stream since the last start.
    first_pts: [MediaTicks; StreamKind::COUNT],
    /// Integration anchor; None while the clock does not advance.
    anchor: Option<Instant>,
    /// STC value at the anchor (and the held value while not advancing).
    anchor_stc: MediaTicks,
    /// Scaled elapsed nanoseconds accumulated across past run segments.
    media_accum_ns: u64,
    /// Start of the current run segment for media time.
    media_anchor: Option<Instant>,
}

impl ClockInner {
    fn stc(&self) -> MediaTicks {
        match self.anchor {
            Some(t0) if self.state == ClockState::Running && !self.scale.is_zero() => {
                let elapsed_ticks = (t0.elapsed().as_nanos() as u64).saturating_mul(9) / 100_000;
                self.anchor_stc
                    .saturating_add(MediaTicks::from_ticks(self.scale.apply(elapsed_ticks)))
            }
            _ => self.anchor_stc,
        }
    }

    fn media_elapsed_ns(&self) -> u64 {
        let mut ns = self.media_accum_ns;
        if let Some(t0) = self.media_anchor {
            if self.state == ClockState::Running && !self.scale.is_zero() {
                ns += self.scale.apply(t0.elapsed().as_nanos() as u64);
            }
        }
        ns
    }

    /// Fold the current segment into the held values and restart
    /// integration from now. Called before every scale change.
    fn re_anchor(&mut self) {
        self.anchor_stc = self.stc();
        self.media_accum_ns = self.media_elapsed_ns();
        let now = Instant::now();
        if self.anchor.is_some() {
            self.anchor = Some(now);
        }
        if self.media_anchor.is_some() {
            self.media_anchor = Some(now);
        }
    }
}

/// Owner of the STC state machine, clock reference and clock scale.
///
/// Constructed by the pipeline at init with the driver's clock stage;
/// shared with the trick-speed coordinator for scale application.
pub struct ClockController {
    driver: Arc<dyn PipelineDriver>,
    stage: StageHandle,
    inner: Mutex<ClockInner>,
}

impl ClockController {
    /// Create a controller for the given clock stage.
    pub fn new(driver: Arc<dyn PipelineDriver>, stage: StageHandle) -> Self {
        Self {
            driver,
            stage,
            inner: Mutex::new(ClockInner {
                state: ClockState::Stopped,
                reference: ClockReference::None,
                scale: ClockScale::NORMAL,
                wait_video: false,
                wait_audio: false,
                first_pts: [MediaTicks::NONE; StreamKind::COUNT],
                anchor: None,
                anchor_stc: MediaTicks::ZERO,
                media_accum_ns: 0,
                media_anchor: None,
            }),
        }
    }

    /// Start the clock.
    ///
    /// With neither wait flag the clock runs immediately; otherwise it arms
    /// in the matching `WaitFor*` state and transitions to `Running` when
    /// [`set_current_reference_time`](Self::set_current_reference_time) has
    /// reported the first timestamped buffer of every awaited stream.
    pub fn start(&self, wait_for_video: bool, wait_for_audio: bool) -> Result<()> {
        let target = match (wait_for_video, wait_for_audio) {
            (false, false) => ClockState::Running,
            (true, false) => ClockState::WaitForVideo,
            (false, true) => ClockState::WaitForAudio,
            (true, true) => ClockState::WaitForAudioVideo,
        };
        self.driver
            .configure(self.stage, StageConfig::ClockState(target))?;

        let mut inner = self.inner.lock().unwrap();
        let from = inner.state;
        inner.state = target;
        inner.wait_video = wait_for_video;
        inner.wait_audio = wait_for_audio;
        inner.first_pts = [MediaTicks::NONE; StreamKind::COUNT];
        inner.anchor_stc = MediaTicks::ZERO;
        inner.media_accum_ns = 0;
        let now = Instant::now();
        if target == ClockState::Running {
            inner.anchor = Some(now);
            inner.media_anchor = Some(now);
        } else {
            inner.anchor = None;
            inner.media_anchor = None;
        }
        info!(from = %from, to = %target, "clock started");
        Ok(())
    }

    /// Stop the clock from any state. The STC holds its last value until
    /// the next start resets it.
    pub fn stop(&self) -> Result<()> {
        self.driver
            .configure(self.stage, StageConfig::ClockState(ClockState::Stopped))?;

        let mut inner = self.inner.lock().unwrap();
        inner.anchor_stc = inner.stc();
        inner.media_accum_ns = inner.media_elapsed_ns();
        inner.anchor = None;
        inner.media_anchor = None;
        let from = inner.state;
        inner.state = ClockState::Stopped;
        inner.wait_video = false;
        inner.wait_audio = false;
        info!(from = %from, "clock stopped");
        Ok(())
    }

    /// Select which stream's timestamps are authoritative.
    pub fn set_reference(&self, reference: ClockReference) -> Result<()> {
        self.driver
            .configure(self.stage, StageConfig::ClockReference(reference))?;
        let mut inner = self.inner.lock().unwrap();
        if inner.reference != reference {
            debug!(reference = %reference, "clock reference changed");
            inner.reference = reference;
        }
        Ok(())
    }

    /// Apply a rate multiplier to the clock.
    ///
    /// A scale outside the supported range is rejected and the previous
    /// scale retained. Scale zero freezes the STC while the state remains
    /// `Running`.
    pub fn set_scale(&self, scale: ClockScale) -> Result<()> {
        if !scale.is_supported() {
            warn!(scale = %scale, "rejecting unsupported clock scale");
            return Err(Error::ScaleOutOfRange(scale));
        }
        self.driver
            .configure(self.stage, StageConfig::ClockScale(scale))?;

        let mut inner = self.inner.lock().unwrap();
        if inner.scale != scale {
            inner.re_anchor();
            debug!(from = %inner.scale, to = %scale, "clock scale changed");
            inner.scale = scale;
            record_clock_scale(scale);
        }
        Ok(())
    }

    /// Report the first (or any) valid timestamp of a stream.
    ///
    /// Releases the matching `WaitFor*` wait; once every awaited stream has
    /// reported, the clock transitions to `Running` with the STC anchored
    /// at the reference stream's timestamp.
    pub fn set_current_reference_time(&self, stream: StreamKind, pts: MediaTicks) -> Result<()> {
        if pts.is_none() {
            return Ok(());
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.first_pts[stream.index()].is_none() {
            inner.first_pts[stream.index()] = pts;
        }

        if let Err(err) = self.driver.configure(
            self.stage,
            StageConfig::ReferenceTime { stream, ticks: pts.to_driver() },
        ) {
            warn!(stream = %stream, error = %err, "driver refused reference time");
        }

        if !inner.state.is_waiting() {
            return Ok(());
        }

        match stream {
            StreamKind::Video => inner.wait_video = false,
            StreamKind::Audio => inner.wait_audio = false,
        }

        if inner.wait_video || inner.wait_audio {
            inner.state = if inner.wait_video {
                ClockState::WaitForVideo
            } else {
                ClockState::WaitForAudio
            };
            return Ok(());
        }

        // All awaited streams have reported: run, anchored at the
        // reference stream's first timestamp when it is known.
        let anchor_pts = inner
            .reference
            .stream()
            .map(|s| inner.first_pts[s.index()])
            .filter(|t| t.is_some())
            .unwrap_or(pts);

        let now = Instant::now();
        inner.state = ClockState::Running;
        inner.anchor = Some(now);
        inner.anchor_stc = anchor_pts;
        inner.media_anchor = Some(now);
        info!(stream = %stream, pts = %anchor_pts, "clock running");
        Ok(())
    }

    /// Push the live-rendering latency target to the driver clock stage.
    pub fn set_latency_target(&self, target: DriverTicks) -> Result<()> {
        self.driver
            .configure(self.stage, StageConfig::LatencyTarget(target))
    }

    /// Current clock state.
    pub fn state(&self) -> ClockState {
        self.inner.lock().unwrap().state
    }

    /// Current clock reference.
    pub fn reference(&self) -> ClockReference {
        self.inner.lock().unwrap().reference
    }

    /// Current clock scale.
    pub fn scale(&self) -> ClockScale {
        self.inner.lock().unwrap().scale
    }

    /// Whether the clock is frozen (scale zero) without being stopped.
    pub fn is_frozen(&self) -> bool {
        self.inner.lock().unwrap().scale.is_zero()
    }

    /// Whether the clock is in the `Running` state.
    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().state == ClockState::Running
    }

    /// Current STC value.
    ///
    /// Non-decreasing while `Running` with a positive scale; constant while
    /// `Stopped`, waiting, or frozen.
    pub fn stc(&self) -> MediaTicks {
        self.inner.lock().unwrap().stc()
    }

    /// Scaled elapsed time since the last start.
    ///
    /// Pauses while the clock is stopped, waiting or frozen; used by the
    /// stall detector so a frozen pipeline never counts toward a stall.
    pub fn media_time(&self) -> Duration {
        Duration::from_nanos(self.inner.lock().unwrap().media_elapsed_ns())
    }
}
