//! Trick-speed and live-sync coordination.
//!
//! The device-facing state machine on top of the clock controller and the
//! pipeline manager. Discrete speed/direction requests look up a fixed
//! (clock-scale, audio-mute) table and run the speed-change protocol:
//! exactly one flush per actual change, PTS trackers reset, scale and mute
//! applied. Live playback drift is corrected by a hysteresis controller
//! that nudges the clock scale a few per-mille at a time, never jumping
//! more than one correction level per evaluation.
//!
//! Backward playback is an approximation: there is no reverse-decode path,
//! so backward entries carry the same scale magnitudes with audio muted
//! and the clock never runs backwards.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::buffer::StreamKind;
use crate::error::Result;
use crate::manager::PipelineManager;
use crate::time::{ClockScale, MediaTicks};

// ============================================================================
// Speed ladder
// ============================================================================

/// Playback direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Normal playback direction.
    Forward,
    /// Reverse playback (approximated; see module docs).
    Backward,
}

impl Direction {
    /// Dense index for table lookup.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Backward => 1,
        }
    }

    /// Human-readable direction name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete playback speed level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpeedLevel {
    /// Frozen picture (clock scale zero).
    Pause,
    /// 1/8 speed.
    Slowest,
    /// 1/4 speed.
    Slower,
    /// 1/2 speed.
    Slow,
    /// Real time.
    Normal,
    /// 2x speed.
    Fast,
    /// 4x speed.
    Faster,
    /// 12x speed.
    Fastest,
}

impl SpeedLevel {
    /// Number of speed levels.
    pub const COUNT: usize = 8;

    /// All levels, slowest first.
    pub const ALL: [SpeedLevel; Self::COUNT] = [
        SpeedLevel::Pause,
        SpeedLevel::Slowest,
        SpeedLevel::Slower,
        SpeedLevel::Slow,
        SpeedLevel::Normal,
        SpeedLevel::Fast,
        SpeedLevel::Faster,
        SpeedLevel::Fastest,
    ];

    /// Dense index for table lookup.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            SpeedLevel::Pause => 0,
            SpeedLevel::Slowest => 1,
            SpeedLevel::Slower => 2,
            SpeedLevel::Slow => 3,
            SpeedLevel::Normal => 4,
            SpeedLevel::Fast => 5,
            SpeedLevel::Faster => 6,
            SpeedLevel::Fastest => 7,
        }
    }

    /// Human-readable level name.
    pub const fn as_str(self) -> &'static str {
        match self {
            SpeedLevel::Pause => "pause",
            SpeedLevel::Slowest => "slowest",
            SpeedLevel::Slower => "slower",
            SpeedLevel::Slow => "slow",
            SpeedLevel::Normal => "normal",
            SpeedLevel::Fast => "fast",
            SpeedLevel::Faster => "faster",
            SpeedLevel::Fastest => "fastest",
        }
    }
}

impl std::fmt::Display for SpeedLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (direction, level) playback state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpeedState {
    /// Playback direction.
    pub direction: Direction,
    /// Speed level.
    pub level: SpeedLevel,
}

impl SpeedState {
    /// Normal forward playback.
    pub const fn normal() -> Self {
        Self { direction: Direction::Forward, level: SpeedLevel::Normal }
    }

    /// Construct a state.
    pub const fn new(direction: Direction, level: SpeedLevel) -> Self {
        Self { direction, level }
    }
}

impl Default for SpeedState {
    fn default() -> Self {
        Self::normal()
    }
}

impl std::fmt::Display for SpeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.direction, self.level)
    }
}

/// One row of the speed table.
#[derive(Clone, Copy, Debug)]
pub struct SpeedEntry {
    /// The state this entry applies to.
    pub state: SpeedState,
    /// Clock scale to apply (a magnitude; never negative).
    pub scale: ClockScale,
    /// Whether audio is muted in this state.
    pub mute_audio: bool,
}

const fn entry(direction: Direction, level: SpeedLevel, permille: i32) -> SpeedEntry {
    SpeedEntry {
        state: SpeedState::new(direction, level),
        scale: ClockScale::from_permille(permille),
        // Audio plays only at normal forward speed.
        mute_audio: !matches!((direction, level), (Direction::Forward, SpeedLevel::Normal)),
    }
}

const fn direction_row(direction: Direction) -> [SpeedEntry; SpeedLevel::COUNT] {
    [
        entry(direction, SpeedLevel::Pause, 0),
        entry(direction, SpeedLevel::Slowest, 125),
        entry(direction, SpeedLevel::Slower, 250),
        entry(direction, SpeedLevel::Slow, 500),
        entry(direction, SpeedLevel::Normal, 1000),
        entry(direction, SpeedLevel::Fast, 2000),
        entry(direction, SpeedLevel::Faster, 4000),
        entry(direction, SpeedLevel::Fastest, 12_000),
    ]
}

/// The full speed ladder: 8 levels x 2 directions.
///
/// Indexed by `direction.index() * SpeedLevel::COUNT + level.index()`;
/// validated exhaustively in tests.
pub const SPEED_TABLE: [SpeedEntry; 2 * SpeedLevel::COUNT] = {
    let forward = direction_row(Direction::Forward);
    let backward = direction_row(Direction::Backward);
    [
        forward[0], forward[1], forward[2], forward[3], forward[4], forward[5], forward[6],
        forward[7], backward[0], backward[1], backward[2], backward[3], backward[4], backward[5],
        backward[6], backward[7],
    ]
};

/// Look up the table entry for a state.
pub fn speed_entry(state: SpeedState) -> &'static SpeedEntry {
    &SPEED_TABLE[state.direction.index() * SpeedLevel::COUNT + state.level.index()]
}

// ============================================================================
// Live correction
// ============================================================================

/// Live-sync correction level, derived from measured PTS drift.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LiveCorrection {
    /// Strong slow-down.
    MaxNegative,
    /// Gentle slow-down.
    Negative,
    /// No correction.
    None,
    /// Gentle speed-up.
    Positive,
    /// Strong speed-up.
    MaxPositive,
}

impl LiveCorrection {
    /// The per-mille clock scale this level applies.
    pub const fn scale(self) -> ClockScale {
        match self {
            LiveCorrection::MaxNegative => ClockScale::from_permille(995),
            LiveCorrection::Negative => ClockScale::from_permille(998),
            LiveCorrection::None => ClockScale::from_permille(1000),
            LiveCorrection::Positive => ClockScale::from_permille(1002),
            LiveCorrection::MaxPositive => ClockScale::from_permille(1005),
        }
    }

    const fn rank(self) -> i8 {
        match self {
            LiveCorrection::MaxNegative => -2,
            LiveCorrection::Negative => -1,
            LiveCorrection::None => 0,
            LiveCorrection::Positive => 1,
            LiveCorrection::MaxPositive => 2,
        }
    }

    const fn from_rank(rank: i8) -> Self {
        match rank {
            i8::MIN..=-2 => LiveCorrection::MaxNegative,
            -1 => LiveCorrection::Negative,
            0 => LiveCorrection::None,
            1 => LiveCorrection::Positive,
            _ => LiveCorrection::MaxPositive,
        }
    }

    /// Move one level toward `target`. Hysteresis: never jumps further,
    /// however far away the target is.
    pub const fn step_toward(self, target: Self) -> Self {
        let delta = target.rank() - self.rank();
        Self::from_rank(self.rank() + delta.signum())
    }

    /// Human-readable level name.
    pub const fn as_str(self) -> &'static str {
        match self {
            LiveCorrection::MaxNegative => "max negative",
            LiveCorrection::Negative => "negative",
            LiveCorrection::None => "none",
            LiveCorrection::Positive => "positive",
            LiveCorrection::MaxPositive => "max positive",
        }
    }
}

impl std::fmt::Display for LiveCorrection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live-sync tuning.
#[derive(Clone, Copy, Debug)]
pub struct LiveSyncConfig {
    /// Buffered latency the controller steers toward: how far video PTS
    /// should run ahead of the STC.
    pub target_latency: MediaTicks,
    /// Drift inside this band needs no correction.
    pub tolerance: MediaTicks,
    /// How often [`TrickPlay::adjust_live_speed`] is expected to be
    /// invoked. Informational; the caller owns the schedule.
    pub interval: Duration,
}

impl Default for LiveSyncConfig {
    fn default() -> Self {
        Self {
            target_latency: MediaTicks::from_millis(200),
            tolerance: MediaTicks::from_millis(50),
            interval: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// Direction inference
// ============================================================================

/// Infers play direction from the sign of successive PTS deltas.
///
/// Two consistent observations flip the verdict; a single out-of-order
/// timestamp does not.
#[derive(Debug)]
struct PtsTracker {
    last: MediaTicks,
    bias: i8,
}

impl PtsTracker {
    fn new() -> Self {
        Self { last: MediaTicks::NONE, bias: 0 }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn observe(&mut self, pts: MediaTicks) -> Option<Direction> {
        if pts.is_none() {
            return self.verdict();
        }
        if self.last.is_some() && pts != self.last {
            if pts > self.last {
                self.bias = (self.bias + 1).min(2);
            } else {
                self.bias = (self.bias - 1).max(-2);
            }
        }
        self.last = pts;
        self.verdict()
    }

    fn verdict(&self) -> Option<Direction> {
        match self.bias {
            2 => Some(Direction::Forward),
            -2 => Some(Direction::Backward),
            _ => None,
        }
    }
}

// ============================================================================
// TrickPlay
// ============================================================================

struct TrickInner {
    speed: SpeedState,
    live: LiveCorrection,
    last_video_pts: MediaTicks,
    tracker: PtsTracker,
}

/// The trick-speed / live-sync coordinator.
///
/// Shares the pipeline with the playback layer; all methods are safe to
/// call concurrently with buffer traffic and the event worker.
pub struct TrickPlay {
    pipeline: Arc<PipelineManager>,
    config: LiveSyncConfig,
    inner: Mutex<TrickInner>,
}

impl TrickPlay {
    /// Create a coordinator with default live-sync tuning.
    pub fn new(pipeline: Arc<PipelineManager>) -> Self {
        Self::with_config(pipeline, LiveSyncConfig::default())
    }

    /// Create a coordinator with explicit live-sync tuning.
    pub fn with_config(pipeline: Arc<PipelineManager>, config: LiveSyncConfig) -> Self {
        Self {
            pipeline,
            config,
            inner: Mutex::new(TrickInner {
                speed: SpeedState::normal(),
                live: LiveCorrection::None,
                last_video_pts: MediaTicks::NONE,
                tracker: PtsTracker::new(),
            }),
        }
    }

    /// Current speed state.
    pub fn speed(&self) -> SpeedState {
        self.inner.lock().unwrap().speed
    }

    /// Current live correction level.
    pub fn live_correction(&self) -> LiveCorrection {
        self.inner.lock().unwrap().live
    }

    /// Whether audio is muted in the current speed state.
    pub fn audio_muted(&self) -> bool {
        speed_entry(self.inner.lock().unwrap().speed).mute_audio
    }

    /// Request a playback speed and direction.
    ///
    /// Requesting the current state is a no-op (zero flushes, `Ok(false)`).
    /// Otherwise the speed-change protocol runs once: flush the streams
    /// (render included on a direction change), reset the PTS trackers,
    /// apply the table scale and the audio mute. Returns `Ok(true)` when a
    /// change was applied.
    pub fn request_speed(&self, requested: SpeedState) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if requested == inner.speed {
            return Ok(false);
        }
        let entry = speed_entry(requested);
        let direction_change = requested.direction != inner.speed.direction;

        self.pipeline.flush(StreamKind::Video, direction_change)?;
        self.pipeline.flush(StreamKind::Audio, false)?;
        self.pipeline.set_audio_mute(entry.mute_audio)?;
        self.pipeline.clock().set_scale(entry.scale)?;

        info!(
            from = %inner.speed,
            to = %requested,
            scale = %entry.scale,
            mute = entry.mute_audio,
            "speed changed"
        );
        inner.speed = requested;
        inner.live = LiveCorrection::None;
        inner.last_video_pts = MediaTicks::NONE;
        inner.tracker.reset();
        Ok(true)
    }

    /// Report a rendered video PTS.
    ///
    /// Feeds the live drift measurement and the direction tracker; returns
    /// the inferred direction once two consistent deltas have been seen.
    pub fn note_video_pts(&self, pts: MediaTicks) -> Option<Direction> {
        let mut inner = self.inner.lock().unwrap();
        if pts.is_some() {
            inner.last_video_pts = pts;
        }
        inner.tracker.observe(pts)
    }

    /// Report a rendered audio PTS.
    ///
    /// Audio timestamps feed the direction tracker only; drift is measured
    /// against video, which keeps rendering when audio is muted.
    pub fn note_audio_pts(&self, pts: MediaTicks) -> Option<Direction> {
        self.inner.lock().unwrap().tracker.observe(pts)
    }

    /// Evaluate live drift and nudge the clock scale.
    ///
    /// Invoked once per evaluation interval by the device layer. Measures
    /// the buffered latency (last video PTS minus STC) against the target
    /// and steps the correction level by at most one toward where it needs
    /// to be; inside tolerance the level decays back to
    /// [`LiveCorrection::None`]. Only active during normal forward play.
    pub fn adjust_live_speed(&self) -> Result<LiveCorrection> {
        let mut inner = self.inner.lock().unwrap();
        if inner.speed != SpeedState::normal() || !self.pipeline.clock().is_running() {
            return Ok(inner.live);
        }
        let Some(video_pts) = inner.last_video_pts.to_option() else {
            return Ok(inner.live);
        };

        let stc = self.pipeline.clock().stc();
        let Some(latency) = video_pts.signed_diff(stc) else {
            return Ok(inner.live);
        };
        let drift = latency - self.config.target_latency.ticks() as i64;
        let tolerance = self.config.tolerance.ticks() as i64;

        let desired = if drift > 2 * tolerance {
            LiveCorrection::MaxPositive
        } else if drift > tolerance {
            LiveCorrection::Positive
        } else if drift < -2 * tolerance {
            LiveCorrection::MaxNegative
        } else if drift < -tolerance {
            LiveCorrection::Negative
        } else {
            LiveCorrection::None
        };

        let stepped = inner.live.step_toward(desired);
        if stepped != inner.live {
            self.pipeline.clock().set_scale(stepped.scale())?;
            debug!(
                drift_ticks = drift,
                from = %inner.live,
                to = %stepped,
                scale = %stepped.scale(),
                "live speed corrected"
            );
            inner.live = stepped;
        }
        Ok(stepped)
    }
}
