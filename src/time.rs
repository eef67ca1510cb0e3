//! Time types for pipeline synchronization.
//!
//! This module provides:
//! - [`MediaTicks`]: A 90 kHz presentation timestamp (8 bytes, Copy)
//! - [`DriverTicks`]: The driver's signed microsecond timestamp
//! - [`ClockScale`]: A signed Q16 fixed-point clock-rate multiplier

use std::time::Duration;

/// Ticks per second of the presentation timeline (MPEG 90 kHz).
pub const TICKS_PER_SEC: u64 = 90_000;

/// Ticks per millisecond of the presentation timeline.
pub const TICKS_PER_MS: u64 = 90;

// ============================================================================
// MediaTicks
// ============================================================================

/// A presentation timestamp in 90 kHz ticks (8 bytes, Copy).
///
/// This is the fundamental time type of the crate. All stream timestamps and
/// the system time clock (STC) are expressed in these units.
///
/// # Special Values
///
/// - `MediaTicks::ZERO`: Start of the timeline
/// - `MediaTicks::NONE`: Invalid/unset timestamp (sentinel value)
///
/// # Examples
///
/// ```rust
/// use lockstep::time::MediaTicks;
///
/// let t1 = MediaTicks::from_secs(1);
/// let t2 = MediaTicks::from_millis(500);
///
/// assert_eq!((t1 + t2).ticks(), 135_000);
/// assert_eq!(format!("{}", t1 + t2), "1.500s");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct MediaTicks(u64);

impl MediaTicks {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Maximum representable time (one less than the NONE sentinel).
    pub const MAX: Self = Self(u64::MAX - 1);

    /// Invalid/unset timestamp (sentinel value).
    pub const NONE: Self = Self(u64::MAX);

    /// Create from raw 90 kHz ticks.
    #[inline]
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Create from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(TICKS_PER_MS))
    }

    /// Create from seconds.
    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self(s.saturating_mul(TICKS_PER_SEC))
    }

    /// Get the raw tick count.
    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Get as milliseconds (truncated).
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 / TICKS_PER_MS
    }

    /// Get as seconds (truncated).
    #[inline]
    pub const fn secs(self) -> u64 {
        self.0 / TICKS_PER_SEC
    }

    /// Check if this is the NONE sentinel value.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Check if this is a valid timestamp (not NONE).
    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }

    /// Convert to Option, returning None for the NONE sentinel.
    #[inline]
    pub const fn to_option(self) -> Option<Self> {
        if self.is_none() { None } else { Some(self) }
    }

    /// Saturating addition. Returns NONE if either operand is NONE.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        let result = self.0.saturating_add(rhs.0);
        if result == u64::MAX { Self::MAX } else { Self(result) }
    }

    /// Saturating subtraction. Returns NONE if either operand is NONE.
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Absolute difference between two timestamps.
    #[inline]
    pub const fn abs_diff(self, other: Self) -> Self {
        if self.is_none() || other.is_none() {
            return Self::NONE;
        }
        Self(self.0.abs_diff(other.0))
    }

    /// Signed difference `self - other` in ticks.
    ///
    /// Returns `None` if either operand is the NONE sentinel.
    #[inline]
    pub const fn signed_diff(self, other: Self) -> Option<i64> {
        if self.is_none() || other.is_none() {
            return None;
        }
        Some(self.0 as i64 - other.0 as i64)
    }

    /// Convert to the driver's microsecond timestamp representation.
    ///
    /// One 90 kHz tick is 100/9 µs; the division truncates. The NONE
    /// sentinel maps to [`DriverTicks::UNKNOWN`].
    #[inline]
    pub const fn to_driver(self) -> DriverTicks {
        if self.is_none() {
            return DriverTicks::UNKNOWN;
        }
        DriverTicks((self.0 as i64).saturating_mul(100) / 9)
    }

    /// Convert from the driver's microsecond timestamp representation.
    #[inline]
    pub const fn from_driver(ticks: DriverTicks) -> Self {
        if ticks.is_unknown() || ticks.0 < 0 {
            return Self::NONE;
        }
        Self((ticks.0 as u64).saturating_mul(9) / 100)
    }
}

impl std::ops::Add for MediaTicks {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::Sub for MediaTicks {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for MediaTicks {
    #[inline]
    fn from(d: Duration) -> Self {
        Self((d.as_nanos() as u64).saturating_mul(9) / 100_000)
    }
}

impl std::fmt::Display for MediaTicks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "{}.{:03}s", self.secs(), self.millis() % 1000)
        }
    }
}

// ============================================================================
// DriverTicks
// ============================================================================

/// The driver's timestamp representation: signed microseconds.
///
/// The hardware pipeline expresses all timing in microseconds; the core
/// converts 90 kHz [`MediaTicks`] at the driver boundary and back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DriverTicks(i64);

impl DriverTicks {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Sentinel for a buffer with no known timestamp.
    pub const UNKNOWN: Self = Self(i64::MIN);

    /// Create from microseconds.
    #[inline]
    pub const fn from_micros(us: i64) -> Self {
        Self(us)
    }

    /// Get as microseconds.
    #[inline]
    pub const fn micros(self) -> i64 {
        self.0
    }

    /// Check if this is the UNKNOWN sentinel.
    #[inline]
    pub const fn is_unknown(self) -> bool {
        self.0 == i64::MIN
    }
}

impl std::fmt::Display for DriverTicks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unknown() {
            write!(f, "UNKNOWN")
        } else {
            write!(f, "{}us", self.0)
        }
    }
}

// ============================================================================
// ClockScale
// ============================================================================

/// Clock-rate multiplier as signed Q16 fixed point.
///
/// `ClockScale::NORMAL` (1.0) is real-time playback. Zero freezes the clock
/// while it remains logically running. Negative values are reserved for a
/// reverse-play contract that the hardware does not provide and are rejected
/// by the clock controller; the supported range is `[0.0, 16.0]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClockScale(i32);

impl ClockScale {
    /// Frozen clock (pause without losing synchronization state).
    pub const ZERO: Self = Self(0);

    /// Real-time playback (1.0).
    pub const NORMAL: Self = Self(1 << 16);

    /// Largest supported multiplier (16.0).
    pub const MAX_SUPPORTED: Self = Self(16 << 16);

    /// Create from a raw Q16 value.
    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Create from a per-mille rate (1000 = real time).
    #[inline]
    pub const fn from_permille(permille: i32) -> Self {
        Self((permille as i64 * 65_536 / 1000) as i32)
    }

    /// Get the raw Q16 value.
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Get the rate in per-mille (truncated).
    #[inline]
    pub const fn permille(self) -> i32 {
        (self.0 as i64 * 1000 / 65_536) as i32
    }

    /// Check if this scale freezes the clock.
    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Check if this scale is inside the supported range.
    #[inline]
    pub const fn is_supported(self) -> bool {
        self.0 >= 0 && self.0 <= Self::MAX_SUPPORTED.0
    }

    /// Scale a tick count by this multiplier.
    ///
    /// Negative scales clamp to zero; callers validate with
    /// [`is_supported`](Self::is_supported) before relying on the result.
    #[inline]
    pub const fn apply(self, ticks: u64) -> u64 {
        if self.0 <= 0 {
            return 0;
        }
        ((ticks as u128 * self.0 as u128) >> 16) as u64
    }

    /// Get as a floating-point multiplier.
    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 65_536.0
    }
}

impl std::fmt::Display for ClockScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}x", self.as_f64())
    }
}
