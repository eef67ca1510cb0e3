//! The Display Service boundary.
//!
//! The display service reports the current output timing (resolution,
//! frame rate, interlace). The core uses it for exactly one thing: sizing
//! the video render stage's destination region. Mode switching and EDID
//! enumeration live behind the trait, outside this crate.

use crate::driver::{PortFormat, RenderRegion};

/// Output timing parameters of the active display mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayTiming {
    /// Display width in pixels.
    pub width: u32,
    /// Display height in pixels.
    pub height: u32,
    /// Frames (or fields, when interlaced) per second.
    pub frame_rate: u32,
    /// Whether the output is interlaced.
    pub interlaced: bool,
}

impl DisplayTiming {
    /// Display aspect ratio (width over height).
    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl std::fmt::Display for DisplayTiming {
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

/// Source of output timing parameters.
pub trait DisplayService: Send + Sync {
    /// The currently active output timing.
    fn output_timing(&self) -> DisplayTiming;
}

/// A display with fixed timing; the default service and the test fake.
pub struct StaticDisplay {
    timing: DisplayTiming,
}

impl StaticDisplay {
    /// Create with explicit progressive timing.
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            timing: DisplayTiming { width, height, frame_rate, interlaced: false },
        }
    }

    /// Mark the output as interlaced.
    pub fn interlaced(mut self) -> Self {
        self.timing.interlaced = true;
        self
    }
}

impl Default for StaticDisplay {
    /// 1080p50, the common set-top-box default.
    fn default() -> Self {
        Self::new(1920, 1080, 50)
    }
}

impl DisplayService for StaticDisplay {
    fn output_timing(&self) -> DisplayTiming {
        self.timing
    }
}

/// How source video is mapped onto the display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayMode {
    /// Preserve aspect ratio, pad with bars. When false, preserve aspect
    /// ratio and center-crop instead (zoom).
    pub letterbox: bool,
    /// Ignore aspect ratio entirely and stretch to the full display.
    pub no_aspect: bool,
}

impl Default for DisplayMode {
    fn default() -> Self {
        Self { letterbox: true, no_aspect: false }
    }
}

/// Compute the render destination region for a video format on a display.
///
/// `no_aspect` stretches to the full screen. Otherwise the source aspect
/// ratio is preserved: letterbox fits inside the display (bars on the
/// narrow axis), zoom fills it (cropping the wide axis off-screen).
pub fn render_region(video: &PortFormat, display: &DisplayTiming, mode: DisplayMode) -> RenderRegion {
    if mode.no_aspect || video.width == 0 || video.height == 0 {
        return RenderRegion { x: 0, y: 0, width: display.width, height: display.height };
    }

    let video_aspect = video.width as f64 / video.height as f64;
    let display_aspect = display.aspect();

    let fit_width = if mode.letterbox {
        video_aspect <= display_aspect
    } else {
        video_aspect > display_aspect
    };

    let (width, height) = if fit_width {
        // Height-bound: full display height, scaled width.
        let w = (display.height as f64 * video_aspect).round() as u32;
        (w, display.height)
    } else {
        // Width-bound: full display width, scaled height.
        let h = (display.width as f64 / video_aspect).round() as u32;
        (display.width, h)
    };

    RenderRegion {
        x: (display.width as i32 - width as i32) / 2,
        y: (display.height as i32 - height as i32) / 2,
        width,
        height,
    }
}
