//! # lockstep
//!
//! A hardware-accelerated audio/video playback pipeline core for set-top-box
//! style devices. Encoded elementary streams are fed into a fixed graph of
//! hardware decode/render stages and kept in lock-step with a shared system
//! time clock; the presentation rate can be altered for trick play (pause,
//! slow/fast forward and reverse) and nudged continuously to track live
//! broadcast timing.
//!
//! ## Architecture
//!
//! - [`manager::PipelineManager`]: the component graph, tunnels, buffer
//!   pools and the serialization loop draining driver events
//! - [`clock::ClockController`]: the STC state machine, clock reference and
//!   clock scale
//! - [`trick::TrickPlay`]: maps speed requests and measured drift onto
//!   clock-scale and mute decisions
//! - [`stall::StallDetector`]: per-stream buffer starvation watchdog
//! - [`driver::PipelineDriver`] / [`display::DisplayService`]: the external
//!   hardware and display boundaries
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lockstep::prelude::*;
//!
//! let pipeline = PipelineManager::init(driver, display, PipelineConfig::default())?;
//! let trick = TrickPlay::new(pipeline.clone());
//!
//! pipeline.clock().set_reference(ClockReference::Video)?;
//! pipeline.clock().start(true, false)?;
//!
//! while let Some(mut buf) = pipeline.get_video_buffer(pts) {
//!     buf.payload.extend_from_slice(frame);
//!     pipeline.empty_video_buffer(buf)?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod clock;
pub mod display;
pub mod driver;
pub mod error;
pub mod graph;
pub mod manager;
pub mod observability;
pub mod stall;
pub mod time;
pub mod trick;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::{BufferFlags, MediaBuffer, StreamKind};
    pub use crate::clock::{ClockController, ClockReference, ClockState};
    pub use crate::display::{DisplayService, DisplayTiming, StaticDisplay};
    pub use crate::driver::{DriverEvent, DriverStatus, PipelineDriver};
    pub use crate::error::{Error, Result};
    pub use crate::manager::{PipelineConfig, PipelineManager};
    pub use crate::time::{ClockScale, MediaTicks};
    pub use crate::trick::{Direction, SpeedLevel, SpeedState, TrickPlay};
}

pub use error::{Error, Result};
