//! Error types for the pipeline core.

use thiserror::Error;

use crate::driver::DriverStatus;
use crate::graph::{StageRole, TunnelRole};
use crate::time::ClockScale;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A stage could not be created at init. Fatal; init rolls back
    /// everything already built.
    #[error("failed to create {role} stage: {status}")]
    StageCreation {
        /// The stage that failed to create.
        role: StageRole,
        /// Driver status code.
        status: DriverStatus,
    },

    /// A tunnel could not be created at init. Fatal; init rolls back
    /// everything already built.
    #[error("failed to create {role} tunnel: {status}")]
    TunnelCreation {
        /// The tunnel that failed to create.
        role: TunnelRole,
        /// Driver status code.
        status: DriverStatus,
    },

    /// The driver rejected an operation on a live pipeline.
    #[error("driver rejected {context}: {status}")]
    Driver {
        /// What was being attempted.
        context: &'static str,
        /// Driver status code.
        status: DriverStatus,
    },

    /// Requested clock scale is outside the supported range. The previous
    /// scale is retained.
    #[error("clock scale {0} outside supported range")]
    ScaleOutOfRange(ClockScale),

    /// The pipeline is not initialized (or already torn down).
    #[error("pipeline is not ready")]
    NotReady,

    /// No free buffer was available for an internally generated submission.
    #[error("free pool exhausted")]
    PoolExhausted,
}

impl Error {
    /// Convenience constructor for driver rejections.
    pub(crate) fn driver(context: &'static str, status: DriverStatus) -> Self {
        Self::Driver { context, status }
    }
}
