//! Error types for chain generation.
//!
//! Only structural problems surface here. Rejected or out-of-support candidates are
//! ordinary outcomes and are tracked by counters instead, and a covariance that cannot
//! be repaired only skips one adaptation cycle.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DramError {
    /// A point, matrix or chain does not match the dimension of the sampling space.
    #[error("dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// The user supplied starting point is outside the target support.
    #[error("initial position should not be out of target pdf support")]
    InitialPositionOutOfSupport,

    /// The target density returned a non-finite value at the starting point.
    #[error("target density at the initial position is not finite: {0}")]
    InitialDensityNotFinite(f64),

    /// The kernel refused the current position as the stage 0 anchor.
    #[error("position {position_id}: current position is an invalid kernel anchor")]
    InvalidAnchor { position_id: usize },

    /// A proposal was requested for a stage whose anchor has not been set.
    #[error("no anchor set for stage {stage_id}")]
    MissingAnchor { stage_id: usize },

    /// A stage history referenced more stages than the kernel provides.
    #[error("stage level {level} exceeds the {stage_count} stages of the kernel")]
    StageOutOfRange { level: usize, stage_count: usize },

    /// Inputs of the delayed-rejection acceptance recursion are inconsistent.
    #[error("malformed delayed rejection input: {0}")]
    MalformedCascade(String),

    /// The first adaptation window must hold at least two points.
    #[error("first adaptation window has {0} point(s), at least 2 are needed")]
    AdaptationWindowTooSmall(usize),

    /// A covariance handed to a kernel is not symmetric positive definite.
    #[error("covariance matrix is not positive definite")]
    NotPositiveDefinite,

    /// `step` was called on a chain whose positions are all written.
    #[error("all {chain_size} chain positions are already generated")]
    ChainExhausted { chain_size: usize },

    /// The chain was collected before every position was generated.
    #[error("chain generation stopped with {remaining} position(s) left")]
    Incomplete { remaining: usize },

    /// Sampler options are inconsistent.
    #[error("invalid option `{option}`: {reason}")]
    InvalidOption { option: &'static str, reason: String },

    /// The target density evaluator failed.
    #[error("target density evaluation failed")]
    Density(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, DramError>;

impl DramError {
    pub(crate) fn invalid_option(option: &'static str, reason: impl Into<String>) -> Self {
        DramError::InvalidOption {
            option,
            reason: reason.into(),
        }
    }
}
