//! Error types for the fusion pipeline
//!
//! All validation happens eagerly at the public entry points, before any
//! partial work is done. Numeric pathologies inside the iteration loops
//! (NaN/Inf from a degenerate `xx + bkg`) are deliberately not caught;
//! the solver propagates them and the caller is responsible for choosing
//! parameters that avoid degenerate states.

use thiserror::Error;

/// Errors raised by operator construction, the TV denoiser, and the
/// fusion solver.
#[derive(Debug, Error)]
pub enum FusionError {
    /// Shape or length mismatch detected while constructing an operator.
    #[error("invalid dimension: {message}")]
    InvalidDimension { message: String },

    /// A scalar parameter is outside its valid range.
    #[error("invalid parameter `{name}`: {message}")]
    InvalidParameter { name: &'static str, message: String },

    /// An input array does not match the expected grid shape.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// The requested TV kernel is not implemented for this operation.
    #[error("unsupported kernel: {message}")]
    UnsupportedKernel { message: &'static str },
}

impl FusionError {
    pub(crate) fn invalid_dimension(message: impl Into<String>) -> Self {
        FusionError::InvalidDimension { message: message.into() }
    }

    pub(crate) fn invalid_parameter(name: &'static str, message: impl Into<String>) -> Self {
        FusionError::InvalidParameter { name, message: message.into() }
    }

    pub(crate) fn shape_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        FusionError::ShapeMismatch { expected: expected.into(), got: got.into() }
    }
}
