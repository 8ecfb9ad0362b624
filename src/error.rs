//! Error types for the truncated SVD engine.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TsvdError>;

/// Errors produced by parameter validation, fitting, projection, and model I/O.
///
/// Validation errors (`InvalidParameter`, `ShapeMismatch`, `UnsupportedInputType`,
/// `UnfittedModel`) are always raised before any matrix product is formed.
#[derive(Error, Debug)]
pub enum TsvdError {
    /// A parameter is out of range, has the wrong type, or is not recognised.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Name of the offending parameter.
        name: String,
        /// Human readable explanation.
        reason: String,
    },

    /// Input dimensions disagree with the fitted model or the declared shape.
    #[error("Shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        /// Operation or quantity being checked.
        context: &'static str,
        /// Expected extent.
        expected: usize,
        /// Observed extent.
        got: usize,
    },

    /// The input element type is not `f32`/`f64`, or precisions were mixed.
    #[error("Unsupported input type: {0}")]
    UnsupportedInputType(String),

    /// The eigensolver failed or produced non-finite values.
    #[error("Numerical failure: {0}")]
    NumericalFailure(String),

    /// `transform` or `inverse_transform` was called before `fit`.
    #[error("Model has not been fitted. Call fit or fit_transform first.")]
    UnfittedModel,

    /// A deserialised model is internally inconsistent.
    #[error("Corrupt model: {0}")]
    CorruptModel(String),

    /// File system error while saving or loading a model.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding of a model failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TsvdError {
    pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        TsvdError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
