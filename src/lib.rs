// Truncated singular value decomposition (TSVD)

#![doc = include_str!("../README.md")]

pub mod error;
pub mod jacobi;
pub mod linalg_backends;
pub mod matrix;
pub mod params;
pub mod tsvd;


pub use error::{Result, TsvdError};
pub use jacobi::JacobiConvergence;
pub use linalg_backends::TsvdFloat;
pub use matrix::{
    fit_dense, fit_transform_dense, inverse_transform_dense, transform_dense, DenseMatrix, DenseModel, Precision,
};
pub use params::{Algorithm, ParamValue, TSVDParams};
pub use tsvd::{fit, fit_transform, inverse_transform, transform, FittedModel, TruncatedSvd};
