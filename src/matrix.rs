//! Runtime precision dispatch for matrices whose element type is only known at run time,
//! such as column-major buffers handed over from foreign memory.

use crate::error::{Result, TsvdError};
use crate::linalg_backends::TsvdFloat;
use crate::params::TSVDParams;
use crate::tsvd::{self, FittedModel};
use ndarray::{Array2, ShapeBuilder};
use std::fmt;
use std::str::FromStr;

/// Element type of a dense matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Precision {
    Float32,
    Float64,
}

impl Precision {
    /// Size of one element in bytes.
    pub fn size_of(&self) -> usize {
        match self {
            Precision::Float32 => std::mem::size_of::<f32>(),
            Precision::Float64 => std::mem::size_of::<f64>(),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::Float32 => f.write_str("float32"),
            Precision::Float64 => f.write_str("float64"),
        }
    }
}

impl FromStr for Precision {
    type Err = TsvdError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "float32" | "f32" | "single" => Ok(Precision::Float32),
            "float64" | "f64" | "double" => Ok(Precision::Float64),
            other => Err(TsvdError::UnsupportedInputType(format!(
                "element type '{}' is not supported, expected float32 or float64",
                other
            ))),
        }
    }
}

/// A dense matrix of either supported precision.
#[derive(Clone, Debug, PartialEq)]
pub enum DenseMatrix {
    F32(Array2<f32>),
    F64(Array2<f64>),
}

/// A fitted model of either supported precision.
#[derive(Clone, Debug)]
pub enum DenseModel {
    F32(FittedModel<f32>),
    F64(FittedModel<f64>),
}

/// `n_rows * n_cols * element_size`, or `InvalidParameter` if it does not fit in `usize`.
fn buffer_len_bytes(n_rows: usize, n_cols: usize, element_size: usize) -> Result<usize> {
    n_rows
        .checked_mul(n_cols)
        .and_then(|n| n.checked_mul(element_size))
        .ok_or_else(|| {
            TsvdError::invalid_parameter(
                "n_rows",
                format!("a {}x{} matrix overflows the addressable buffer size", n_rows, n_cols),
            )
        })
}

fn column_major_from_bytes<F: TsvdFloat>(n_rows: usize, n_cols: usize, bytes: &[u8]) -> Result<Array2<F>> {
    // Copies into an aligned buffer; `bytes` may come from an arbitrarily aligned source.
    let values: Vec<F> = bytemuck::pod_collect_to_vec(bytes);
    let n_values = values.len();
    let expected = buffer_len_bytes(n_rows, n_cols, 1)?;
    Array2::from_shape_vec((n_rows, n_cols).f(), values).map_err(|_| TsvdError::ShapeMismatch {
        context: "column-major buffer elements",
        expected,
        got: n_values,
    })
}

impl DenseMatrix {
    /// Wraps a raw column-major buffer whose element type is named by `dtype`.
    ///
    /// # Errors
    /// `UnsupportedInputType` if `dtype` is not a supported float type,
    /// `InvalidParameter` if the dimensions overflow `usize`,
    /// `ShapeMismatch` if `bytes` does not hold exactly `n_rows * n_cols` elements.
    pub fn from_column_major_bytes(dtype: &str, n_rows: usize, n_cols: usize, bytes: &[u8]) -> Result<Self> {
        let precision: Precision = dtype.parse()?;
        let expected_bytes = buffer_len_bytes(n_rows, n_cols, precision.size_of())?;
        if bytes.len() != expected_bytes {
            return Err(TsvdError::ShapeMismatch {
                context: "column-major buffer bytes",
                expected: expected_bytes,
                got: bytes.len(),
            });
        }
        match precision {
            Precision::Float32 => Ok(DenseMatrix::F32(column_major_from_bytes(n_rows, n_cols, bytes)?)),
            Precision::Float64 => Ok(DenseMatrix::F64(column_major_from_bytes(n_rows, n_cols, bytes)?)),
        }
    }

    pub fn precision(&self) -> Precision {
        match self {
            DenseMatrix::F32(_) => Precision::Float32,
            DenseMatrix::F64(_) => Precision::Float64,
        }
    }

    /// (n_rows, n_cols)
    pub fn dim(&self) -> (usize, usize) {
        match self {
            DenseMatrix::F32(m) => m.dim(),
            DenseMatrix::F64(m) => m.dim(),
        }
    }
}

impl From<Array2<f32>> for DenseMatrix {
    fn from(m: Array2<f32>) -> Self {
        DenseMatrix::F32(m)
    }
}

impl From<Array2<f64>> for DenseMatrix {
    fn from(m: Array2<f64>) -> Self {
        DenseMatrix::F64(m)
    }
}

impl DenseModel {
    pub fn precision(&self) -> Precision {
        match self {
            DenseModel::F32(_) => Precision::Float32,
            DenseModel::F64(_) => Precision::Float64,
        }
    }
}

fn precision_mismatch(model: Precision, input: Precision) -> TsvdError {
    TsvdError::UnsupportedInputType(format!(
        "model was fitted in {} but the input is {}; precisions cannot be mixed",
        model, input
    ))
}

/// [`tsvd::fit`] on a matrix of run-time precision.
pub fn fit_dense(x: &DenseMatrix, params: &TSVDParams, compute_extras: bool) -> Result<DenseModel> {
    match x {
        DenseMatrix::F32(m) => Ok(DenseModel::F32(tsvd::fit(m.view(), params, compute_extras)?)),
        DenseMatrix::F64(m) => Ok(DenseModel::F64(tsvd::fit(m.view(), params, compute_extras)?)),
    }
}

/// [`tsvd::fit_transform`] on a matrix of run-time precision.
pub fn fit_transform_dense(x: &DenseMatrix, params: &TSVDParams) -> Result<(DenseModel, DenseMatrix)> {
    match x {
        DenseMatrix::F32(m) => {
            let (model, transformed) = tsvd::fit_transform(m.view(), params)?;
            Ok((DenseModel::F32(model), DenseMatrix::F32(transformed)))
        }
        DenseMatrix::F64(m) => {
            let (model, transformed) = tsvd::fit_transform(m.view(), params)?;
            Ok((DenseModel::F64(model), DenseMatrix::F64(transformed)))
        }
    }
}

/// [`tsvd::transform`] on a matrix of run-time precision.
///
/// # Errors
/// `UnsupportedInputType` if the input precision differs from the model's.
pub fn transform_dense(x: &DenseMatrix, model: &DenseModel) -> Result<DenseMatrix> {
    match (x, model) {
        (DenseMatrix::F32(m), DenseModel::F32(fitted)) => Ok(DenseMatrix::F32(tsvd::transform(m.view(), fitted)?)),
        (DenseMatrix::F64(m), DenseModel::F64(fitted)) => Ok(DenseMatrix::F64(tsvd::transform(m.view(), fitted)?)),
        _ => Err(precision_mismatch(model.precision(), x.precision())),
    }
}

/// [`tsvd::inverse_transform`] on a matrix of run-time precision.
///
/// # Errors
/// `UnsupportedInputType` if the input precision differs from the model's.
pub fn inverse_transform_dense(z: &DenseMatrix, model: &DenseModel) -> Result<DenseMatrix> {
    match (z, model) {
        (DenseMatrix::F32(m), DenseModel::F32(fitted)) => {
            Ok(DenseMatrix::F32(tsvd::inverse_transform(m.view(), fitted)?))
        }
        (DenseMatrix::F64(m), DenseModel::F64(fitted)) => {
            Ok(DenseMatrix::F64(tsvd::inverse_transform(m.view(), fitted)?))
        }
        _ => Err(precision_mismatch(model.precision(), z.precision())),
    }
}

#[cfg(test)]
mod matrix_tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // [[1,4,4],[2,2,2],[5,1,1]] stored column by column.
    const COLUMN_MAJOR: [f64; 9] = [1.0, 2.0, 5.0, 4.0, 2.0, 1.0, 4.0, 2.0, 1.0];

    #[test]
    fn test_precision_parse() {
        assert_eq!("float32".parse::<Precision>().unwrap(), Precision::Float32);
        assert_eq!("f64".parse::<Precision>().unwrap(), Precision::Float64);
        assert!(matches!(
            "int64".parse::<Precision>(),
            Err(TsvdError::UnsupportedInputType(_))
        ));
    }

    #[test]
    fn test_from_column_major_bytes_f32() {
        let values: Vec<f32> = COLUMN_MAJOR.iter().map(|&v| v as f32).collect();
        let bytes: &[u8] = bytemuck::cast_slice(&values);
        let matrix = DenseMatrix::from_column_major_bytes("float32", 3, 3, bytes).unwrap();
        assert_eq!(matrix.precision(), Precision::Float32);
        match matrix {
            DenseMatrix::F32(m) => {
                assert_eq!(m[[0, 1]], 4.0);
                assert_eq!(m[[2, 0]], 5.0);
                assert_eq!(m[[1, 2]], 2.0);
            }
            other => panic!("expected an f32 matrix, got {:?}", other),
        }
    }

    #[test]
    fn test_from_column_major_bytes_rejects_wrong_length() {
        let bytes: &[u8] = bytemuck::cast_slice(&COLUMN_MAJOR);
        assert!(matches!(
            DenseMatrix::from_column_major_bytes("float64", 3, 4, bytes),
            Err(TsvdError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            DenseMatrix::from_column_major_bytes("complex64", 3, 3, bytes),
            Err(TsvdError::UnsupportedInputType(_))
        ));
    }

    #[test]
    fn test_from_column_major_bytes_rejects_overflowing_dimensions() {
        let bytes: &[u8] = bytemuck::cast_slice(&COLUMN_MAJOR);
        match DenseMatrix::from_column_major_bytes("float64", usize::MAX, 2, bytes) {
            Err(TsvdError::InvalidParameter { name, .. }) => assert_eq!(name, "n_rows"),
            other => panic!("expected InvalidParameter, got {:?}", other),
        }
        // Element count fits but the byte count does not.
        assert!(matches!(
            DenseMatrix::from_column_major_bytes("float32", usize::MAX / 2, 1, bytes),
            Err(TsvdError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_dense_dispatch_fit_transform_and_inverse() {
        let bytes: &[u8] = bytemuck::cast_slice(&COLUMN_MAJOR);
        let x = DenseMatrix::from_column_major_bytes("float64", 3, 3, bytes).unwrap();
        let (model, transformed) = fit_transform_dense(&x, &TSVDParams::new(3)).unwrap();
        assert_eq!(model.precision(), Precision::Float64);
        assert_eq!(transformed.dim(), (3, 3));

        let reconstructed = inverse_transform_dense(&transformed, &model).unwrap();
        match (reconstructed, x) {
            (DenseMatrix::F64(r), DenseMatrix::F64(original)) => {
                for (a, b) in r.iter().zip(original.iter()) {
                    assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
                }
            }
            other => panic!("unexpected precisions {:?}", other),
        }
    }

    #[test]
    fn test_dense_dispatch_rejects_mixed_precision() {
        let x64 = DenseMatrix::from(ndarray::array![[1.0_f64, 0.0], [0.0, 2.0]]);
        let x32 = DenseMatrix::from(ndarray::array![[1.0_f32, 0.0], [0.0, 2.0]]);
        let model = fit_dense(&x64, &TSVDParams::new(1), false).unwrap();
        assert!(matches!(
            transform_dense(&x32, &model),
            Err(TsvdError::UnsupportedInputType(_))
        ));
        assert!(transform_dense(&x64, &model).is_ok());
    }
}
