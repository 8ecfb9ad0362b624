// src/linalg_backends.rs

use crate::matrix::Precision;
use ndarray::{Array1, Array2, LinalgScalar, ScalarOperand};
use num_traits::{Float, FromPrimitive};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Debug, Display};
use std::iter::Sum;
use std::marker::PhantomData;

/// Boxed error returned across the backend seam.
pub type BackendError = Box<dyn Error + Send + Sync>;

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput<F: 'static> {
    /// Eigenvalues, sorted in ascending order by every backend.
    pub eigenvalues: Array1<F>,
    /// Eigenvectors as columns of the matrix.
    /// eigenvectors.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<F>,
}

/// Trait for symmetric eigendecomposition (LAPACK's SYEV family or faer's self-adjoint solver).
/// Only the upper triangle of `matrix` is read.
pub trait BackendEigh<F: 'static + Copy + Send + Sync> {
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, BackendError>;
}

/// Floating point element types the engine is instantiated for (`f32` and `f64`).
///
/// Every buffer of a single call uses the same `TsvdFloat`, so a fit never mixes precisions.
pub trait TsvdFloat:
    Float
    + FromPrimitive
    + LinalgScalar
    + ScalarOperand
    + Sum
    + Debug
    + Display
    + Send
    + Sync
    + bytemuck::Pod
    + Serialize
    + DeserializeOwned
    + 'static
{
    /// Runtime tag of this element type.
    const PRECISION: Precision;

    /// Lossy conversion used for tolerances and sample counts.
    fn from_f64_lossy(value: f64) -> Self;

    /// Symmetric eigendecomposition through the backend selected at compile time.
    fn eigh_upper(matrix: &Array2<Self>) -> Result<EighOutput<Self>, BackendError>;
}

impl TsvdFloat for f32 {
    const PRECISION: Precision = Precision::Float32;

    fn from_f64_lossy(value: f64) -> Self {
        value as f32
    }

    fn eigh_upper(matrix: &Array2<f32>) -> Result<EighOutput<f32>, BackendError> {
        LinAlgBackendProvider::<f32>::new().eigh_upper(matrix)
    }
}

impl TsvdFloat for f64 {
    const PRECISION: Precision = Precision::Float64;

    fn from_f64_lossy(value: f64) -> Self {
        value
    }

    fn eigh_upper(matrix: &Array2<f64>) -> Result<EighOutput<f64>, BackendError> {
        LinAlgBackendProvider::<f64>::new().eigh_upper(matrix)
    }
}

// --- NdarrayLinAlgBackend Implementation ---
use ndarray_linalg::{Eigh as NdLinalgEigh, UPLO};

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

// Helper to convert ndarray-linalg's error to Box<dyn Error + Send + Sync>
fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> BackendError {
    Box::new(e)
}

impl BackendEigh<f64> for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>, BackendError> {
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper).map_err(to_dyn_error)?;
        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

impl BackendEigh<f32> for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f32>) -> Result<EighOutput<f32>, BackendError> {
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper).map_err(to_dyn_error)?;
        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

// --- FaerLinAlgBackend Implementation ---
#[cfg(feature = "backend_faer")]
mod faer_specific_code {
    use super::{BackendEigh, BackendError, EighOutput};
    use bytemuck::Pod;
    use faer::traits::ComplexField;
    use faer::MatRef;
    use ndarray::{Array1, Array2};

    fn to_dyn_error_faer(msg: String) -> BackendError {
        Box::new(std::io::Error::new(std::io::ErrorKind::Other, msg))
    }

    #[derive(Debug, Default, Copy, Clone)]
    pub struct FaerLinAlgBackend;

    fn faer_mat_to_ndarray<F: ComplexField + Copy + Pod>(faer_mat: MatRef<'_, F>) -> Array2<F> {
        let nrows = faer_mat.nrows();
        let ncols = faer_mat.ncols();
        Array2::from_shape_fn((nrows, ncols), |(i, j)| faer_mat[(i, j)])
    }

    fn faer_col_to_ndarray_vec<F: ComplexField + Copy + Pod>(faer_col: faer::ColRef<'_, F>) -> Array1<F> {
        Array1::from_shape_fn(faer_col.nrows(), |i| faer_col[i])
    }

    /// Views an ndarray matrix as a faer matrix without copying.
    /// Errors for layouts faer cannot view directly (non-contiguous slices).
    fn view_as_faer<F: ComplexField + Copy + Pod>(matrix: &Array2<F>) -> Result<MatRef<'_, F>, BackendError> {
        let (nrows, ncols) = matrix.dim();
        let slice = matrix.as_slice_memory_order().ok_or_else(|| {
            to_dyn_error_faer(format!(
                "Input ndarray matrix ({}x{}) is non-contiguous and cannot be directly viewed by faer.",
                nrows, ncols
            ))
        })?;
        if matrix.is_standard_layout() {
            Ok(MatRef::from_row_major_slice(slice, nrows, ncols))
        } else {
            Ok(MatRef::from_column_major_slice(slice, nrows, ncols))
        }
    }

    fn faer_eigh<F: ComplexField<Real = F> + Copy + Pod + num_traits::Zero>(matrix: &Array2<F>) -> Result<EighOutput<F>, BackendError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(to_dyn_error_faer("Matrix must be square for eigendecomposition.".to_string()));
        }
        if matrix.is_empty() {
            return Ok(EighOutput { eigenvalues: Array1::zeros(0), eigenvectors: Array2::zeros((0, 0)) });
        }
        let faer_view = view_as_faer(matrix)?;
        let eig = faer_view
            .self_adjoint_eigen(faer::Side::Upper)
            .map_err(|e| to_dyn_error_faer(format!("Faer self-adjoint eigendecomposition failed: {:?}", e)))?;
        Ok(EighOutput {
            eigenvalues: faer_col_to_ndarray_vec(eig.S().column_vector()),
            eigenvectors: faer_mat_to_ndarray(eig.U()),
        })
    }

    impl BackendEigh<f64> for FaerLinAlgBackend {
        fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>, BackendError> {
            faer_eigh(matrix)
        }
    }

    impl BackendEigh<f32> for FaerLinAlgBackend {
        fn eigh_upper(&self, matrix: &Array2<f32>) -> Result<EighOutput<f32>, BackendError> {
            faer_eigh(matrix)
        }
    }
}

// --- LinAlgBackendProvider Dispatch ---

/// A provider struct that dispatches to the selected linear algebra backend
/// based on compile-time feature flags.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

#[cfg(feature = "backend_faer")]
impl<F> BackendEigh<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendEigh<F>,
    faer_specific_code::FaerLinAlgBackend: BackendEigh<F>,
{
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, BackendError> {
        faer_specific_code::FaerLinAlgBackend.eigh_upper(matrix)
    }
}

#[cfg(not(feature = "backend_faer"))]
impl<F> BackendEigh<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendEigh<F>,
{
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>, BackendError> {
        NdarrayLinAlgBackend.eigh_upper(matrix)
    }
}

#[cfg(test)]
mod backend_tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_eigh_upper_ascending_f64() {
        let matrix = array![[2.0_f64, 1.0], [1.0, 3.0]];
        let out = f64::eigh_upper(&matrix).unwrap();
        let sqrt5 = 5.0_f64.sqrt();
        assert_abs_diff_eq!(out.eigenvalues[0], (5.0 - sqrt5) / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.eigenvalues[1], (5.0 + sqrt5) / 2.0, epsilon = 1e-12);

        // A v = lambda v for each column.
        for i in 0..2 {
            let v = out.eigenvectors.column(i);
            let av = matrix.dot(&v);
            for r in 0..2 {
                assert_abs_diff_eq!(av[r], out.eigenvalues[i] * v[r], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_eigh_upper_f32_matches_f64() {
        let m64 = array![[30.0_f64, 13.0, 13.0], [13.0, 21.0, 21.0], [13.0, 21.0, 21.0]];
        let m32 = m64.mapv(|v| v as f32);
        let e64 = f64::eigh_upper(&m64).unwrap();
        let e32 = f32::eigh_upper(&m32).unwrap();
        for i in 0..3 {
            assert_abs_diff_eq!(e32.eigenvalues[i] as f64, e64.eigenvalues[i], epsilon = 1e-3);
        }
        assert_abs_diff_eq!(e64.eigenvalues[2], 36.0 + 374.0_f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_precision_tags() {
        assert_eq!(<f32 as TsvdFloat>::PRECISION, Precision::Float32);
        assert_eq!(<f64 as TsvdFloat>::PRECISION, Precision::Float64);
    }
}
