// Truncated singular value decomposition (TSVD)

use crate::error::{Result, TsvdError};
use crate::jacobi::{self, JacobiConvergence};
use crate::linalg_backends::{EighOutput, TsvdFloat};
use crate::params::{Algorithm, ParamValue, TSVDParams};
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::Instant;

/// Result of fitting a truncated SVD.
///
/// Holds the top-K right singular vectors of the training matrix and the statistics
/// derived from them. A `FittedModel` is immutable; `transform` and `inverse_transform`
/// only read it, so it can be shared between threads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FittedModel<F> {
    /// Right singular vectors as columns.
    /// Shape: (n_cols, n_components)
    components: Array2<F>,
    /// Singular values, non-negative and in descending order.
    /// Shape: (n_components)
    singular_values: Array1<F>,
    /// `singular_value^2 / (n_rows - 1)`. `None` when the fit skipped extras.
    explained_variance: Option<Array1<F>>,
    /// Explained variance normalised over the retained components. `None` when the fit skipped extras.
    explained_variance_ratio: Option<Array1<F>>,
    /// Reserved for centering. No centering is performed, so this is all zeros.
    /// Shape: (n_cols)
    mean: Array1<F>,
    n_rows: usize,
    n_cols: usize,
    algorithm: Algorithm,
    /// Present for models fitted with the Jacobi strategy.
    convergence: Option<JacobiConvergence>,
}

impl<F: TsvdFloat> FittedModel<F> {
    /// Right singular vectors, shape (n_cols, n_components).
    pub fn components(&self) -> &Array2<F> {
        &self.components
    }

    pub fn singular_values(&self) -> &Array1<F> {
        &self.singular_values
    }

    pub fn explained_variance(&self) -> Option<&Array1<F>> {
        self.explained_variance.as_ref()
    }

    pub fn explained_variance_ratio(&self) -> Option<&Array1<F>> {
        self.explained_variance_ratio.as_ref()
    }

    pub fn mean(&self) -> &Array1<F> {
        &self.mean
    }

    pub fn n_components(&self) -> usize {
        self.components.ncols()
    }

    /// Number of rows of the training matrix.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns of the training matrix; inputs to `transform` must match it.
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Sweep count and final off-diagonal magnitude of a Jacobi fit.
    pub fn convergence(&self) -> Option<&JacobiConvergence> {
        self.convergence.as_ref()
    }

    /// Saves the model to a file using bincode.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or serialisation fails.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| TsvdError::Serialization(format!("Failed to serialize TSVD model: {}", e)))?;
        Ok(())
    }

    /// Loads a model previously written by `save_model`.
    ///
    /// The element type `F` must match the one the model was saved with.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, decoding fails, or the decoded model is
    /// internally inconsistent (mismatched dimensions, negative or non-finite singular values).
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let model: FittedModel<F> =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| TsvdError::Serialization(format!("Failed to deserialize TSVD model: {}", e)))?;
        model.check_consistency()?;
        Ok(model)
    }

    fn check_consistency(&self) -> Result<()> {
        let k = self.components.ncols();
        if self.components.nrows() != self.n_cols {
            return Err(TsvdError::CorruptModel(format!(
                "components have {} rows but the model records {} columns",
                self.components.nrows(),
                self.n_cols
            )));
        }
        if self.singular_values.len() != k {
            return Err(TsvdError::CorruptModel(format!(
                "{} singular values for {} components",
                self.singular_values.len(),
                k
            )));
        }
        if self.mean.len() != self.n_cols {
            return Err(TsvdError::CorruptModel(format!(
                "mean has length {} but the model records {} columns",
                self.mean.len(),
                self.n_cols
            )));
        }
        for (label, values) in [
            ("explained_variance", &self.explained_variance),
            ("explained_variance_ratio", &self.explained_variance_ratio),
        ] {
            if let Some(v) = values {
                if v.len() != k {
                    return Err(TsvdError::CorruptModel(format!(
                        "{} has length {} for {} components",
                        label,
                        v.len(),
                        k
                    )));
                }
            }
        }
        if self
            .singular_values
            .iter()
            .any(|s| !s.is_finite() || *s < F::zero())
        {
            return Err(TsvdError::CorruptModel(
                "singular values must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sorts eigenpairs by eigenvalue, largest first, and keeps the top `k`.
///
/// The sort is stable, so eigenpairs with equal eigenvalues keep the solver's order.
/// Eigenvectors are taken as returned by the solver; their signs are never changed.
fn select_top_components<F: TsvdFloat>(eig: EighOutput<F>, k: usize) -> Result<(Array2<F>, Array1<F>)> {
    if eig.eigenvalues.iter().any(|v| v.is_nan()) {
        return Err(TsvdError::NumericalFailure(
            "eigensolver returned NaN eigenvalues".to_string(),
        ));
    }
    let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|&i, &j| {
        eig.eigenvalues[j]
            .partial_cmp(&eig.eigenvalues[i])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(k);
    if order.len() < k {
        return Err(TsvdError::NumericalFailure(format!(
            "eigensolver returned {} eigenpairs, {} requested",
            order.len(),
            k
        )));
    }
    let components = eig.eigenvectors.select(Axis(1), &order);
    let eigenvalues = eig.eigenvalues.select(Axis(0), &order);
    Ok((components, eigenvalues))
}

/// `singular_value^2 / (n_rows - 1)` and its ratio over the retained components.
///
/// The denominator is floored at 1 so a single-row input still yields finite variances.
/// If every retained variance is zero the ratios are zero as well.
fn explained_variance_stats<F: TsvdFloat>(singular_values: &Array1<F>, n_rows: usize) -> (Array1<F>, Array1<F>) {
    let dof = F::from_f64_lossy(n_rows.saturating_sub(1).max(1) as f64);
    let explained_variance = singular_values.mapv(|s| s * s / dof);
    let total: F = explained_variance.sum();
    let explained_variance_ratio = if total > F::zero() {
        explained_variance.mapv(|v| v / total)
    } else {
        warn!("All retained components have zero variance; explained variance ratios are set to zero.");
        Array1::zeros(explained_variance.len())
    };
    (explained_variance, explained_variance_ratio)
}

fn fit_impl<F: TsvdFloat>(
    x: ArrayView2<F>,
    params: &TSVDParams,
    compute_extras: bool,
) -> Result<(FittedModel<F>, Option<Array2<F>>)> {
    let (n_rows, n_cols) = x.dim();
    params.validate(n_rows, n_cols)?;
    let k = params.n_components;

    info!(
        "Fitting truncated SVD: {} rows x {} columns, n_components={}, algorithm={}, precision={:?}",
        n_rows,
        n_cols,
        k,
        params.algorithm,
        F::PRECISION
    );
    let overall_start_time = Instant::now();

    // 1) Gram matrix X^T X (n_cols x n_cols)
    let gram_matrix = x.t().dot(&x);
    if gram_matrix.iter().any(|v| !v.is_finite()) {
        return Err(TsvdError::NumericalFailure(
            "Gram matrix contains non-finite values; check the input for NaN or infinity".to_string(),
        ));
    }
    debug!("Formed {}x{} Gram matrix in {:?}", n_cols, n_cols, overall_start_time.elapsed());

    // 2) Symmetric eigendecomposition with the selected strategy
    let eig_start_time = Instant::now();
    let (eig, convergence) = match params.algorithm {
        Algorithm::EigDQ => {
            let eig = F::eigh_upper(&gram_matrix).map_err(|e| {
                TsvdError::NumericalFailure(format!("Eigen decomposition of Gram matrix failed: {}", e))
            })?;
            (eig, None)
        }
        Algorithm::Jacobi => {
            let (eig, report) =
                jacobi::symmetric_eigen(&gram_matrix, params.n_iterations, F::from_f64_lossy(params.tol))?;
            (eig, Some(report))
        }
    };
    debug!("Eigendecomposition ({}) finished in {:?}", params.algorithm, eig_start_time.elapsed());

    // 3) + 4) Top-K eigenpairs to singular values and right singular vectors
    let (components, eigenvalues) = select_top_components(eig, k)?;
    let singular_values = eigenvalues.mapv(|lambda| lambda.max(F::zero()).sqrt());

    let mut model = FittedModel {
        components,
        singular_values,
        explained_variance: None,
        explained_variance_ratio: None,
        mean: Array1::zeros(n_cols),
        n_rows,
        n_cols,
        algorithm: params.algorithm,
        convergence,
    };

    if !compute_extras {
        info!("Truncated SVD fit finished in {:?}", overall_start_time.elapsed());
        return Ok((model, None));
    }

    // 5) Projection, 6) explained variance, 7) ratio over retained components
    let transformed = x.dot(&model.components);
    let (explained_variance, explained_variance_ratio) = explained_variance_stats(&model.singular_values, n_rows);
    model.explained_variance = Some(explained_variance);
    model.explained_variance_ratio = Some(explained_variance_ratio);

    info!("Truncated SVD fit_transform finished in {:?}", overall_start_time.elapsed());
    Ok((model, Some(transformed)))
}

/// Fits a truncated SVD to `x` (shape (n_rows, n_cols)).
///
/// With `compute_extras = false` only the components and singular values are computed;
/// explained variance statistics are left as `None` and no projection is formed.
///
/// # Errors
/// `InvalidParameter` for out-of-range parameters (checked before any computation),
/// `NumericalFailure` if the eigensolver fails.
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use efficient_tsvd::{fit, TSVDParams};
///
/// let x = array![[1.0_f64, 4.0, 4.0], [2.0, 2.0, 2.0], [5.0, 1.0, 1.0]];
/// let model = fit(x.view(), &TSVDParams::new(2), false).unwrap();
/// assert_eq!(model.components().dim(), (3, 2));
/// ```
pub fn fit<F: TsvdFloat>(x: ArrayView2<F>, params: &TSVDParams, compute_extras: bool) -> Result<FittedModel<F>> {
    fit_impl(x, params, compute_extras).map(|(model, _)| model)
}

/// Fits a truncated SVD and returns the model together with `x` projected onto its components.
///
/// # Errors
/// Same as [`fit`].
pub fn fit_transform<F: TsvdFloat>(x: ArrayView2<F>, params: &TSVDParams) -> Result<(FittedModel<F>, Array2<F>)> {
    let (model, transformed) = fit_impl(x, params, true)?;
    let transformed = transformed.ok_or_else(|| {
        TsvdError::NumericalFailure("Internal error: projection was not computed".to_string())
    })?;
    Ok((model, transformed))
}

/// Projects `x` (shape (m, n_cols)) onto the fitted components, giving (m, n_components).
///
/// # Errors
/// `ShapeMismatch` if `x` does not have the model's column count.
pub fn transform<F: TsvdFloat>(x: ArrayView2<F>, model: &FittedModel<F>) -> Result<Array2<F>> {
    if x.ncols() != model.n_cols {
        return Err(TsvdError::ShapeMismatch {
            context: "transform input columns",
            expected: model.n_cols,
            got: x.ncols(),
        });
    }
    if x.nrows() == 0 {
        return Ok(Array2::zeros((0, model.n_components())));
    }
    Ok(x.dot(&model.components))
}

/// Maps `z` (shape (m, n_components)) back to the original space, giving (m, n_cols).
///
/// The reconstruction is exact only when `n_components == n_cols`.
///
/// # Errors
/// `ShapeMismatch` if `z` does not have `n_components` columns.
pub fn inverse_transform<F: TsvdFloat>(z: ArrayView2<F>, model: &FittedModel<F>) -> Result<Array2<F>> {
    if z.ncols() != model.n_components() {
        return Err(TsvdError::ShapeMismatch {
            context: "inverse_transform input columns",
            expected: model.n_components(),
            got: z.ncols(),
        });
    }
    if z.nrows() == 0 {
        return Ok(Array2::zeros((0, model.n_cols)));
    }
    Ok(z.dot(&model.components.t()))
}

/// Truncated SVD estimator.
///
/// Holds the configuration and, once fitted, the model. Calling `transform` or
/// `inverse_transform` before `fit` fails with `UnfittedModel`.
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use efficient_tsvd::{TruncatedSvd, TSVDParams};
///
/// let x = array![[1.0_f32, 4.0, 4.0], [2.0, 2.0, 2.0], [5.0, 1.0, 1.0]];
/// let mut tsvd = TruncatedSvd::new(TSVDParams::new(2));
/// let scores = tsvd.fit_transform(x.view()).unwrap();
/// assert_eq!(scores.dim(), (3, 2));
/// ```
#[derive(Clone, Debug)]
pub struct TruncatedSvd<F> {
    params: TSVDParams,
    model: Option<FittedModel<F>>,
}

impl<F: TsvdFloat> Default for TruncatedSvd<F> {
    fn default() -> Self {
        Self::new(TSVDParams::default())
    }
}

impl<F: TsvdFloat> TruncatedSvd<F> {
    /// Creates an unfitted estimator.
    pub fn new(params: TSVDParams) -> Self {
        Self { params, model: None }
    }

    pub fn params(&self) -> &TSVDParams {
        &self.params
    }

    /// The fitted model, or `None` before the first successful fit.
    pub fn model(&self) -> Option<&FittedModel<F>> {
        self.model.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    /// Fits components and singular values without computing the projection or variance statistics.
    ///
    /// On error the previously fitted model, if any, is kept.
    pub fn fit(&mut self, x: ArrayView2<F>) -> Result<&FittedModel<F>> {
        let model = fit(x, &self.params, false)?;
        Ok(self.install(model))
    }

    /// Fits the model and returns `x` projected onto the components.
    pub fn fit_transform(&mut self, x: ArrayView2<F>) -> Result<Array2<F>> {
        let (model, transformed) = fit_transform(x, &self.params)?;
        self.install(model);
        Ok(transformed)
    }

    pub fn transform(&self, x: ArrayView2<F>) -> Result<Array2<F>> {
        let model = self.model.as_ref().ok_or(TsvdError::UnfittedModel)?;
        transform(x, model)
    }

    pub fn inverse_transform(&self, z: ArrayView2<F>) -> Result<Array2<F>> {
        let model = self.model.as_ref().ok_or(TsvdError::UnfittedModel)?;
        inverse_transform(z, model)
    }

    pub fn get_params(&self) -> BTreeMap<String, ParamValue> {
        self.params.get_params()
    }

    /// Applies parameter updates. The fitted model, if any, is kept until the next fit.
    pub fn set_params<K: AsRef<str>>(&mut self, updates: &BTreeMap<K, ParamValue>) -> Result<&mut Self> {
        self.params = self.params.set_params(updates)?;
        Ok(self)
    }

    fn install(&mut self, model: FittedModel<F>) -> &FittedModel<F> {
        self.params.n_rows = Some(model.n_rows);
        self.params.n_cols = Some(model.n_cols);
        self.model.insert(model)
    }
}
