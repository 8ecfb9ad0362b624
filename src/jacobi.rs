//! Bounded cyclic Jacobi eigensolver for symmetric matrices.
//!
//! Each sweep visits every upper-triangular pair `(p, q)` once and applies the rotation
//! that zeroes `a[p, q]`. Sweeps stop as soon as the largest off-diagonal magnitude drops
//! below the tolerance, or when the sweep cap is reached. Hitting the cap is not an error:
//! the partially diagonalised matrix is returned as a best-effort decomposition.
//!
//! References
//! * G. H. Golub and C. F. Van Loan, "Matrix Computations", 4th ed., section 8.5.

use crate::error::{Result, TsvdError};
use crate::linalg_backends::{EighOutput, TsvdFloat};
use log::{debug, trace, warn};
use ndarray::{s, Array1, Array2, Zip};
use serde::{Deserialize, Serialize};

/// Gram matrices at least this wide rotate eigenvector columns in parallel.
const PARALLEL_ROTATION_MIN_DIM: usize = 512;

/// Outcome of a Jacobi run, kept on the fitted model.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct JacobiConvergence {
    /// Number of full sweeps performed.
    pub sweeps: usize,
    /// Largest absolute off-diagonal entry when iteration stopped.
    pub max_off_diagonal: f64,
    /// Whether `max_off_diagonal < tol` was reached within the sweep cap.
    pub converged: bool,
}

/// Largest absolute value strictly above the diagonal.
fn max_off_diagonal<F: TsvdFloat>(a: &Array2<F>) -> F {
    let n = a.nrows();
    let mut max_abs = F::zero();
    for p in 0..n {
        for q in (p + 1)..n {
            max_abs = max_abs.max(a[[p, q]].abs());
        }
    }
    max_abs
}

/// Computes `(c, s)` of the rotation zeroing `a_pq` of the 2x2 block `[[a_pp, a_pq], [a_pq, a_qq]]`,
/// together with `t = s / c`.
fn rotation_for<F: TsvdFloat>(a_pp: F, a_qq: F, a_pq: F) -> (F, F, F) {
    let two = F::one() + F::one();
    let theta = (a_qq - a_pp) / (two * a_pq);
    // Smaller root of t^2 + 2 theta t - 1 = 0; stays finite when theta^2 overflows.
    let t = if theta.abs() > F::max_value().sqrt() {
        F::one() / (two * theta)
    } else {
        let magnitude = F::one() / (theta.abs() + (theta * theta + F::one()).sqrt());
        if theta >= F::zero() { magnitude } else { -magnitude }
    };
    let c = F::one() / (t * t + F::one()).sqrt();
    (c, t * c, t)
}

/// Applies the rotation in the `(p, q)` plane to the symmetric working matrix, in place.
fn rotate_symmetric<F: TsvdFloat>(a: &mut Array2<F>, p: usize, q: usize, c: F, s: F, t: F) {
    let n = a.nrows();
    let a_pp = a[[p, p]];
    let a_qq = a[[q, q]];
    let a_pq = a[[p, q]];
    for r in 0..n {
        if r == p || r == q {
            continue;
        }
        let a_rp = a[[r, p]];
        let a_rq = a[[r, q]];
        let new_rp = c * a_rp - s * a_rq;
        let new_rq = s * a_rp + c * a_rq;
        a[[r, p]] = new_rp;
        a[[p, r]] = new_rp;
        a[[r, q]] = new_rq;
        a[[q, r]] = new_rq;
    }
    a[[p, p]] = a_pp - t * a_pq;
    a[[q, q]] = a_qq + t * a_pq;
    a[[p, q]] = F::zero();
    a[[q, p]] = F::zero();
}

/// Accumulates the rotation into columns `p` and `q` of the eigenvector matrix.
fn rotate_columns<F: TsvdFloat>(v: &mut Array2<F>, p: usize, q: usize, c: F, s: F) {
    let parallel = v.nrows() >= PARALLEL_ROTATION_MIN_DIM;
    let (col_p, col_q) = v.multi_slice_mut((s![.., p], s![.., q]));
    let zip = Zip::from(col_p).and(col_q);
    let update = |v_p: &mut F, v_q: &mut F| {
        let old_p = *v_p;
        let old_q = *v_q;
        *v_p = c * old_p - s * old_q;
        *v_q = s * old_p + c * old_q;
    };
    if parallel {
        zip.par_for_each(update);
    } else {
        zip.for_each(update);
    }
}

/// Eigendecomposition of the symmetric matrix `matrix` by cyclic Jacobi sweeps.
///
/// Only the upper triangle of `matrix` is read. Eigenvalues are returned in ascending order,
/// matching the backend solvers, with eigenvectors as columns.
///
/// * `max_sweeps` - Upper bound on the number of sweeps; iteration always terminates.
/// * `tol` - Iteration stops once the largest off-diagonal magnitude is below `tol`.
///   Rotations for entries already below `tol` are skipped.
///
/// # Errors
/// Returns `NumericalFailure` if the matrix is not square or non-finite values appear.
pub fn symmetric_eigen<F: TsvdFloat>(
    matrix: &Array2<F>,
    max_sweeps: usize,
    tol: F,
) -> Result<(EighOutput<F>, JacobiConvergence)> {
    let n = matrix.nrows();
    if matrix.ncols() != n {
        return Err(TsvdError::NumericalFailure(format!(
            "Jacobi eigensolver needs a square matrix, got {}x{}",
            n,
            matrix.ncols()
        )));
    }

    // Mirror the upper triangle so that both halves agree exactly.
    let mut a = matrix.clone();
    for p in 0..n {
        for q in (p + 1)..n {
            a[[q, p]] = a[[p, q]];
        }
    }
    let mut v = Array2::<F>::eye(n);

    let mut sweeps = 0;
    let mut off = max_off_diagonal(&a);
    while off >= tol && off > F::zero() && sweeps < max_sweeps {
        for p in 0..n {
            for q in (p + 1)..n {
                let a_pq = a[[p, q]];
                if a_pq == F::zero() || a_pq.abs() < tol {
                    continue;
                }
                let (c, s, t) = rotation_for(a[[p, p]], a[[q, q]], a_pq);
                rotate_symmetric(&mut a, p, q, c, s, t);
                rotate_columns(&mut v, p, q, c, s);
            }
        }
        sweeps += 1;
        off = max_off_diagonal(&a);
        if !off.is_finite() {
            return Err(TsvdError::NumericalFailure(format!(
                "Jacobi sweep {} produced non-finite off-diagonal entries",
                sweeps
            )));
        }
        trace!("Jacobi sweep {}: max off-diagonal = {}", sweeps, off);
    }

    let converged = off < tol || off == F::zero();
    let off_f64 = off.to_f64().unwrap_or(f64::NAN);
    if converged {
        debug!("Jacobi converged after {} sweeps (max off-diagonal {:e}).", sweeps, off_f64);
    } else {
        warn!(
            "Jacobi stopped at the sweep cap ({}) before reaching tol; max off-diagonal = {:e}. Returning best-effort result.",
            max_sweeps, off_f64
        );
    }

    let diagonal: Array1<F> = a.diag().to_owned();
    if diagonal.iter().any(|d| !d.is_finite()) {
        return Err(TsvdError::NumericalFailure(
            "Jacobi eigensolver produced non-finite eigenvalues".to_string(),
        ));
    }

    // Ascending order, ties kept in index order.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        diagonal[i]
            .partial_cmp(&diagonal[j])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let eigenvalues = Array1::from_iter(order.iter().map(|&i| diagonal[i]));
    let eigenvectors = v.select(ndarray::Axis(1), &order);

    Ok((
        EighOutput { eigenvalues, eigenvectors },
        JacobiConvergence {
            sweeps,
            max_off_diagonal: off_f64,
            converged,
        },
    ))
}

#[cfg(test)]
mod jacobi_tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_jacobi_2x2_closed_form() {
        let matrix = array![[2.0_f64, 1.0], [1.0, 3.0]];
        let (out, report) = symmetric_eigen(&matrix, 10, 1e-14).unwrap();
        let sqrt5 = 5.0_f64.sqrt();
        assert_abs_diff_eq!(out.eigenvalues[0], (5.0 - sqrt5) / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.eigenvalues[1], (5.0 + sqrt5) / 2.0, epsilon = 1e-12);
        assert!(report.converged);
        assert_eq!(report.sweeps, 1);
    }

    #[test]
    fn test_jacobi_reconstructs_random_symmetric() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let n = 8;
        let b = Array2::from_shape_fn((n, n), |_| rng.gen_range(-1.0..1.0));
        let sym = b.t().dot(&b);
        let (out, report) = symmetric_eigen(&sym, 50, 1e-12).unwrap();
        assert!(report.converged);

        // V diag(lambda) V^T == A
        let v = &out.eigenvectors;
        let reconstructed = v.dot(&Array2::from_diag(&out.eigenvalues)).dot(&v.t());
        for (x, y) in reconstructed.iter().zip(sym.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-9);
        }
        // V is orthogonal.
        let vtv = v.t().dot(v);
        for i in 0..n {
            for j in 0..n {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(vtv[[i, j]], expected, epsilon = 1e-10);
            }
        }
        // Ascending.
        for w in out.eigenvalues.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[test]
    fn test_jacobi_matches_backend() {
        let matrix = array![[30.0_f64, 13.0, 13.0], [13.0, 21.0, 21.0], [13.0, 21.0, 21.0]];
        let (jac, _) = symmetric_eigen(&matrix, 20, 1e-12).unwrap();
        let backend = f64::eigh_upper(&matrix).unwrap();
        for i in 0..3 {
            assert_abs_diff_eq!(jac.eigenvalues[i], backend.eigenvalues[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_jacobi_respects_sweep_cap() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let n = 12;
        let b = Array2::from_shape_fn((n, n), |_| rng.gen_range(-1.0..1.0));
        let sym = b.t().dot(&b);
        let (out, report) = symmetric_eigen(&sym, 1, 0.0).unwrap();
        assert_eq!(report.sweeps, 1);
        assert!(!report.converged);
        assert!(report.max_off_diagonal > 0.0);
        assert_eq!(out.eigenvalues.len(), n);
    }

    #[test]
    fn test_jacobi_diagonal_input_needs_no_sweeps() {
        let matrix = array![[3.0_f32, 0.0], [0.0, 1.0]];
        let (out, report) = symmetric_eigen(&matrix, 5, 1e-6).unwrap();
        assert_eq!(report.sweeps, 0);
        assert!(report.converged);
        assert_eq!(out.eigenvalues.to_vec(), vec![1.0, 3.0]);
        // Eigenvector for 1.0 is e_1.
        assert_eq!(out.eigenvectors[[1, 0]], 1.0);
    }

    #[test]
    fn test_jacobi_huge_diagonal_gap_stays_finite() {
        // theta = (a_qq - a_pp) / (2 a_pq) exceeds sqrt(f64::MAX) in the first case and
        // overflows to infinity in the second.
        for (a_pq, expected_small) in [(1e40_f64, -1e-120_f64), (1e-200, 0.0)] {
            let matrix = array![[1e200_f64, a_pq], [a_pq, 0.0]];
            let (out, report) = symmetric_eigen(&matrix, 5, 0.0).unwrap();
            assert!(report.converged);
            assert_eq!(report.sweeps, 1);
            assert!(out.eigenvalues.iter().all(|v| v.is_finite()));
            assert!(out.eigenvectors.iter().all(|v| v.is_finite()));
            assert_abs_diff_eq!(out.eigenvalues[0], expected_small, epsilon = 1e-130);
            assert_abs_diff_eq!(out.eigenvalues[1] / 1e200, 1.0, epsilon = 1e-12);

            let v = &out.eigenvectors;
            let vtv = v.t().dot(v);
            for i in 0..2 {
                for j in 0..2 {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert_abs_diff_eq!(vtv[[i, j]], expected, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_jacobi_rejects_non_square() {
        let matrix = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            symmetric_eigen(&matrix, 5, 1e-6),
            Err(TsvdError::NumericalFailure(_))
        ));
    }
}
