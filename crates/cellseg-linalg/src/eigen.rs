//! Symmetric-definite generalized eigenproblem `A v = λ B v`.
//!
//! `B` is whitened through its own eigendecomposition, `C = B^{-1/2} A B^{-1/2}`, and the
//! eigenvectors of `C` are mapped back with `V = B^{-1/2} W`. The returned eigenvectors are
//! therefore `B`-orthonormal, `Vᵀ B V = I`.
//!
//! Normalization of the output:
//! * eigenvalues in descending order, eigenvectors in the matching columns;
//! * the largest-magnitude entry of every eigenvector is positive (first one on ties).

use faer::{Mat, MatRef, Side};

use crate::LinalgError;

/// Smallest accepted ratio between the smallest and largest eigenvalue of `B`.
pub const MIN_RCOND: f64 = 1e-12;

/// Result of a generalized eigen decomposition.
#[derive(Debug, Clone)]
pub struct GeneralizedEigen {
    /// Eigenvalues in descending order.
    pub values: Vec<f64>,
    /// Eigenvectors stored as columns, in the order of `values`.
    pub vectors: Mat<f64>,
}

impl GeneralizedEigen {
    /// Keep only the eigenvectors of the `k` largest eigenvalues.
    pub fn top(&self, k: usize) -> Mat<f64> {
        let k = k.min(self.vectors.ncols());
        Mat::from_fn(self.vectors.nrows(), k, |i, j| self.vectors.read(i, j))
    }
}

fn check_square(m: MatRef<'_, f64>) -> Result<usize, LinalgError> {
    if m.nrows() != m.ncols() {
        return Err(LinalgError::NotSquare(m.nrows(), m.ncols()));
    }
    for j in 0..m.ncols() {
        for i in 0..m.nrows() {
            if !m.read(i, j).is_finite() {
                return Err(LinalgError::NonFinite);
            }
        }
    }
    Ok(m.nrows())
}

fn symmetrize(m: MatRef<'_, f64>) -> Mat<f64> {
    Mat::from_fn(m.nrows(), m.ncols(), |i, j| 0.5 * (m.read(i, j) + m.read(j, i)))
}

/// Compute `B^{-1/2}` of a symmetric positive definite matrix.
///
/// # Errors
///
/// Returns [`LinalgError::IllConditioned`] if `B` has a non-positive eigenvalue or its
/// reciprocal condition number is below [`MIN_RCOND`].
pub fn inverse_sqrt(b: MatRef<'_, f64>) -> Result<Mat<f64>, LinalgError> {
    let n = check_square(b)?;
    if n == 0 {
        return Ok(Mat::zeros(0, 0));
    }

    let eig = symmetrize(b).selfadjoint_eigendecomposition(Side::Lower);
    let lambda = eig.s().column_vector();
    let u = eig.u();

    // ascending order
    let (min, max) = (lambda.read(0), lambda.read(n - 1));
    let rcond = if max > 0.0 { min / max } else { 0.0 };
    if min <= 0.0 || rcond < MIN_RCOND {
        return Err(LinalgError::IllConditioned { rcond });
    }

    let inv_sqrt = (0..n).map(|k| 1.0 / lambda.read(k).sqrt()).collect::<Vec<_>>();
    Ok(Mat::from_fn(n, n, |i, j| {
        (0..n).map(|k| u.read(i, k) * u.read(j, k) * inv_sqrt[k]).sum()
    }))
}

/// Solve `A v = λ B v` for symmetric `A` and symmetric positive definite `B`.
///
/// # Arguments
///
/// * `a` - The symmetric left-hand matrix.
/// * `b` - The symmetric positive definite right-hand matrix.
///
/// # Errors
///
/// Returns an error if the matrices are not square, have different sizes, hold non-finite
/// values, or if `B` is ill-conditioned.
///
/// # Example
///
/// ```
/// use cellseg_linalg::eigen::generalized_symmetric_eigen;
///
/// let a = faer::mat![[1.0, 0.0], [0.0, 4.0]];
/// let b = faer::mat![[1.0, 0.0], [0.0, 2.0]];
///
/// let eig = generalized_symmetric_eigen(a.as_ref(), b.as_ref()).unwrap();
/// assert!((eig.values[0] - 2.0).abs() < 1e-12);
/// assert!((eig.values[1] - 1.0).abs() < 1e-12);
/// ```
pub fn generalized_symmetric_eigen(
    a: MatRef<'_, f64>,
    b: MatRef<'_, f64>,
) -> Result<GeneralizedEigen, LinalgError> {
    let n = check_square(a)?;
    let nb = check_square(b)?;
    if n != nb {
        return Err(LinalgError::DimensionMismatch {
            expected: n,
            found: nb,
        });
    }

    let b_inv_sqrt = inverse_sqrt(b)?;
    if n == 0 {
        return Ok(GeneralizedEigen {
            values: Vec::new(),
            vectors: Mat::zeros(0, 0),
        });
    }

    let a_sym = symmetrize(a);
    let whitened = b_inv_sqrt.as_ref() * a_sym.as_ref();
    let c = symmetrize((whitened.as_ref() * b_inv_sqrt.as_ref()).as_ref());

    let eig = c.selfadjoint_eigendecomposition(Side::Lower);
    let lambda = eig.s().column_vector();
    let w = b_inv_sqrt.as_ref() * eig.u();

    let values = (0..n).rev().map(|k| lambda.read(k)).collect::<Vec<_>>();
    let mut vectors = Mat::from_fn(n, n, |i, j| w.read(i, n - 1 - j));
    normalize_signs(&mut vectors);

    Ok(GeneralizedEigen { values, vectors })
}

/// Flip every column so that its largest-magnitude entry is positive.
fn normalize_signs(vectors: &mut Mat<f64>) {
    for j in 0..vectors.ncols() {
        let mut pivot = 0;
        for i in 1..vectors.nrows() {
            if vectors.read(i, j).abs() > vectors.read(pivot, j).abs() {
                pivot = i;
            }
        }
        if vectors.nrows() > 0 && vectors.read(pivot, j) < 0.0 {
            for i in 0..vectors.nrows() {
                vectors.write(i, j, -vectors.read(i, j));
            }
        }
    }
}

/// Compute `tr(B⁻¹ A)` for symmetric `A` and symmetric positive definite `B`.
///
/// This is the sum of the generalized eigenvalues of the pair and is used as a scatter ratio.
pub fn ratio_trace(a: MatRef<'_, f64>, b: MatRef<'_, f64>) -> Result<f64, LinalgError> {
    Ok(generalized_symmetric_eigen(a, b)?.values.iter().sum())
}
