/// An error type for the linear algebra module.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum LinalgError {
    /// Error when a matrix that must be square is not.
    #[error("Matrix of shape {0}x{1} is not square")]
    NotSquare(usize, usize),

    /// Error when two matrices do not have compatible dimensions.
    #[error("Dimension mismatch, expected {expected} but found {found}")]
    DimensionMismatch {
        /// The expected dimension.
        expected: usize,
        /// The dimension found.
        found: usize,
    },

    /// Error when the right-hand matrix is not safely positive definite.
    #[error("Matrix is ill-conditioned (reciprocal condition number {rcond:e})")]
    IllConditioned {
        /// Ratio of the smallest to the largest eigenvalue.
        rcond: f64,
    },

    /// Error when a matrix holds NaN or infinite values.
    #[error("Matrix contains non-finite values")]
    NonFinite,
}
