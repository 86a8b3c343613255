use cellseg_image::ImageError;
use cellseg_linalg::LinalgError;

use crate::fisher_rao::FisherRaoState;

/// An error type for the learning pipeline.
#[derive(thiserror::Error, Debug)]
pub enum SegmentationError {
    /// Error when an input violates a structural precondition.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error when a feature vector or matrix does not have the expected length.
    #[error("Dimension mismatch, expected {expected} but found {found}")]
    DimensionMismatch {
        /// The expected dimension.
        expected: usize,
        /// The dimension found.
        found: usize,
    },

    /// Error when a scatter matrix cannot be inverted safely.
    ///
    /// Carries the last consistent optimizer state when one exists.
    #[error("Ill-conditioned scatter matrix (reciprocal condition number {rcond:e})")]
    IllConditioned {
        /// Ratio of the smallest to the largest eigenvalue.
        rcond: f64,
        /// Last consistent optimizer state.
        state: Option<Box<FisherRaoState>>,
    },

    /// Error when the optimizer stopped without converging.
    #[error("No convergence after {iterations} iterations, last change {last_delta:e}")]
    NonConvergence {
        /// Number of completed alternations.
        iterations: usize,
        /// Change of the objective in the last alternation.
        last_delta: f64,
        /// Best state reached.
        state: Box<FisherRaoState>,
    },

    /// Error from the image layer.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Error from the linear algebra layer.
    #[error(transparent)]
    Linalg(LinalgError),
}

impl SegmentationError {
    /// Attach an optimizer state to an ill-conditioning error that has none yet.
    pub fn with_state(self, state: &FisherRaoState) -> Self {
        match self {
            SegmentationError::IllConditioned { rcond, state: None } => {
                SegmentationError::IllConditioned {
                    rcond,
                    state: Some(Box::new(state.clone())),
                }
            }
            other => other,
        }
    }
}

impl From<LinalgError> for SegmentationError {
    fn from(e: LinalgError) -> Self {
        match e {
            LinalgError::IllConditioned { rcond } => {
                SegmentationError::IllConditioned { rcond, state: None }
            }
            LinalgError::DimensionMismatch { expected, found } => {
                SegmentationError::DimensionMismatch { expected, found }
            }
            other => SegmentationError::Linalg(other),
        }
    }
}
