#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for the learning pipeline.
pub mod error;

/// Fisher-Rao optimization of the color transform and texture projection.
pub mod fisher_rao;

/// k-means prototype reduction.
pub mod kmeans;

/// k-nearest-neighbor pixel classification.
pub mod knn;

/// Labeled feature samples.
pub mod sample;

/// Training and segmentation of full images.
pub mod segmenter;

/// Learned color transform and texture projection pair.
pub mod transform;

pub use error::SegmentationError;
