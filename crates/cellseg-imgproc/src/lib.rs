#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// color space transformations module.
pub mod color;

/// image cropping module.
pub mod crop;

/// histogram equalization module.
pub mod histogram;

/// integral feature maps for constant time neighborhood means.
pub mod integral;

/// local fourier-like texture features.
pub mod lft;

/// module containing parallelization utilities.
pub mod parallel;
