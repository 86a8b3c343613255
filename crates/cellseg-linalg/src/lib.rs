#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Module to assemble block-diagonal matrices.
pub mod block;

/// Module to solve the symmetric-definite generalized eigenproblem.
pub mod eigen;

mod error;
pub use error::LinalgError;
