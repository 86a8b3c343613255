use cellseg_imgproc::{
    color::ColorTransform,
    lft::{FeatureVector, NUM_CHANNELS, NUM_FEATURES, NUM_LFT},
};
use faer::{Mat, MatRef};
use serde::{Deserialize, Serialize};

use crate::SegmentationError;

/// Number of discriminant texture axes kept by the projection.
pub const NUM_AXES: usize = 3;

/// Length of a projected feature, discriminant axes times transformed channels.
pub const PROJECTED_DIM: usize = NUM_AXES * NUM_CHANNELS;

/// A feature projected into the discriminant space, `z[k * 3 + c]` is axis `k` of channel `c`.
pub type ProjectedFeature = [f64; PROJECTED_DIM];

/// The learned color transform `A` and texture projection `P`.
///
/// Both are stored row-major as plain nested arrays so they serialize to readable JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformPair {
    /// 3x3 color transform, `color[c][k]` weights RGB channel `c` into MDC channel `k`.
    pub color: ColorTransform,
    /// 8x3 texture projection, `texture[f][k]` weights texture feature `f` into axis `k`.
    pub texture: [[f64; NUM_AXES]; NUM_LFT],
}

impl TransformPair {
    /// Build the pair from a 3x3 color matrix and an 8x3 projection matrix.
    pub fn from_matrices(
        a: MatRef<'_, f64>,
        p: MatRef<'_, f64>,
    ) -> Result<Self, SegmentationError> {
        check_shape(a, NUM_CHANNELS, NUM_CHANNELS)?;
        check_shape(p, NUM_LFT, NUM_AXES)?;

        let mut pair = Self {
            color: [[0.0; NUM_CHANNELS]; NUM_CHANNELS],
            texture: [[0.0; NUM_AXES]; NUM_LFT],
        };
        for (i, row) in pair.color.iter_mut().enumerate() {
            for (j, x) in row.iter_mut().enumerate() {
                *x = a.read(i, j);
            }
        }
        for (i, row) in pair.texture.iter_mut().enumerate() {
            for (j, x) in row.iter_mut().enumerate() {
                *x = p.read(i, j);
            }
        }
        Ok(pair)
    }

    /// The color transform as a matrix.
    pub fn color_matrix(&self) -> Mat<f64> {
        Mat::from_fn(NUM_CHANNELS, NUM_CHANNELS, |i, j| self.color[i][j])
    }

    /// The texture projection as a matrix.
    pub fn texture_matrix(&self) -> Mat<f64> {
        Mat::from_fn(NUM_LFT, NUM_AXES, |i, j| self.texture[i][j])
    }

    /// Mix the channels of an RGB feature vector through the color transform.
    ///
    /// The texture features are linear in the pixel values, so the result equals the features
    /// of the color transformed image.
    pub fn mix_channels(&self, v: &FeatureVector) -> FeatureVector {
        let mut out = [0.0; NUM_FEATURES];
        for k in 0..NUM_CHANNELS {
            for f in 0..NUM_LFT {
                out[k * NUM_LFT + f] = (0..NUM_CHANNELS)
                    .map(|c| v[c * NUM_LFT + f] * self.color[c][k])
                    .sum();
            }
        }
        out
    }

    /// Project the features of a color transformed image onto the discriminant axes.
    ///
    /// `v` is channel-major with [`NUM_FEATURES`] values.
    pub fn project_mdc<T: Copy + Into<f64>>(&self, v: &[T]) -> ProjectedFeature {
        let mut z = [0.0; PROJECTED_DIM];
        for k in 0..NUM_AXES {
            for c in 0..NUM_CHANNELS {
                z[k * NUM_CHANNELS + c] = (0..NUM_LFT)
                    .map(|f| self.texture[f][k] * v[c * NUM_LFT + f].into())
                    .sum();
            }
        }
        z
    }

    /// Project an RGB feature vector, `Pᵀ Q A` flattened row-major.
    pub fn project(&self, v: &FeatureVector) -> ProjectedFeature {
        self.project_mdc(&self.mix_channels(v))
    }
}

fn check_shape(m: MatRef<'_, f64>, rows: usize, cols: usize) -> Result<(), SegmentationError> {
    if m.nrows() != rows {
        return Err(SegmentationError::DimensionMismatch {
            expected: rows,
            found: m.nrows(),
        });
    }
    if m.ncols() != cols {
        return Err(SegmentationError::DimensionMismatch {
            expected: cols,
            found: m.ncols(),
        });
    }
    Ok(())
}
