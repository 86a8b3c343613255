use cellseg_image::Image;
use cellseg_imgproc::lft::{mean_features, FeatureVector, NUM_CHANNELS, NUM_FEATURES, NUM_LFT};
use faer::Mat;
use rayon::prelude::*;

use crate::SegmentationError;

/// Length of the feature vector of a sample.
pub const FEATURE_DIM: usize = NUM_FEATURES;

/// Minimum number of samples each class needs to estimate its scatter.
pub const MIN_SAMPLES_PER_CLASS: usize = 2;

/// Class label of a sample or pixel.
pub type Label = u8;

/// Label of extra-cellular samples.
pub const NEGATIVE: Label = 0;

/// Label of cellular samples.
pub const POSITIVE: Label = 1;

/// Feature vectors of the labeled training samples, split by class.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    positive: Vec<FeatureVector>,
    negative: Vec<FeatureVector>,
}

impl SampleSet {
    /// Create a sample set from the feature vectors of each class.
    ///
    /// # Errors
    ///
    /// Returns an error if a class has fewer than two samples or a feature is not finite.
    pub fn new(
        positive: Vec<FeatureVector>,
        negative: Vec<FeatureVector>,
    ) -> Result<Self, SegmentationError> {
        for (name, class) in [("positive", &positive), ("negative", &negative)] {
            if class.len() < MIN_SAMPLES_PER_CLASS {
                return Err(SegmentationError::InvalidInput(format!(
                    "{name} class has {} samples, at least {MIN_SAMPLES_PER_CLASS} are required",
                    class.len()
                )));
            }
            if class.iter().flatten().any(|v| !v.is_finite()) {
                return Err(SegmentationError::InvalidInput(format!(
                    "{name} class contains non-finite features"
                )));
            }
        }

        Ok(Self { positive, negative })
    }

    /// Create a sample set from rows of unchecked length.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::DimensionMismatch`] if a row does not hold exactly
    /// [`FEATURE_DIM`] values, plus the errors of [`SampleSet::new`].
    pub fn from_rows(
        positive: &[Vec<f64>],
        negative: &[Vec<f64>],
    ) -> Result<Self, SegmentationError> {
        fn to_features(rows: &[Vec<f64>]) -> Result<Vec<FeatureVector>, SegmentationError> {
            rows.iter()
                .map(|row| {
                    FeatureVector::try_from(row.as_slice()).map_err(|_| {
                        SegmentationError::DimensionMismatch {
                            expected: FEATURE_DIM,
                            found: row.len(),
                        }
                    })
                })
                .collect()
        }

        Self::new(to_features(positive)?, to_features(negative)?)
    }

    /// Create a sample set from the mean texture features of labeled color patches.
    pub fn from_patches(
        positive: &[Image<f32, 3>],
        negative: &[Image<f32, 3>],
    ) -> Result<Self, SegmentationError> {
        fn to_features(patches: &[Image<f32, 3>]) -> Result<Vec<FeatureVector>, SegmentationError> {
            patches
                .par_iter()
                .map(|patch| Ok(mean_features(patch)?))
                .collect()
        }

        Self::new(to_features(positive)?, to_features(negative)?)
    }

    /// Feature vectors of the cellular class.
    pub fn positive(&self) -> &[FeatureVector] {
        &self.positive
    }

    /// Feature vectors of the extra-cellular class.
    pub fn negative(&self) -> &[FeatureVector] {
        &self.negative
    }

    /// Both classes with their labels.
    pub fn classes(&self) -> [(Label, &[FeatureVector]); 2] {
        [(POSITIVE, &self.positive), (NEGATIVE, &self.negative)]
    }

    /// Total number of samples.
    pub fn len(&self) -> usize {
        self.positive.len() + self.negative.len()
    }

    /// Whether the set holds no samples. Never true for a validated set.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// View a channel-major feature vector as the 8x3 matrix `Q[f][c]`.
pub fn feature_matrix(v: &FeatureVector) -> Mat<f64> {
    Mat::from_fn(NUM_LFT, NUM_CHANNELS, |f, c| v[c * NUM_LFT + f])
}

/// Mean of a list of feature vectors.
pub(crate) fn mean_vector(vectors: &[FeatureVector]) -> FeatureVector {
    let mut mean = [0.0; FEATURE_DIM];
    for v in vectors {
        mean.iter_mut().zip(v.iter()).for_each(|(m, x)| *m += x);
    }
    let n = vectors.len().max(1) as f64;
    mean.iter_mut().for_each(|m| *m /= n);
    mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellseg_image::ImageSize;

    #[test]
    fn test_sample_set_validation() {
        let v = [1.0; FEATURE_DIM];
        assert!(SampleSet::new(vec![v, v], vec![v, v]).is_ok());
        assert!(matches!(
            SampleSet::new(vec![v], vec![v, v]),
            Err(SegmentationError::InvalidInput(_))
        ));

        let mut bad = v;
        bad[3] = f64::NAN;
        assert!(matches!(
            SampleSet::new(vec![v, v], vec![v, bad]),
            Err(SegmentationError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_sample_set_from_rows() {
        let good = vec![0.5; FEATURE_DIM];
        let short = vec![0.5; FEATURE_DIM - 1];
        let res = SampleSet::from_rows(&[good.clone(), short], &[good.clone(), good.clone()]);
        assert!(matches!(
            res,
            Err(SegmentationError::DimensionMismatch {
                expected: 24,
                found: 23
            })
        ));

        let set = SampleSet::from_rows(&[good.clone(), good.clone()], &[good.clone(), good])
            .expect("valid rows");
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_sample_set_from_patches() -> Result<(), SegmentationError> {
        let size = ImageSize {
            width: 11,
            height: 11,
        };
        let bright = Image::<f32, 3>::from_size_val(size, 1.0)?;
        let dark = Image::<f32, 3>::from_size_val(size, 0.0)?;

        let set = SampleSet::from_patches(&[bright.clone(), bright], &[dark.clone(), dark])?;
        // a constant patch sums its eight neighbors in the first feature of every channel
        assert_eq!(set.positive()[0][0], 8.0);
        assert_eq!(set.positive()[0][NUM_LFT], 8.0);
        assert_eq!(set.negative()[1][0], 0.0);

        let tiny = Image::<f32, 3>::from_size_val([2, 2].into(), 0.0)?;
        assert!(matches!(
            SampleSet::from_patches(&[tiny.clone(), tiny], &[]),
            Err(SegmentationError::Image(_))
        ));
        Ok(())
    }

    #[test]
    fn test_feature_matrix_layout() {
        let mut v = [0.0; FEATURE_DIM];
        for (i, x) in v.iter_mut().enumerate() {
            *x = i as f64;
        }
        let q = feature_matrix(&v);
        assert_eq!((q.nrows(), q.ncols()), (8, 3));
        assert_eq!(q.read(0, 0), 0.0);
        assert_eq!(q.read(7, 0), 7.0);
        assert_eq!(q.read(0, 1), 8.0);
        assert_eq!(q.read(5, 2), 21.0);
    }
}
