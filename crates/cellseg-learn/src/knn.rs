use std::collections::BTreeMap;

use cellseg_image::{Image, ImageError};
use cellseg_imgproc::parallel;
use serde::{Deserialize, Serialize};

use crate::{
    kmeans::squared_distance,
    sample::{Label, NEGATIVE, POSITIVE},
    transform::{ProjectedFeature, PROJECTED_DIM},
    SegmentationError,
};

/// Color of the extra-cellular class in the rendered segmentation.
pub const NEGATIVE_COLOR: [u8; 3] = [0, 0, 255];

/// Color of the cellular class in the rendered segmentation.
pub const POSITIVE_COLOR: [u8; 3] = [0, 255, 0];

/// Labeled prototypes in the projected feature space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prototypes {
    points: Vec<ProjectedFeature>,
    labels: Vec<Label>,
}

impl Prototypes {
    /// Create an empty prototype set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the prototypes of one class.
    pub fn push_class(&mut self, label: Label, points: &[ProjectedFeature]) {
        self.points.extend_from_slice(points);
        self.labels.extend(std::iter::repeat(label).take(points.len()));
    }

    /// The prototype points.
    pub fn points(&self) -> &[ProjectedFeature] {
        &self.points
    }

    /// The label of each prototype point.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Number of prototypes.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the set holds no prototypes.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Majority label among the `k` nearest prototypes, `k` already validated and clamped.
    fn vote(&self, feature: &ProjectedFeature, k: usize) -> Label {
        let mut neighbors = self
            .points
            .iter()
            .zip(self.labels.iter())
            .map(|(p, &l)| (squared_distance(p, feature), l))
            .collect::<Vec<_>>();
        neighbors.sort_by(|a, b| a.0.total_cmp(&b.0));

        // label -> (votes, summed distance)
        let mut votes = BTreeMap::<Label, (usize, f64)>::new();
        for &(dist, label) in neighbors.iter().take(k) {
            let entry = votes.entry(label).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += dist;
        }

        let mut best: Option<(Label, usize, f64)> = None;
        for (&label, &(count, dist)) in votes.iter() {
            best = match best {
                Some((_, best_count, best_dist))
                    if count < best_count || (count == best_count && dist >= best_dist) =>
                {
                    best
                }
                _ => Some((label, count, dist)),
            };
        }

        best.map(|(label, _, _)| label).unwrap_or(NEGATIVE)
    }

    fn check(&self, k: usize) -> Result<usize, SegmentationError> {
        if self.is_empty() {
            return Err(SegmentationError::InvalidInput(
                "the prototype set is empty".into(),
            ));
        }
        if k == 0 {
            return Err(SegmentationError::InvalidInput(
                "the number of neighbors must be greater than zero".into(),
            ));
        }
        Ok(k.min(self.len()))
    }
}

/// Label a projected feature by majority vote among its `k` nearest prototypes.
///
/// Distances are squared Euclidean. Ties between labels are broken by the smallest summed
/// distance, then by the lower label. `k` is clamped to the number of prototypes.
///
/// # Errors
///
/// Returns an error if `k` is zero, the prototype set is empty, or the feature does not have
/// [`PROJECTED_DIM`] values.
pub fn classify(
    prototypes: &Prototypes,
    feature: &[f64],
    k: usize,
) -> Result<Label, SegmentationError> {
    let k = prototypes.check(k)?;
    let feature = ProjectedFeature::try_from(feature).map_err(|_| {
        SegmentationError::DimensionMismatch {
            expected: PROJECTED_DIM,
            found: feature.len(),
        }
    })?;
    Ok(prototypes.vote(&feature, k))
}

/// Label every pixel of an image of projected features.
///
/// Pixels are classified independently and in parallel.
pub fn classify_image(
    prototypes: &Prototypes,
    features: &Image<f32, PROJECTED_DIM>,
    k: usize,
) -> Result<Image<Label, 1>, SegmentationError> {
    let k = prototypes.check(k)?;

    let mut labels = Image::<Label, 1>::from_size_val(features.size(), NEGATIVE)?;
    parallel::par_iter_rows(features, &mut labels, |src_pixel, dst_pixel| {
        let mut feature = [0.0; PROJECTED_DIM];
        feature
            .iter_mut()
            .zip(src_pixel.iter())
            .for_each(|(f, &v)| *f = v as f64);
        dst_pixel[0] = prototypes.vote(&feature, k);
    });

    Ok(labels)
}

/// Render a label image, extra-cellular pixels blue and cellular pixels green.
///
/// Any other label is rendered black.
///
/// Precondition: the input and output images must have the same size.
pub fn colorize_labels(labels: &Image<Label, 1>, dst: &mut Image<u8, 3>) -> Result<(), ImageError> {
    if labels.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            labels.cols(),
            labels.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    parallel::par_iter_rows(labels, dst, |src_pixel, dst_pixel| {
        let color = match src_pixel[0] {
            NEGATIVE => NEGATIVE_COLOR,
            POSITIVE => POSITIVE_COLOR,
            _ => [0, 0, 0],
        };
        dst_pixel.copy_from_slice(&color);
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellseg_image::ImageSize;

    fn point(x: f64) -> ProjectedFeature {
        let mut p = [0.0; PROJECTED_DIM];
        p[0] = x;
        p
    }

    fn line_prototypes() -> Prototypes {
        let mut prototypes = Prototypes::new();
        prototypes.push_class(NEGATIVE, &[point(0.0), point(1.0), point(2.0)]);
        prototypes.push_class(POSITIVE, &[point(10.0), point(11.0), point(12.0)]);
        prototypes
    }

    #[test]
    fn test_classify_majority() -> Result<(), SegmentationError> {
        let prototypes = line_prototypes();
        assert_eq!(classify(&prototypes, &point(1.5), 3)?, NEGATIVE);
        assert_eq!(classify(&prototypes, &point(9.0), 3)?, POSITIVE);
        // clamped to all six prototypes, the tie goes to the closer class
        assert_eq!(classify(&prototypes, &point(7.0), 100)?, POSITIVE);
        Ok(())
    }

    #[test]
    fn test_classify_tie_breaks() -> Result<(), SegmentationError> {
        let mut prototypes = Prototypes::new();
        prototypes.push_class(POSITIVE, &[point(-1.0)]);
        prototypes.push_class(NEGATIVE, &[point(1.0)]);
        // equal votes and equal distances, the lower label wins
        assert_eq!(classify(&prototypes, &point(0.0), 2)?, NEGATIVE);
        // equal votes, the smaller summed distance wins
        assert_eq!(classify(&prototypes, &point(-0.5), 2)?, POSITIVE);
        Ok(())
    }

    #[test]
    fn test_classify_errors() {
        let prototypes = line_prototypes();
        assert!(matches!(
            classify(&prototypes, &point(0.0), 0),
            Err(SegmentationError::InvalidInput(_))
        ));
        assert!(matches!(
            classify(&Prototypes::new(), &point(0.0), 3),
            Err(SegmentationError::InvalidInput(_))
        ));
        assert!(matches!(
            classify(&prototypes, &[0.0; 4], 3),
            Err(SegmentationError::DimensionMismatch {
                expected: 9,
                found: 4
            })
        ));
    }

    #[test]
    fn test_classify_image_and_colorize() -> Result<(), SegmentationError> {
        let prototypes = line_prototypes();
        let size = ImageSize {
            width: 3,
            height: 2,
        };
        let features = Image::<f32, PROJECTED_DIM>::from_fn(size, |_, x, c| {
            if c == 0 {
                (x * 6) as f32
            } else {
                0.0
            }
        });

        let labels = classify_image(&prototypes, &features, 3)?;
        assert_eq!(labels.as_slice(), &[0, 0, 1, 0, 0, 1]);

        let mut colors = Image::<u8, 3>::from_size_val(size, 0)?;
        colorize_labels(&labels, &mut colors)?;
        assert_eq!(colors.pixel(0, 0), Some(&NEGATIVE_COLOR[..]));
        assert_eq!(colors.pixel(2, 1), Some(&POSITIVE_COLOR[..]));
        Ok(())
    }
}
