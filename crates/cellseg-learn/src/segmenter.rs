use cellseg_image::{Image, ImageError, ImageSize};
use cellseg_imgproc::{
    color::mdc_from_rgb, crop::crop_image, histogram::equalize_histogram_rgb,
    integral::IntegralFeatureMap, lft::mean_features, parallel,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    fisher_rao::{self, FisherRaoParams, OptimizationStatus},
    kmeans::{self, KMeansParams},
    knn::{self, Prototypes},
    sample::{Label, SampleSet, POSITIVE},
    transform::{ProjectedFeature, TransformPair, PROJECTED_DIM},
    SegmentationError,
};

/// Configuration of the training and segmentation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Side of the square sample patches and of the neighborhood averaged per pixel.
    pub window_size: usize,
    /// Number of prototypes kept per class.
    pub prototypes_per_class: usize,
    /// Number of neighbors voting for the label of a pixel.
    pub neighbors: usize,
    /// Equalize the histogram of each color channel before extracting features.
    pub equalize_histogram: bool,
    /// Parameters of the color and texture optimization.
    pub fisher_rao: FisherRaoParams,
    /// Parameters of the prototype reduction.
    pub kmeans: KMeansParams,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            window_size: 11,
            prototypes_per_class: 20,
            neighbors: 9,
            equalize_histogram: false,
            fisher_rao: FisherRaoParams::default(),
            kmeans: KMeansParams::default(),
        }
    }
}

/// Labels of a segmented image and their color rendering.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Label of every pixel.
    pub labels: Image<Label, 1>,
    /// Extra-cellular pixels in blue, cellular pixels in green.
    pub colors: Image<u8, 3>,
}

/// A trained segmentation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segmenter {
    config: SegmenterConfig,
    transform: TransformPair,
    prototypes: Prototypes,
    objective_trace: Vec<f64>,
    status: OptimizationStatus,
}

impl Segmenter {
    /// Train a model from labeled color patches with values in `[0, 1]`.
    ///
    /// Learns the color transform and texture projection, then reduces the projected training
    /// features of each class to the configured number of prototypes.
    ///
    /// An optimizer that hits its iteration cap or sees its objective drop is not an error,
    /// the model keeps the best state found and reports how it ended through
    /// [`Segmenter::status`].
    pub fn train(
        positive: &[Image<f32, 3>],
        negative: &[Image<f32, 3>],
        config: SegmenterConfig,
    ) -> Result<Self, SegmentationError> {
        check_window(config.window_size)?;

        let samples = SampleSet::from_patches(positive, negative)?;
        log::debug!(
            "Training with {} positive and {} negative samples",
            samples.positive().len(),
            samples.negative().len()
        );

        let output = fisher_rao::optimize(&samples, &config.fisher_rao)?;
        let transform = output.state.transform_pair()?;

        let mut prototypes = Prototypes::new();
        for (label, class) in samples.classes() {
            let projected = class
                .iter()
                .map(|v| transform.project(v))
                .collect::<Vec<ProjectedFeature>>();
            let reduced = kmeans::reduce(&projected, config.prototypes_per_class, &config.kmeans)?;
            prototypes.push_class(label, &reduced);
        }

        log::info!(
            "Trained segmenter: objective {} after {} iterations ({:?})",
            output.state.objective,
            output.iterations,
            output.status
        );

        Ok(Self {
            config,
            transform,
            prototypes,
            objective_trace: output.objective_trace,
            status: output.status,
        })
    }

    /// Train a model from the sample centers picked on an 8-bit image.
    ///
    /// A `window_size` square patch is cut around every `(x, y)` center after the optional
    /// histogram equalization.
    pub fn train_from_image(
        image: &Image<u8, 3>,
        positive: &[(usize, usize)],
        negative: &[(usize, usize)],
        config: SegmenterConfig,
    ) -> Result<Self, SegmentationError> {
        check_window(config.window_size)?;
        let prepared = prepare_image(image, config.equalize_histogram)?;

        let cut = |centers: &[(usize, usize)]| -> Result<Vec<Image<f32, 3>>, SegmentationError> {
            centers
                .iter()
                .map(|&(x, y)| cut_patch(&prepared, x, y, config.window_size))
                .collect()
        };
        let (positive, negative) = (cut(positive)?, cut(negative)?);

        Self::train(&positive, &negative, config)
    }

    /// Segment an 8-bit color image.
    pub fn segment(&self, image: &Image<u8, 3>) -> Result<Segmentation, SegmentationError> {
        let prepared = prepare_image(image, self.config.equalize_histogram)?;
        self.segment_f32(&prepared)
    }

    /// Segment a color image with values in `[0, 1]`.
    ///
    /// The image is mapped through the learned color transform, its neighborhood mean texture
    /// features are projected onto the discriminant axes and every pixel is labeled by its
    /// nearest prototypes.
    pub fn segment_f32(&self, image: &Image<f32, 3>) -> Result<Segmentation, SegmentationError> {
        let mut mdc = Image::<f32, 3>::from_size_val(image.size(), 0.0)?;
        mdc_from_rgb(image, &mut mdc, &self.transform.color)?;

        let features =
            IntegralFeatureMap::from_image(&mdc)?.mean_feature_image(self.config.window_size)?;

        let mut projected = Image::<f32, PROJECTED_DIM>::from_size_val(image.size(), 0.0)?;
        parallel::par_iter_rows(&features, &mut projected, |src_pixel, dst_pixel| {
            let z = self.transform.project_mdc(src_pixel);
            dst_pixel
                .iter_mut()
                .zip(z.iter())
                .for_each(|(d, &v)| *d = v as f32);
        });

        let labels = knn::classify_image(&self.prototypes, &projected, self.config.neighbors)?;
        let mut colors = Image::<u8, 3>::from_size_val(image.size(), 0)?;
        knn::colorize_labels(&labels, &mut colors)?;

        let cellular = labels.as_slice().par_iter().filter(|&&l| l == POSITIVE).count();
        log::debug!(
            "Segmented {} pixels, {} cellular",
            labels.as_slice().len(),
            cellular
        );

        Ok(Segmentation { labels, colors })
    }

    /// Label a single color patch with values in `[0, 1]` from its mean texture features.
    pub fn classify_patch(&self, patch: &Image<f32, 3>) -> Result<Label, SegmentationError> {
        let z = self.transform.project(&mean_features(patch)?);
        knn::classify(&self.prototypes, &z, self.config.neighbors)
    }

    /// The configuration the model was trained with.
    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// The learned color transform and texture projection.
    pub fn transform(&self) -> &TransformPair {
        &self.transform
    }

    /// The labeled prototypes.
    pub fn prototypes(&self) -> &Prototypes {
        &self.prototypes
    }

    /// Objective after initialization and after every accepted alternation.
    pub fn objective_trace(&self) -> &[f64] {
        &self.objective_trace
    }

    /// How the optimization ended.
    pub fn status(&self) -> OptimizationStatus {
        self.status
    }
}

fn check_window(window: usize) -> Result<(), SegmentationError> {
    if window < 3 || window % 2 == 0 {
        return Err(SegmentationError::InvalidInput(format!(
            "window size must be odd and at least 3, got {window}"
        )));
    }
    Ok(())
}

/// Equalize an 8-bit image if requested and scale it to `[0, 1]`.
fn prepare_image(image: &Image<u8, 3>, equalize: bool) -> Result<Image<f32, 3>, ImageError> {
    if equalize {
        let mut equalized = Image::<u8, 3>::from_size_val(image.size(), 0)?;
        equalize_histogram_rgb(image, &mut equalized)?;
        equalized.cast_and_scale(1.0 / 255.0)
    } else {
        image.cast_and_scale(1.0 / 255.0)
    }
}

/// Cut the `window x window` patch centered at `(x, y)`.
fn cut_patch(
    image: &Image<f32, 3>,
    x: usize,
    y: usize,
    window: usize,
) -> Result<Image<f32, 3>, SegmentationError> {
    let radius = window / 2;
    if x < radius || y < radius {
        return Err(ImageError::InvalidCropRegion(
            x.saturating_sub(radius),
            y.saturating_sub(radius),
            window,
            window,
            image.cols(),
            image.rows(),
        )
        .into());
    }

    let mut patch = Image::<f32, 3>::from_size_val(
        ImageSize {
            width: window,
            height: window,
        },
        0.0,
    )?;
    crop_image(image, &mut patch, x - radius, y - radius)?;
    Ok(patch)
}
