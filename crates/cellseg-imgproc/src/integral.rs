use cellseg_image::{Image, ImageError, ImageSize};
use rayon::prelude::*;

use crate::lft::{lft_rgb, FeatureVector, NUM_FEATURES};
use crate::parallel;

/// Prefix sums of the 24 texture feature maps of an image.
///
/// The table has `(rows + 1) x (cols + 1)` entries with a leading row and column of zeros, so
/// entry `(y, x)` holds the sum of all features in the rectangle `[0, y) x [0, x)`. Any
/// rectangle sum is then four reads away.
#[derive(Clone, Debug)]
pub struct IntegralFeatureMap {
    size: ImageSize,
    data: Vec<f64>,
}

impl IntegralFeatureMap {
    /// Build the prefix sums from precomputed per-pixel feature maps.
    ///
    /// Row prefix sums run in parallel, the accumulation down the rows is sequential.
    pub fn from_features(features: &Image<f32, NUM_FEATURES>) -> Self {
        let size = features.size();
        let row_len = (size.width + 1) * NUM_FEATURES;
        let mut data = vec![0.0f64; (size.height + 1) * row_len];

        if size.width == 0 || size.height == 0 {
            return Self { size, data };
        }

        data.par_chunks_exact_mut(row_len)
            .skip(1)
            .zip(features.as_slice().par_chunks_exact(size.width * NUM_FEATURES))
            .for_each(|(dst_row, src_row)| {
                let mut acc = [0.0f64; NUM_FEATURES];
                src_row
                    .chunks_exact(NUM_FEATURES)
                    .zip(dst_row.chunks_exact_mut(NUM_FEATURES).skip(1))
                    .for_each(|(src_pixel, dst_pixel)| {
                        acc.iter_mut()
                            .zip(src_pixel.iter())
                            .for_each(|(a, &v)| *a += v as f64);
                        dst_pixel.copy_from_slice(&acc);
                    });
            });

        for y in 2..=size.height {
            let (prev, cur) = data.split_at_mut(y * row_len);
            let prev = &prev[(y - 1) * row_len..];
            cur[..row_len]
                .iter_mut()
                .zip(prev.iter())
                .for_each(|(c, &p)| *c += p);
        }

        Self { size, data }
    }

    /// Compute the texture features of a color image and build their prefix sums.
    pub fn from_image(image: &Image<f32, 3>) -> Result<Self, ImageError> {
        let mut features = Image::<f32, NUM_FEATURES>::from_size_val(image.size(), 0.0)?;
        lft_rgb(image, &mut features)?;
        Ok(Self::from_features(&features))
    }

    /// Size of the image the map was built from.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    #[inline]
    fn entry(&self, y: usize, x: usize) -> &[f64] {
        let offset = (y * (self.size.width + 1) + x) * NUM_FEATURES;
        &self.data[offset..offset + NUM_FEATURES]
    }

    fn rect_sum_unchecked(&self, y0: usize, x0: usize, y1: usize, x1: usize) -> FeatureVector {
        let (tl, tr) = (self.entry(y0, x0), self.entry(y0, x1));
        let (bl, br) = (self.entry(y1, x0), self.entry(y1, x1));
        let mut sum = [0.0f64; NUM_FEATURES];
        for (i, s) in sum.iter_mut().enumerate() {
            *s = br[i] + tl[i] - tr[i] - bl[i];
        }
        sum
    }

    fn clipped_mean(&self, x: usize, y: usize, radius: usize) -> FeatureVector {
        let (x0, y0) = (x.saturating_sub(radius), y.saturating_sub(radius));
        let x1 = (x + radius + 1).min(self.size.width);
        let y1 = (y + radius + 1).min(self.size.height);

        let mut mean = self.rect_sum_unchecked(y0, x0, y1, x1);
        let count = ((y1 - y0) * (x1 - x0)) as f64;
        mean.iter_mut().for_each(|m| *m /= count);
        mean
    }

    /// Sum of the features over the half-open rectangle `[y0, y1) x [x0, x1)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the rectangle is inverted or exceeds the image bounds.
    pub fn rect_sum(
        &self,
        y0: usize,
        x0: usize,
        y1: usize,
        x1: usize,
    ) -> Result<FeatureVector, ImageError> {
        if y0 > y1 || x0 > x1 || y1 > self.size.height || x1 > self.size.width {
            return Err(ImageError::InvalidCropRegion(
                x0,
                y0,
                x1.saturating_sub(x0),
                y1.saturating_sub(y0),
                self.size.width,
                self.size.height,
            ));
        }
        Ok(self.rect_sum_unchecked(y0, x0, y1, x1))
    }

    /// Mean feature vector of the `window x window` neighborhood centered at `(x, y)`.
    ///
    /// Near the border the window is clipped to the image and the mean is taken over the
    /// pixels that remain.
    ///
    /// # Errors
    ///
    /// Returns an error if the window is even or zero, or if `(x, y)` is outside the image.
    pub fn mean_features(
        &self,
        x: usize,
        y: usize,
        window: usize,
    ) -> Result<FeatureVector, ImageError> {
        check_window(window)?;
        if x >= self.size.width || y >= self.size.height {
            return Err(ImageError::PixelIndexOutOfBounds(
                x,
                y,
                self.size.width,
                self.size.height,
            ));
        }
        Ok(self.clipped_mean(x, y, window / 2))
    }

    /// Neighborhood mean features for every pixel of the image.
    pub fn mean_feature_image(
        &self,
        window: usize,
    ) -> Result<Image<f32, NUM_FEATURES>, ImageError> {
        check_window(window)?;
        let radius = window / 2;

        let mut dst = Image::<f32, NUM_FEATURES>::from_size_val(self.size, 0.0)?;
        parallel::par_iter_rows_indexed(&mut dst, |x, y, dst_pixel| {
            let mean = self.clipped_mean(x, y, radius);
            dst_pixel
                .iter_mut()
                .zip(mean.iter())
                .for_each(|(d, &m)| *d = m as f32);
        });

        Ok(dst)
    }
}

fn check_window(window: usize) -> Result<(), ImageError> {
    if window == 0 || window % 2 == 0 {
        return Err(ImageError::InvalidWindowSize(window));
    }
    Ok(())
}
