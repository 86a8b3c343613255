use cellseg_image::{Image, ImageError};
use rayon::prelude::*;

use crate::parallel;

/// Number of texture features computed per color channel.
pub const NUM_LFT: usize = 8;

/// Number of color channels the feature extractor works on.
pub const NUM_CHANNELS: usize = 3;

/// Length of a full feature vector: eight texture features for each color channel.
pub const NUM_FEATURES: usize = NUM_LFT * NUM_CHANNELS;

/// A feature vector stored channel-major, `v[c * NUM_LFT + f]` is feature `f` of channel `c`.
pub type FeatureVector = [f64; NUM_FEATURES];

/// Weight of the diagonal neighbors in the directional combinations.
const DIAG: f32 = 0.707;

/// Neighbor offsets `(dy, dx)` in the order the shifted copies are stacked:
/// left, right, up, down, up-left, up-right, down-left, down-right.
pub const SHIFT_OFFSETS: [(isize, isize); NUM_LFT] = [
    (0, -1),
    (0, 1),
    (-1, 0),
    (1, 0),
    (-1, -1),
    (-1, 1),
    (1, -1),
    (1, 1),
];

/// Combine the eight neighbors of a pixel into its eight texture features.
///
/// `s` holds the neighbor values in the order of [`SHIFT_OFFSETS`].
#[inline]
pub fn lft_from_neighbors(s: &[f32]) -> [f32; NUM_LFT] {
    [
        s[0] + s[1] + s[2] + s[3] + s[4] + s[5] + s[6] + s[7],
        s[0] + s[1] + s[2] + s[3] - s[4] - s[5] - s[6] - s[7],
        DIAG * (s[5] + s[7] - s[4] - s[6]) + s[1] - s[0],
        DIAG * (s[6] + s[7] - s[4] - s[5]) + s[3] - s[2],
        s[0] + s[1] - s[2] - s[3],
        s[4] + s[7] - s[5] - s[6],
        DIAG * (s[4] + s[6] - s[5] - s[7]) + s[1] - s[0],
        DIAG * (s[6] + s[7] - s[4] - s[5]) + s[2] - s[3],
    ]
}

/// Stack the eight unit-offset shifted copies of a gray image.
///
/// Channel `k` of `dst` at `(x, y)` holds `src(y + dy_k, x + dx_k)` with the offsets of
/// [`SHIFT_OFFSETS`]. Neighbors outside the image read as zero.
///
/// PRECONDITION: `src` and `dst` must have the same size.
pub fn shift_channel(src: &Image<f32, 1>, dst: &mut Image<f32, NUM_LFT>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let (rows, cols) = (src.rows() as isize, src.cols() as isize);
    let data = src.as_slice();

    parallel::par_iter_rows_indexed(dst, |x, y, dst_pixel| {
        for (k, &(dy, dx)) in SHIFT_OFFSETS.iter().enumerate() {
            let (ny, nx) = (y as isize + dy, x as isize + dx);
            dst_pixel[k] = if ny >= 0 && ny < rows && nx >= 0 && nx < cols {
                data[(ny * cols + nx) as usize]
            } else {
                0.0
            };
        }
    });

    Ok(())
}

/// Compute the eight texture feature maps of a gray image.
///
/// # Arguments
///
/// * `src` - The input gray image.
/// * `dst` - The output feature maps, one per channel.
///
/// PRECONDITION: `src` and `dst` must have the same size.
///
/// # Example
///
/// ```
/// use cellseg_image::{Image, ImageSize};
/// use cellseg_imgproc::lft::lft_maps;
///
/// let size = ImageSize { width: 3, height: 3 };
/// let image = Image::<f32, 1>::from_size_val(size, 1.0).unwrap();
/// let mut lft = Image::<f32, 8>::from_size_val(size, 0.0).unwrap();
///
/// lft_maps(&image, &mut lft).unwrap();
///
/// // the center pixel sees its eight neighbors
/// assert_eq!(lft.pixel(1, 1).unwrap()[0], 8.0);
/// ```
pub fn lft_maps(src: &Image<f32, 1>, dst: &mut Image<f32, NUM_LFT>) -> Result<(), ImageError> {
    let mut shifted = Image::<f32, NUM_LFT>::from_size_val(src.size(), 0.0)?;
    shift_channel(src, &mut shifted)?;

    if shifted.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            shifted.cols(),
            shifted.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    parallel::par_iter_rows(&shifted, dst, |src_pixel, dst_pixel| {
        dst_pixel.copy_from_slice(&lft_from_neighbors(src_pixel));
    });

    Ok(())
}

/// Compute the 24 texture feature maps of a color image.
///
/// The channels are processed independently and stacked channel-major, so channel
/// `c * NUM_LFT + f` of `dst` holds feature `f` of color channel `c`.
///
/// PRECONDITION: `src` and `dst` must have the same size.
pub fn lft_rgb(src: &Image<f32, 3>, dst: &mut Image<f32, NUM_FEATURES>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let maps = src
        .split_channels()?
        .par_iter()
        .map(|channel| {
            let mut lft = Image::<f32, NUM_LFT>::from_size_val(channel.size(), 0.0)?;
            lft_maps(channel, &mut lft)?;
            Ok(lft)
        })
        .collect::<Result<Vec<_>, ImageError>>()?;

    let cols = src.cols();
    parallel::par_iter_rows_indexed(dst, |x, y, dst_pixel| {
        let offset = (y * cols + x) * NUM_LFT;
        for (c, lft) in maps.iter().enumerate() {
            dst_pixel[c * NUM_LFT..(c + 1) * NUM_LFT]
                .copy_from_slice(&lft.as_slice()[offset..offset + NUM_LFT]);
        }
    });

    Ok(())
}

/// Compute the mean feature vector of a color patch.
///
/// The mean runs over the patch interior, i.e. the pixels whose eight neighbors all lie
/// inside the patch, so the result does not depend on the padding policy.
///
/// # Errors
///
/// Returns an error if the patch is smaller than 3x3.
pub fn mean_features(patch: &Image<f32, 3>) -> Result<FeatureVector, ImageError> {
    if patch.rows() < 3 || patch.cols() < 3 {
        return Err(ImageError::ImageTooSmall(patch.cols(), patch.rows(), 3));
    }

    let mut lft = Image::<f32, NUM_FEATURES>::from_size_val(patch.size(), 0.0)?;
    lft_rgb(patch, &mut lft)?;

    let mut acc = [0.0f64; NUM_FEATURES];
    for y in 1..patch.rows() - 1 {
        for x in 1..patch.cols() - 1 {
            let offset = (y * patch.cols() + x) * NUM_FEATURES;
            let pixel = &lft.as_slice()[offset..offset + NUM_FEATURES];
            acc.iter_mut()
                .zip(pixel.iter())
                .for_each(|(a, &v)| *a += v as f64);
        }
    }

    let count = ((patch.rows() - 2) * (patch.cols() - 2)) as f64;
    acc.iter_mut().for_each(|a| *a /= count);

    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cellseg_image::ImageSize;

    #[test]
    fn test_shift_channel() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 3,
            height: 3,
        };
        #[rustfmt::skip]
        let image = Image::<f32, 1>::new(size, vec![
            1.0, 2.0, 3.0,
            4.0, 5.0, 6.0,
            7.0, 8.0, 9.0,
        ])?;
        let mut shifted = Image::<f32, NUM_LFT>::from_size_val(size, 0.0)?;
        shift_channel(&image, &mut shifted)?;

        assert_eq!(
            shifted.pixel(1, 1),
            Some(&[4.0f32, 6.0, 2.0, 8.0, 1.0, 3.0, 7.0, 9.0][..])
        );
        // top-left corner only sees right, down and down-right
        assert_eq!(
            shifted.pixel(0, 0),
            Some(&[0.0f32, 2.0, 0.0, 4.0, 0.0, 0.0, 0.0, 5.0][..])
        );
        Ok(())
    }

    #[test]
    fn test_lft_maps_constant() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 4,
            height: 4,
        };
        let image = Image::<f32, 1>::from_size_val(size, 2.0)?;
        let mut lft = Image::<f32, NUM_LFT>::from_size_val(size, 0.0)?;
        lft_maps(&image, &mut lft)?;

        assert_eq!(
            lft.pixel(1, 2),
            Some(&[16.0f32, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0][..])
        );
        // zero padding at the corner
        assert_eq!(lft.pixel(0, 0).map(|p| p[0]), Some(6.0));
        Ok(())
    }

    #[test]
    fn test_lft_maps_horizontal_ramp() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 5,
            height: 5,
        };
        let image = Image::<f32, 1>::from_fn(size, |_, x, _| x as f32);
        let mut lft = Image::<f32, NUM_LFT>::from_size_val(size, 0.0)?;
        lft_maps(&image, &mut lft)?;

        let px = lft.pixel(2, 2).ok_or(ImageError::PixelIndexOutOfBounds(2, 2, 5, 5))?;
        let expected = [16.0, 0.0, 4.0 * 0.707 + 2.0, 0.0, 0.0, 0.0, 2.0 - 4.0 * 0.707, 0.0];
        for (v, e) in px.iter().zip(expected.iter()) {
            assert_relative_eq!(*v, *e, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_lft_rgb_layout() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 3,
            height: 3,
        };
        let image = Image::<f32, 3>::from_fn(size, |_, _, c| (c + 1) as f32);
        let mut lft = Image::<f32, NUM_FEATURES>::from_size_val(size, 0.0)?;
        lft_rgb(&image, &mut lft)?;

        let center = lft.pixel(1, 1).ok_or(ImageError::PixelIndexOutOfBounds(1, 1, 3, 3))?;
        assert_eq!(center[0], 8.0);
        assert_eq!(center[NUM_LFT], 16.0);
        assert_eq!(center[2 * NUM_LFT], 24.0);
        Ok(())
    }

    #[test]
    fn test_mean_features_interior() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 11,
            height: 11,
        };
        let patch = Image::<f32, 3>::from_fn(size, |y, x, c| ((x + 2 * y) % 5) as f32 + c as f32);
        let mean = mean_features(&patch)?;

        let mut lft = Image::<f32, NUM_FEATURES>::from_size_val(size, 0.0)?;
        lft_rgb(&patch, &mut lft)?;
        let mut expected = [0.0f64; NUM_FEATURES];
        for y in 1..10 {
            for x in 1..10 {
                for (i, e) in expected.iter_mut().enumerate() {
                    *e += *lft.get_unchecked([y, x, i]) as f64 / 81.0;
                }
            }
        }

        for (m, e) in mean.iter().zip(expected.iter()) {
            assert_relative_eq!(*m, *e, epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_mean_features_too_small() -> Result<(), ImageError> {
        let patch = Image::<f32, 3>::from_size_val(
            ImageSize {
                width: 2,
                height: 5,
            },
            0.0,
        )?;
        assert_eq!(
            mean_features(&patch),
            Err(ImageError::ImageTooSmall(2, 5, 3))
        );
        Ok(())
    }
}
