use cellseg_image::{Image, ImageError};
use rayon::prelude::*;

use crate::parallel;

/// Count the 256 intensity levels of every channel of an 8-bit image.
fn channel_histograms<const C: usize>(src: &Image<u8, C>) -> [[usize; 256]; C] {
    src.as_slice()
        .par_chunks(4096 * C)
        .fold(
            || [[0usize; 256]; C],
            |mut local, chunk| {
                for pixel in chunk.chunks_exact(C) {
                    for (c, &v) in pixel.iter().enumerate() {
                        local[c][v as usize] += 1;
                    }
                }
                local
            },
        )
        .reduce(
            || [[0usize; 256]; C],
            |mut a, b| {
                for (a_ch, b_ch) in a.iter_mut().zip(b.iter()) {
                    for (x, y) in a_ch.iter_mut().zip(b_ch.iter()) {
                        *x += y;
                    }
                }
                a
            },
        )
}

/// Build the equalization lookup table of a 256-level histogram.
///
/// The lowest occupied level maps to 0 and the cumulative counts above it are stretched over
/// the full range. A histogram with a single occupied level maps every level to itself.
fn equalization_lut(hist: &[usize; 256]) -> [u8; 256] {
    let mut lut = [0u8; 256];
    let total: usize = hist.iter().sum();

    let first = match hist.iter().position(|&h| h > 0) {
        Some(i) if hist[i] < total => i,
        _ => {
            for (i, l) in lut.iter_mut().enumerate() {
                *l = i as u8;
            }
            return lut;
        }
    };

    let scale = 255.0 / (total - hist[first]) as f64;
    let mut sum = 0usize;
    for j in first + 1..256 {
        sum += hist[j];
        lut[j] = (sum as f64 * scale).round().clamp(0.0, 255.0) as u8;
    }

    lut
}

/// Equalize the histogram of each channel of an RGB image independently.
///
/// # Arguments
///
/// * `src` - The input RGB image.
/// * `dst` - The output equalized image.
///
/// Precondition: the input and output images must have the same size.
pub fn equalize_histogram_rgb(
    src: &Image<u8, 3>,
    dst: &mut Image<u8, 3>,
) -> Result<(), ImageError> {
    equalize_channels(src, dst)
}

fn equalize_channels<const C: usize>(
    src: &Image<u8, C>,
    dst: &mut Image<u8, C>,
) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let luts = channel_histograms(src).map(|hist| equalization_lut(&hist));

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        for (c, (s, d)) in src_pixel.iter().zip(dst_pixel.iter_mut()).enumerate() {
            *d = luts[c][*s as usize];
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellseg_image::ImageSize;

    #[test]
    fn test_equalize_histogram() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 4,
            height: 1,
        };
        let image = Image::<u8, 1>::new(size, vec![10, 20, 20, 30])?;
        let mut equalized = Image::<u8, 1>::from_size_val(size, 0)?;

        equalize_channels(&image, &mut equalized)?;
        // cumulative counts 1, 3, 4 with the lowest level pinned to zero
        assert_eq!(equalized.as_slice(), &[0, 170, 170, 255]);
        Ok(())
    }

    #[test]
    fn test_equalize_histogram_constant() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 3,
            height: 2,
        };
        let image = Image::<u8, 1>::from_size_val(size, 77)?;
        let mut equalized = Image::<u8, 1>::from_size_val(size, 0)?;

        equalize_channels(&image, &mut equalized)?;
        assert_eq!(equalized, image);
        Ok(())
    }

    #[test]
    fn test_equalize_histogram_rgb_per_channel() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 2,
            height: 1,
        };
        let image = Image::<u8, 3>::new(size, vec![0, 100, 5, 10, 100, 6])?;
        let mut equalized = Image::<u8, 3>::from_size_val(size, 0)?;

        equalize_histogram_rgb(&image, &mut equalized)?;
        assert_eq!(equalized.as_slice(), &[0, 100, 0, 255, 100, 255]);
        Ok(())
    }
}
