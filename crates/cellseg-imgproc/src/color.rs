use crate::parallel;
use cellseg_image::{Image, ImageError};

/// A 3x3 color transform, `transform[c][k]` weights input channel `c` into output channel `k`.
pub type ColorTransform = [[f64; 3]; 3];

/// Project an RGB image onto a learned color basis.
///
/// Every pixel is mapped as a row vector through the transform:
///
/// dst\[k\] = src\[0\] * A\[0\]\[k\] + src\[1\] * A\[1\]\[k\] + src\[2\] * A\[2\]\[k\]
///
/// With the most discriminant color (MDC) transform learned by the optimizer this yields the
/// MDC image, whose texture features are the learned linear mix of the RGB features.
///
/// # Arguments
///
/// * `src` - The input RGB image.
/// * `dst` - The output transformed image.
/// * `transform` - The 3x3 color transform.
///
/// Precondition: the input and output images must have the same size.
///
/// # Example
///
/// ```
/// use cellseg_image::{Image, ImageSize};
/// use cellseg_imgproc::color::mdc_from_rgb;
///
/// let image = Image::<f32, 3>::new(
///     ImageSize {
///         width: 1,
///         height: 1,
///     },
///     vec![1.0, 2.0, 3.0],
/// )
/// .unwrap();
///
/// let swap = [[0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]];
/// let mut mdc = Image::<f32, 3>::from_size_val(image.size(), 0.0).unwrap();
///
/// mdc_from_rgb(&image, &mut mdc, &swap).unwrap();
/// assert_eq!(mdc.as_slice(), &[3.0, 2.0, 1.0]);
/// ```
pub fn mdc_from_rgb<T>(
    src: &Image<T, 3>,
    dst: &mut Image<T, 3>,
    transform: &ColorTransform,
) -> Result<(), ImageError>
where
    T: Send + Sync + num_traits::Float,
{
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let mut weights = [[T::zero(); 3]; 3];
    for (row, weights_row) in transform.iter().zip(weights.iter_mut()) {
        for (&a, w) in row.iter().zip(weights_row.iter_mut()) {
            *w = T::from(a).ok_or(ImageError::CastError(std::any::type_name::<T>().to_string()))?;
        }
    }

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        for (k, d) in dst_pixel.iter_mut().enumerate() {
            *d = src_pixel[0] * weights[0][k]
                + src_pixel[1] * weights[1][k]
                + src_pixel[2] * weights[2][k];
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cellseg_image::ImageSize;

    #[test]
    fn test_mdc_identity() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 2,
            height: 2,
        };
        let image = Image::<f32, 3>::from_fn(size, |y, x, c| (y * 6 + x * 3 + c) as f32);
        let mut mdc = Image::<f32, 3>::from_size_val(size, 0.0)?;
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

        mdc_from_rgb(&image, &mut mdc, &identity)?;
        assert_eq!(mdc, image);
        Ok(())
    }

    #[test]
    fn test_mdc_mix() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 1,
            height: 1,
        };
        let image = Image::<f64, 3>::new(size, vec![1.0, 2.0, 3.0])?;
        let mut mdc = Image::<f64, 3>::from_size_val(size, 0.0)?;
        let transform = [[0.5, 1.0, 0.0], [0.5, 0.0, -1.0], [0.0, 1.0, 2.0]];

        mdc_from_rgb(&image, &mut mdc, &transform)?;
        assert_relative_eq!(mdc.as_slice()[0], 1.5);
        assert_relative_eq!(mdc.as_slice()[1], 4.0);
        assert_relative_eq!(mdc.as_slice()[2], 4.0);
        Ok(())
    }

    #[test]
    fn test_mdc_size_mismatch() -> Result<(), ImageError> {
        let image = Image::<f32, 3>::from_size_val([2, 2].into(), 0.0)?;
        let mut mdc = Image::<f32, 3>::from_size_val([3, 2].into(), 0.0)?;
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert_eq!(
            mdc_from_rgb(&image, &mut mdc, &identity),
            Err(ImageError::InvalidImageSize(2, 2, 3, 2))
        );
        Ok(())
    }
}
