use cellseg_image::{Image, ImageError};
use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::ParallelSliceMut,
};

/// Crop an image to a specified region.
///
/// The size of the region is the size of `dst`.
///
/// # Arguments
///
/// * `src` - The source image to crop.
/// * `dst` - The destination image to store the cropped image.
/// * `x` - The x-coordinate of the top-left corner of the region to crop.
/// * `y` - The y-coordinate of the top-left corner of the region to crop.
///
/// # Errors
///
/// Returns an error if the region does not fit inside the source image.
///
/// # Examples
///
/// ```rust
/// use cellseg_image::{Image, ImageSize};
/// use cellseg_imgproc::crop::crop_image;
///
/// let image = Image::<_, 1>::new(ImageSize { width: 4, height: 4 }, vec![
///     0u8, 1, 2, 3,
///     4u8, 5, 6, 7,
///     8u8, 9, 10, 11,
///     12u8, 13, 14, 15
/// ]).unwrap();
///
/// let mut cropped = Image::<_, 1>::from_size_val(ImageSize { width: 2, height: 2 }, 0u8).unwrap();
///
/// crop_image(&image, &mut cropped, 1, 1).unwrap();
///
/// assert_eq!(cropped.as_slice(), &[5u8, 6, 9, 10]);
/// ```
pub fn crop_image<T, const C: usize>(
    src: &Image<T, C>,
    dst: &mut Image<T, C>,
    x: usize,
    y: usize,
) -> Result<(), ImageError>
where
    T: Copy + Send + Sync,
{
    let (dst_cols, dst_rows) = (dst.cols(), dst.rows());

    if x + dst_cols > src.cols() || y + dst_rows > src.rows() {
        return Err(ImageError::InvalidCropRegion(
            x,
            y,
            dst_cols,
            dst_rows,
            src.cols(),
            src.rows(),
        ));
    }

    if dst_cols == 0 {
        return Ok(());
    }

    let src_stride = src.cols() * C;
    let src_data = src.as_slice();

    dst.as_slice_mut()
        .par_chunks_exact_mut(dst_cols * C)
        .enumerate()
        .for_each(|(i, dst_row)| {
            let offset = (y + i) * src_stride + x * C;
            dst_row.copy_from_slice(&src_data[offset..offset + dst_cols * C]);
        });

    Ok(())
}

#[cfg(test)]
mod tests {
    use cellseg_image::{Image, ImageError, ImageSize};

    #[test]
    fn test_crop() -> Result<(), ImageError> {
        #[rustfmt::skip]
        let image = Image::<_, 3>::new(
            ImageSize {
                width: 2,
                height: 3,
            },
            vec![
                0u8, 1, 2, 3, 4, 5,
                6u8, 7, 8, 9, 10, 11,
                12u8, 13, 14, 15, 16, 17,
            ],
        )?;

        let mut cropped = Image::<_, 3>::from_size_val(
            ImageSize {
                width: 1,
                height: 2,
            },
            0u8,
        )?;

        super::crop_image(&image, &mut cropped, 1, 1)?;
        assert_eq!(cropped.as_slice(), &[9u8, 10, 11, 15, 16, 17]);

        Ok(())
    }

    #[test]
    fn test_crop_out_of_bounds() -> Result<(), ImageError> {
        let image = Image::<f32, 3>::from_size_val([20, 20].into(), 0.0)?;
        let mut patch = Image::<f32, 3>::from_size_val([11, 11].into(), 0.0)?;

        assert!(super::crop_image(&image, &mut patch, 9, 9).is_ok());
        assert_eq!(
            super::crop_image(&image, &mut patch, 10, 0),
            Err(ImageError::InvalidCropRegion(10, 0, 11, 11, 20, 20))
        );
        Ok(())
    }
}
