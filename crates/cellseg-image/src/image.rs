use crate::error::ImageError;

/// Image size in pixels
///
/// A struct to represent the size of an image in pixels.
///
/// # Examples
///
/// ```
/// use cellseg_image::ImageSize;
///
/// let image_size = ImageSize {
///   width: 10,
///   height: 20,
/// };
///
/// assert_eq!(image_size.width, 10);
/// assert_eq!(image_size.height, 20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ImageSize {{ width: {}, height: {} }}",
            self.width, self.height
        )
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from(size: [usize; 2]) -> Self {
        ImageSize {
            width: size[0],
            height: size[1],
        }
    }
}

/// Represents an image with pixel data.
///
/// The pixels are stored row-major and interleaved, i.e. with shape (H, W, C), where H is the
/// height of the image, W the width and C the number of channels.
#[derive(Clone, Debug, PartialEq)]
pub struct Image<T, const CHANNELS: usize> {
    size: ImageSize,
    data: Vec<T>,
}

impl<T, const CHANNELS: usize> Image<T, CHANNELS> {
    /// Create a new image from pixel data.
    ///
    /// # Arguments
    ///
    /// * `size` - The size of the image in pixels.
    /// * `data` - The pixel data of the image.
    ///
    /// # Errors
    ///
    /// If the length of the pixel data does not match the image size, an error is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use cellseg_image::{Image, ImageSize};
    ///
    /// let image = Image::<u8, 3>::new(
    ///     ImageSize {
    ///         width: 10,
    ///         height: 20,
    ///     },
    ///     vec![0u8; 10 * 20 * 3],
    /// ).unwrap();
    ///
    /// assert_eq!(image.size().width, 10);
    /// assert_eq!(image.size().height, 20);
    /// assert_eq!(image.as_slice().len(), 10 * 20 * 3);
    /// ```
    pub fn new(size: ImageSize, data: Vec<T>) -> Result<Self, ImageError> {
        if data.len() != size.width * size.height * CHANNELS {
            return Err(ImageError::InvalidChannelShape(
                data.len(),
                size.width * size.height * CHANNELS,
            ));
        }

        Ok(Self { size, data })
    }

    /// Create a new image with the given size and all pixels set to `val`.
    pub fn from_size_val(size: ImageSize, val: T) -> Result<Self, ImageError>
    where
        T: Clone,
    {
        let data = vec![val; size.width * size.height * CHANNELS];
        Image::new(size, data)
    }

    /// Create a new image by evaluating `f(y, x, c)` at every pixel and channel.
    pub fn from_fn(size: ImageSize, f: impl Fn(usize, usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(size.width * size.height * CHANNELS);
        for y in 0..size.height {
            for x in 0..size.width {
                for c in 0..CHANNELS {
                    data.push(f(y, x, c));
                }
            }
        }
        Self { size, data }
    }

    /// Get the size of the image in pixels.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Get the number of columns of the image.
    pub fn cols(&self) -> usize {
        self.size.width
    }

    /// Get the number of rows of the image.
    pub fn rows(&self) -> usize {
        self.size.height
    }

    /// Get the pixel data as a flat slice.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Get the pixel data as a flat mutable slice.
    pub fn as_slice_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Get a reference to a channel value, or `None` when the index is out of bounds.
    pub fn get(&self, index: [usize; 3]) -> Option<&T> {
        let [y, x, c] = index;
        if y >= self.rows() || x >= self.cols() || c >= CHANNELS {
            return None;
        }
        self.data.get((y * self.cols() + x) * CHANNELS + c)
    }

    /// Get a reference to a channel value without bounds checks on the coordinates.
    ///
    /// PRECONDITION: `y < rows`, `x < cols` and `c < CHANNELS`.
    #[inline]
    pub fn get_unchecked(&self, index: [usize; 3]) -> &T {
        let [y, x, c] = index;
        &self.data[(y * self.cols() + x) * CHANNELS + c]
    }

    /// Get the channels of a pixel as a slice.
    pub fn pixel(&self, x: usize, y: usize) -> Option<&[T]> {
        if x >= self.cols() || y >= self.rows() {
            return None;
        }
        let offset = (y * self.cols() + x) * CHANNELS;
        Some(&self.data[offset..offset + CHANNELS])
    }

    /// Extract a single channel of the image as a new one-channel image.
    pub fn channel(&self, channel: usize) -> Result<Image<T, 1>, ImageError>
    where
        T: Clone,
    {
        if channel >= CHANNELS {
            return Err(ImageError::ChannelIndexOutOfBounds(channel, CHANNELS));
        }

        let channel_data = self
            .data
            .chunks_exact(CHANNELS)
            .map(|pixel| pixel[channel].clone())
            .collect();

        Image::new(self.size, channel_data)
    }

    /// Split the image into its individual channels.
    pub fn split_channels(&self) -> Result<Vec<Image<T, 1>>, ImageError>
    where
        T: Clone,
    {
        (0..CHANNELS).map(|i| self.channel(i)).collect()
    }

    /// Cast the pixel data to a different type and multiply it by `scale`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cellseg_image::{Image, ImageSize};
    ///
    /// let image = Image::<u8, 1>::new(ImageSize { width: 2, height: 1 }, vec![0, 255]).unwrap();
    /// let image_f32 = image.cast_and_scale::<f32>(1.0 / 255.0).unwrap();
    ///
    /// assert_eq!(image_f32.as_slice(), &[0.0, 1.0]);
    /// ```
    pub fn cast_and_scale<U>(&self, scale: U) -> Result<Image<U, CHANNELS>, ImageError>
    where
        U: num_traits::NumCast + std::ops::Mul<Output = U> + Copy,
        T: num_traits::NumCast + Copy,
    {
        let casted_data = self
            .data
            .iter()
            .map(|&x| {
                let xu = U::from(x)
                    .ok_or_else(|| ImageError::CastError(std::any::type_name::<U>().to_string()))?;
                Ok(xu * scale)
            })
            .collect::<Result<Vec<U>, ImageError>>()?;

        Image::new(self.size, casted_data)
    }
}
