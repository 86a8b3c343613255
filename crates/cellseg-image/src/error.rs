/// An error type for the image module.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ImageError {
    /// Error when channel and shape are not valid.
    #[error("Data length ({0}) does not match the image size ({1})")]
    InvalidChannelShape(usize, usize),

    /// Error when the image size is not valid.
    #[error("Invalid image size ({0}, {1}), expected ({2}, {3})")]
    InvalidImageSize(usize, usize, usize, usize),

    /// Error when the pixel coordinates are out of bounds.
    #[error("Pixel coordinates ({0}, {1}) are out of bounds ({2}, {3})")]
    PixelIndexOutOfBounds(usize, usize, usize, usize),

    /// Error when the channel index is out of bounds.
    #[error("Channel index ({0}) is out of bounds ({1})")]
    ChannelIndexOutOfBounds(usize, usize),

    /// Error when a crop region does not fit inside the source image.
    #[error("Crop region at ({0}, {1}) with size {2}x{3} exceeds the image bounds ({4}, {5})")]
    InvalidCropRegion(usize, usize, usize, usize, usize, usize),

    /// Error when the image is too small for the requested operation.
    #[error("Image of size {0}x{1} is smaller than the minimum {2}x{2}")]
    ImageTooSmall(usize, usize, usize),

    /// Error when a neighborhood window size is not valid.
    #[error("Invalid window size ({0}), must be odd and greater than zero")]
    InvalidWindowSize(usize),

    /// Error when the pixel value cannot be cast to the requested type.
    #[error("Failed to cast image data to {0}")]
    CastError(String),
}
