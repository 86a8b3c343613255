#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use cellseg_image as image;

#[doc(inline)]
pub use cellseg_imgproc as imgproc;

#[doc(inline)]
pub use cellseg_linalg as linalg;

#[doc(inline)]
pub use cellseg_learn as learn;
