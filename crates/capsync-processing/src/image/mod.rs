//! Image codec module
//!
//! - [`ImageCodec`]: the raster surface the preprocessor drives (codec)
//! - [`ImageRsCodec`]: production codec on top of the `image` crate (rust_codec)
//! - EXIF orientation normalization (orientation)

pub mod codec;
pub mod orientation;
pub mod rust_codec;

pub use codec::ImageCodec;
pub use orientation::ImageOrientation;
pub use rust_codec::ImageRsCodec;
