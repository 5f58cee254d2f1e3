//! The raster capability the preprocessor is written against.

use crate::error::CodecError;

/// Decode, render and encode operations needed to re-encode a capture.
///
/// Implementations must be usable from any thread; the preprocessor itself
/// holds no state between calls.
pub trait ImageCodec: Send + Sync {
    /// Decoded raster handle.
    type Image;

    /// Decode `data`, applying any embedded EXIF orientation so the returned
    /// image is upright.
    fn decode(&self, data: &[u8]) -> Result<Self::Image, CodecError>;

    fn dimensions(&self, image: &Self::Image) -> (u32, u32);

    /// Scale `image` to exactly `width` x `height` and flatten it onto an
    /// opaque white background.
    fn render(&self, image: &Self::Image, width: u32, height: u32)
        -> Result<Self::Image, CodecError>;

    /// Encode as JPEG at `quality` (0.0..=1.0).
    fn encode_jpeg(&self, image: &Self::Image, quality: f32) -> Result<Vec<u8>, CodecError>;
}
