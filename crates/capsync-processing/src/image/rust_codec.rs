//! Production codec on top of the `image` crate.

use super::codec::ImageCodec;
use super::orientation::ImageOrientation;
use crate::calculations::encoder_quality;
use crate::error::CodecError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader, Rgb, RgbImage};
use std::io::Cursor;

/// Pure-Rust codec: any format the `image` crate decodes in, baseline JPEG out.
#[derive(Debug, Clone, Copy)]
pub struct ImageRsCodec {
    filter: FilterType,
}

impl ImageRsCodec {
    pub fn new() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }

    /// Use a different resampling filter (e.g. `Triangle` for speed).
    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl Default for ImageRsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCodec for ImageRsCodec {
    type Image = DynamicImage;

    fn decode(&self, data: &[u8]) -> Result<Self::Image, CodecError> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        let img = reader
            .decode()
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(ImageOrientation::apply_exif_orientation(img, data))
    }

    fn dimensions(&self, image: &Self::Image) -> (u32, u32) {
        image.dimensions()
    }

    fn render(
        &self,
        image: &Self::Image,
        width: u32,
        height: u32,
    ) -> Result<Self::Image, CodecError> {
        if width == 0 || height == 0 {
            return Err(CodecError::Encode(format!(
                "invalid target dimensions {}x{}",
                width, height
            )));
        }
        let resized = if image.dimensions() == (width, height) {
            image.to_rgba8()
        } else {
            image.resize_exact(width, height, self.filter).to_rgba8()
        };
        Ok(DynamicImage::ImageRgb8(flatten_on_white(&resized)))
    }

    fn encode_jpeg(&self, image: &Self::Image, quality: f32) -> Result<Vec<u8>, CodecError> {
        let rgb = image.to_rgb8();
        let mut buffer = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, encoder_quality(quality));
        encoder
            .encode_image(&rgb)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(buffer)
    }
}

/// Composite over opaque white so transparent regions do not turn black in JPEG.
fn flatten_on_white(rgba: &image::RgbaImage) -> RgbImage {
    let (width, height) = rgba.dimensions();
    let mut out = RgbImage::new(width, height);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as u32;
        let blend = |channel: u8| -> u8 {
            ((channel as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8
        };
        out.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    out
}
