//! Bounded-size re-encoding of captured images.

use bytes::Bytes;
use capsync_core::{EncodedAsset, PreprocessConfig};

use crate::calculations::{
    encoder_quality, fit_within, next_attempt_dimensions, quality_sweep, replace_extension,
};
use crate::error::{CodecError, PreprocessError};
use crate::image::{ImageCodec, ImageRsCodec};

pub const TARGET_MIME_TYPE: &str = "image/jpeg";
const TARGET_EXTENSION: &str = "jpg";

/// An image file as handed over by the capture surface.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub data: Bytes,
    pub file_name: String,
    /// Declared content type; `None` or empty skips the type check.
    pub mime_type: Option<String>,
}

/// Re-encodes images to JPEG within the configured dimension and byte bounds.
pub struct ImagePreprocessor<C: ImageCodec = ImageRsCodec> {
    codec: C,
    config: PreprocessConfig,
}

impl ImagePreprocessor<ImageRsCodec> {
    pub fn new(config: PreprocessConfig) -> Self {
        Self::with_codec(ImageRsCodec::new(), config)
    }
}

impl<C: ImageCodec> ImagePreprocessor<C> {
    pub fn with_codec(codec: C, config: PreprocessConfig) -> Self {
        Self { codec, config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Produce an [`EncodedAsset`] whose longest edge is at most
    /// `max_dimension` and whose size is at most `max_bytes`.
    ///
    /// Dimensions are fixed first (long edge scaled down to the bound), then a
    /// descending quality sweep is tried at those dimensions. When no quality
    /// fits, both edges shrink by `resize_step` and the sweep repeats, until a
    /// further shrink would take the longest edge below `min_dimension`.
    #[tracing::instrument(skip(self, source), fields(file_name = %source.file_name, original_size = source.data.len()))]
    pub fn preprocess(&self, source: &SourceImage) -> Result<EncodedAsset, PreprocessError> {
        if let Some(mime) = source.mime_type.as_deref().filter(|m| !m.is_empty()) {
            if !mime.starts_with("image/") {
                return Err(PreprocessError::UnsupportedType(mime.to_string()));
            }
        }

        let decoded = self
            .codec
            .decode(&source.data)
            .map_err(|e| PreprocessError::DecodeFailed(e.to_string()))?;

        let (source_width, source_height) = self.codec.dimensions(&decoded);
        let (mut width, mut height) =
            fit_within(source_width, source_height, self.config.max_dimension);
        let qualities = quality_sweep(&self.config);

        loop {
            let rendered = self
                .codec
                .render(&decoded, width, height)
                .map_err(encode_failed)?;

            for &quality in &qualities {
                let encoded = self
                    .codec
                    .encode_jpeg(&rendered, quality)
                    .map_err(encode_failed)?;

                if encoded.len() <= self.config.max_bytes {
                    tracing::info!(
                        width,
                        height,
                        quality = encoder_quality(quality),
                        size_bytes = encoded.len(),
                        "Image preprocessed"
                    );
                    return Ok(EncodedAsset {
                        size: encoded.len() as u64,
                        payload: Bytes::from(encoded),
                        file_name: replace_extension(&source.file_name, TARGET_EXTENSION),
                        mime_type: TARGET_MIME_TYPE.to_string(),
                        width,
                        height,
                        original_size: source.data.len() as u64,
                    });
                }

                tracing::debug!(
                    width,
                    height,
                    quality = encoder_quality(quality),
                    size_bytes = encoded.len(),
                    max_bytes = self.config.max_bytes,
                    "Encoded image over budget"
                );
            }

            match next_attempt_dimensions(width, height, &self.config) {
                Some((next_width, next_height)) => {
                    width = next_width;
                    height = next_height;
                }
                None => {
                    tracing::warn!(
                        width,
                        height,
                        max_bytes = self.config.max_bytes,
                        "Image cannot be compressed within budget"
                    );
                    return Err(PreprocessError::TooLarge {
                        max_bytes: self.config.max_bytes,
                    });
                }
            }
        }
    }
}

fn encode_failed(err: CodecError) -> PreprocessError {
    PreprocessError::EncodeFailed(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::codec::tests::{MockCodec, RecordedOp};

    fn source(name: &str, mime: Option<&str>) -> SourceImage {
        SourceImage {
            data: Bytes::from_static(b"raw image bytes"),
            file_name: name.to_string(),
            mime_type: mime.map(str::to_string),
        }
    }

    #[test]
    fn non_image_type_is_rejected_before_decoding() {
        let codec = MockCodec::new(100, 100, |_, _, _| 10);
        let pre = ImagePreprocessor::with_codec(codec, PreprocessConfig::default());

        let err = pre
            .preprocess(&source("manual.pdf", Some("application/pdf")))
            .unwrap_err();
        assert_eq!(err.code(), "unsupported_type");
        assert!(pre.codec.get_operations().is_empty());
    }

    #[test]
    fn empty_declared_type_is_allowed_through() {
        let codec = MockCodec::new(100, 80, |_, _, _| 10);
        let pre = ImagePreprocessor::with_codec(codec, PreprocessConfig::default());
        let asset = pre.preprocess(&source("blob", Some(""))).unwrap();
        assert_eq!(asset.file_name, "blob.jpg");
        assert_eq!((asset.width, asset.height), (100, 80));
    }

    #[test]
    fn decode_failure_maps_to_decode_failed() {
        let pre = ImagePreprocessor::with_codec(MockCodec::undecodable(), PreprocessConfig::default());
        let err = pre
            .preprocess(&source("x.jpg", Some("image/jpeg")))
            .unwrap_err();
        assert_eq!(err.code(), "decode_failed");
    }

    #[test]
    fn render_failure_maps_to_encode_failed() {
        let mut codec = MockCodec::new(100, 100, |_, _, _| 10);
        codec.fail_render = true;
        let pre = ImagePreprocessor::with_codec(codec, PreprocessConfig::default());
        let err = pre
            .preprocess(&source("x.jpg", Some("image/jpeg")))
            .unwrap_err();
        assert_eq!(err.code(), "encode_failed");
    }

    #[test]
    fn large_photo_is_scaled_to_max_dimension_at_first_quality() {
        let codec = MockCodec::new(4000, 3000, |_, _, _| 900_000);
        let pre = ImagePreprocessor::with_codec(codec, PreprocessConfig::default());

        let asset = pre
            .preprocess(&source("IMG_1234.HEIC", Some("image/heic")))
            .unwrap();
        assert_eq!((asset.width, asset.height), (1600, 1200));
        assert_eq!(asset.mime_type, "image/jpeg");
        assert_eq!(asset.file_name, "IMG_1234.jpg");
        assert_eq!(asset.size, 900_000);
        assert_eq!(asset.original_size, 15);
        assert_eq!(
            pre.codec.get_operations(),
            vec![
                RecordedOp::Decode,
                RecordedOp::Render { width: 1600, height: 1200 },
                RecordedOp::Encode { width: 1600, height: 1200, quality: 86 },
            ]
        );
    }

    #[test]
    fn quality_steps_down_before_dimensions_shrink() {
        // Only quality 0.70 or lower fits at full size.
        let codec = MockCodec::new(4000, 3000, |_, _, q| if q < 0.75 { 1_400_000 } else { 1_600_000 });
        let pre = ImagePreprocessor::with_codec(codec, PreprocessConfig::default());

        let asset = pre.preprocess(&source("a.jpg", None)).unwrap();
        assert_eq!((asset.width, asset.height), (1600, 1200));
        let encodes: Vec<u8> = pre
            .codec
            .get_operations()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Encode { quality, .. } => Some(quality),
                _ => None,
            })
            .collect();
        assert_eq!(encodes, vec![86, 78, 70]);
    }

    #[test]
    fn dimensions_shrink_when_no_quality_fits() {
        // Fits once the pixel count drops below ~1.2 megapixels.
        let codec = MockCodec::new(4000, 3000, |w, h, _| (w * h) as usize + 300_000);
        let pre = ImagePreprocessor::with_codec(codec, PreprocessConfig::default());

        let asset = pre.preprocess(&source("a.jpg", Some("image/jpeg"))).unwrap();
        assert_eq!((asset.width, asset.height), (1156, 867));
        assert!(asset.size <= 1_500_000);
        assert_eq!(
            pre.codec.renders(),
            vec![(1600, 1200), (1360, 1020), (1156, 867)]
        );
    }

    #[test]
    fn gives_up_with_too_large_above_min_dimension() {
        let codec = MockCodec::new(4000, 3000, |_, _, _| 2_000_000);
        let pre = ImagePreprocessor::with_codec(codec, PreprocessConfig::default());

        let err = pre.preprocess(&source("a.jpg", Some("image/jpeg"))).unwrap_err();
        assert_eq!(err, PreprocessError::TooLarge { max_bytes: 1_500_000 });

        let renders = pre.codec.renders();
        assert_eq!(renders.len(), 6);
        assert_eq!(renders.last(), Some(&(711, 532)));
        assert!(renders.iter().all(|(w, h)| (*w).max(*h) >= 640));
        // Four qualities per dimension set.
        assert_eq!(pre.codec.get_operations().len(), 1 + 6 + 6 * 4);
    }

    #[test]
    fn real_codec_bounds_output() {
        use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

        let mut img = RgbImage::new(1800, 1200);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
        }
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();

        let config = PreprocessConfig {
            max_bytes: 400_000,
            ..PreprocessConfig::default()
        };
        let pre = ImagePreprocessor::new(config);
        let asset = pre
            .preprocess(&SourceImage {
                data: Bytes::from(png),
                file_name: "gradient.png".to_string(),
                mime_type: Some("image/png".to_string()),
            })
            .unwrap();

        assert!(asset.width.max(asset.height) <= 1600);
        assert!(asset.size <= 400_000);
        assert_eq!(asset.file_name, "gradient.jpg");
        assert_eq!(&asset.payload[..2], &[0xff, 0xd8]);
    }
}
