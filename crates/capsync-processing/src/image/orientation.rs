use bytes::Bytes;
use image::DynamicImage;
use img_parts::{DynImage, ImageEXIF};

/// TIFF payload of a JPEG APP1 segment starts after this marker.
const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// EXIF orientation handling (rotation and flipping)
pub struct ImageOrientation;

impl ImageOrientation {
    /// Rotate/flip `img` so it displays upright according to the EXIF
    /// orientation tag embedded in `data`.
    pub fn apply_exif_orientation(mut img: DynamicImage, data: &[u8]) -> DynamicImage {
        let orientation = Self::read_exif_orientation(data);
        if orientation == 1 {
            return img;
        }
        let (rotate, flip_h) = Self::orientation_transforms(orientation);

        tracing::debug!(
            orientation = orientation,
            rotate = ?rotate,
            flip_horizontal = flip_h,
            "Applying EXIF orientation"
        );

        // Rotation first, then the mirror.
        if let Some(angle) = rotate {
            img = Self::rotate_by_angle(img, angle);
        }
        if flip_h {
            img = img.fliph();
        }

        img
    }

    /// Orientation tag value (1..=8), or 1 when the container carries no
    /// readable EXIF block.
    pub fn read_exif_orientation(data: &[u8]) -> u8 {
        Self::exif_block(data)
            .and_then(|raw| exif::Reader::new().read_raw(raw).ok())
            .and_then(|parsed| {
                parsed
                    .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                    .and_then(|field| field.value.get_uint(0))
            })
            .and_then(|value| u8::try_from(value).ok())
            .filter(|value| (1..=8).contains(value))
            .unwrap_or(1)
    }

    /// Clockwise rotation and horizontal mirror that undo an orientation value.
    /// The mirror is applied after the rotation.
    pub fn orientation_transforms(orientation: u8) -> (Option<u16>, bool) {
        match orientation {
            2 => (None, true),
            3 => (Some(180), false),
            4 => (Some(180), true),
            5 => (Some(90), true),
            6 => (Some(90), false),
            7 => (Some(270), true),
            8 => (Some(270), false),
            _ => (None, false),
        }
    }

    /// Rotate image by 90, 180 or 270 degrees clockwise; other angles are a no-op.
    pub fn rotate_by_angle(img: DynamicImage, angle: u16) -> DynamicImage {
        match angle {
            90 => img.rotate90(),
            180 => img.rotate180(),
            270 => img.rotate270(),
            _ => img,
        }
    }

    fn exif_block(data: &[u8]) -> Option<Vec<u8>> {
        let container = DynImage::from_bytes(Bytes::copy_from_slice(data)).ok()??;
        let exif = container.exif()?;
        let raw = exif.strip_prefix(EXIF_HEADER).unwrap_or(&exif[..]);
        Some(raw.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    /// 2x1 image: red on the left, blue on the right.
    fn two_pixels() -> DynamicImage {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 0, Rgba([0, 0, 255, 255]));
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 2, Rgba([0, 0, 255, 255])));
        assert_eq!(ImageOrientation::rotate_by_angle(img.clone(), 90).dimensions(), (2, 4));
        assert_eq!(ImageOrientation::rotate_by_angle(img.clone(), 180).dimensions(), (4, 2));
        assert_eq!(ImageOrientation::rotate_by_angle(img.clone(), 270).dimensions(), (2, 4));
        assert_eq!(ImageOrientation::rotate_by_angle(img, 45).dimensions(), (4, 2));
    }

    #[test]
    fn transforms_cover_all_orientations() {
        assert_eq!(ImageOrientation::orientation_transforms(1), (None, false));
        assert_eq!(ImageOrientation::orientation_transforms(6), (Some(90), false));
        assert_eq!(ImageOrientation::orientation_transforms(8), (Some(270), false));
        assert_eq!(ImageOrientation::orientation_transforms(0), (None, false));
        assert_eq!(ImageOrientation::orientation_transforms(9), (None, false));
    }

    #[test]
    fn transpose_orientation_maps_pixels_onto_diagonal() {
        // Orientation 5 is a transpose: (x, y) -> (y, x).
        let (rotate, flip) = ImageOrientation::orientation_transforms(5);
        let mut img = ImageOrientation::rotate_by_angle(two_pixels(), rotate.unwrap());
        if flip {
            img = img.fliph();
        }
        assert_eq!(img.dimensions(), (1, 2));
        assert_eq!(img.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(img.get_pixel(0, 1), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn missing_exif_reads_as_upright() {
        assert_eq!(ImageOrientation::read_exif_orientation(b"not an image"), 1);

        let mut png = Vec::new();
        two_pixels()
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        assert_eq!(ImageOrientation::read_exif_orientation(&png), 1);

        let untouched = ImageOrientation::apply_exif_orientation(two_pixels(), &png);
        assert_eq!(untouched.dimensions(), (2, 1));
    }
}
