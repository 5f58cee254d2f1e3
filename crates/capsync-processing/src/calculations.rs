//! Pure dimension, quality and naming calculations.
//!
//! No I/O and no pixels: everything here is unit tested directly and shared by
//! the preprocessing loop.

use capsync_core::PreprocessConfig;

/// Scale `(width, height)` so the longest edge is at most `max_dimension`.
///
/// Images already within the bound are returned unchanged; each edge is rounded
/// and never drops below 1.
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension {
        return (width, height);
    }
    let scale = max_dimension as f64 / longest as f64;
    scale_dimensions(width, height, scale)
}

/// Multiply both edges by `factor`, rounding each and keeping it at least 1.
pub fn scale_dimensions(width: u32, height: u32, factor: f64) -> (u32, u32) {
    let scale = |edge: u32| ((edge as f64 * factor).round() as u32).max(1);
    (scale(width), scale(height))
}

/// Next dimensions to try after a failed quality sweep, or `None` once the
/// longest edge would fall below `config.min_dimension`.
pub fn next_attempt_dimensions(
    width: u32,
    height: u32,
    config: &PreprocessConfig,
) -> Option<(u32, u32)> {
    let (next_width, next_height) = scale_dimensions(width, height, config.resize_step as f64);
    if next_width.max(next_height) < config.min_dimension {
        None
    } else {
        Some((next_width, next_height))
    }
}

/// Descending JPEG qualities tried at one set of dimensions.
///
/// Computed from the step index rather than by repeated subtraction so the
/// floor is not lost to floating point drift (0.86 - 3 * 0.08 stays >= 0.6).
pub fn quality_sweep(config: &PreprocessConfig) -> Vec<f32> {
    const EPSILON: f32 = 1e-4;
    let mut qualities = Vec::new();
    let mut step = 0u32;
    loop {
        let quality = config.initial_quality - config.quality_step * step as f32;
        if quality + EPSILON < config.min_quality {
            break;
        }
        qualities.push(quality.clamp(0.0, 1.0));
        step += 1;
    }
    qualities
}

/// Map a 0.0..=1.0 quality onto the encoder's 1..=100 scale.
pub fn encoder_quality(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Replace the extension of `name` with `ext`.
///
/// Names without an extension, or whose only dot is the leading one, get `ext`
/// appended instead.
pub fn replace_extension(name: &str, ext: &str) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}.{}", &name[..dot], ext),
        _ => format!("{}.{}", name, ext),
    }
}

/// Best-effort mime type from a file extension, for inputs that carry no
/// declared type (local files).
pub fn mime_type_from_name(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(mime)
}
