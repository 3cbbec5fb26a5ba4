//! Numeric building blocks shared by the filters.

use image::{GrayImage, Luma};

use super::FilterId;
use crate::error::FilterError;

/// Sigma a gaussian kernel of `ksize` taps gets when none is given.
pub(crate) fn sigma_for_ksize(ksize: u32) -> f64 {
    0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Reject windows wider than the image's smaller side.
pub(crate) fn ensure_fits(filter: FilterId, window: u32, image: &GrayImage) -> Result<(), FilterError> {
    let (width, height) = image.dimensions();
    if window > width.min(height) {
        return Err(FilterError::IncompatibleDimensions {
            filter: filter.as_str().to_string(),
            window,
            width,
            height,
        });
    }
    Ok(())
}

/// Stretch a float plane to the full 0..=255 range. A flat plane maps to white.
pub(crate) fn normalize_min_max(width: u32, height: u32, plane: &[f32]) -> GrayImage {
    let (min, max) = plane
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let range = max - min;
    if !range.is_finite() || range <= 1e-3 {
        return GrayImage::from_pixel(width, height, Luma([255]));
    }
    let scale = 255.0 / range;
    let mut out = GrayImage::new(width, height);
    for (dst, v) in out.pixels_mut().zip(plane) {
        *dst = Luma([((v - min) * scale).round().clamp(0.0, 255.0) as u8]);
    }
    out
}
