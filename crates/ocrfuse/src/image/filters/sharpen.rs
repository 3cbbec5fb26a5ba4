use image::{GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;

use super::{FilterId, FilterParams};
use crate::error::FilterError;

/// Unsharp mask: `src + strength * (src - blur(src, sigma))`, saturated to 0..=255.
///
/// Parameters: `strength` (0..=5, default 0.3), `sigma` (0.1..=10, default 1.0).
pub fn sharpen(image: &GrayImage, params: &FilterParams) -> Result<GrayImage, FilterError> {
    let strength = params.number(FilterId::Sharpen, "strength", 0.3, 0.0, 5.0)? as f32;
    let sigma = params.number(FilterId::Sharpen, "sigma", 1.0, 0.1, 10.0)? as f32;

    if strength == 0.0 {
        return Ok(image.clone());
    }

    let blurred = gaussian_blur_f32(image, sigma);
    let mut out = GrayImage::new(image.width(), image.height());
    for ((dst, src), blur) in out.pixels_mut().zip(image.pixels()).zip(blurred.pixels()) {
        let s = src.0[0] as f32;
        let v = s + strength * (s - blur.0[0] as f32);
        *dst = Luma([v.round().clamp(0.0, 255.0) as u8]);
    }
    Ok(out)
}
