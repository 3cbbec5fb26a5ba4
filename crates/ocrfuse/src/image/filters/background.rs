use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;

use super::kernel::{ensure_fits, normalize_min_max, sigma_for_ksize};
use super::{FilterId, FilterParams};
use crate::error::FilterError;

/// Flatten uneven illumination by dividing out a heavily blurred background estimate.
///
/// `out = src * mean(bg) / (bg + eps)`, then stretched to the full range.
/// Parameters: `ksize` (odd, 15..=201, default 51), `eps` (0..=1, default 0.001).
pub fn background_norm(image: &GrayImage, params: &FilterParams) -> Result<GrayImage, FilterError> {
    let ksize = params.odd_window(FilterId::BackgroundNorm, "ksize", 51, 15, 201)?;
    let eps = params.number(FilterId::BackgroundNorm, "eps", 0.001, 0.0, 1.0)?;
    ensure_fits(FilterId::BackgroundNorm, ksize, image)?;

    let background = gaussian_blur_f32(image, sigma_for_ksize(ksize) as f32);
    let background = background.as_raw();
    let mean_bg = background.iter().map(|v| *v as f64).sum::<f64>() / background.len() as f64;
    let eps = eps.max(f64::EPSILON);

    let plane: Vec<f32> = image
        .as_raw()
        .iter()
        .zip(background)
        .map(|(src, bg)| (*src as f64 * mean_bg / (*bg as f64 + eps)) as f32)
        .collect();
    Ok(normalize_min_max(image.width(), image.height(), &plane))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_gradient_background_is_flattened() {
        // left half dim, right half bright, with a dark stroke on each side
        let mut image = GrayImage::from_fn(80, 40, |x, _| Luma([if x < 40 { 120 } else { 230 }]));
        for y in 15..25 {
            image.put_pixel(10, y, Luma([40]));
            image.put_pixel(70, y, Luma([80]));
        }
        let out = background_norm(&image, &FilterParams::new().with("ksize", 15.0)).unwrap();

        let left_bg = out.get_pixel(25, 5).0[0] as i32;
        let right_bg = out.get_pixel(55, 5).0[0] as i32;
        let before = 230 - 120;
        assert!((left_bg - right_bg).abs() < before / 2, "{} vs {}", left_bg, right_bg);
        assert!(out.get_pixel(10, 20).0[0] < out.get_pixel(25, 20).0[0]);
    }

    #[test]
    fn test_flat_image_becomes_white() {
        let image = GrayImage::from_pixel(20, 20, Luma([90]));
        let out = background_norm(&image, &FilterParams::new().with("ksize", 15.0)).unwrap();
        assert!(out.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_window_too_large() {
        let image = GrayImage::from_pixel(20, 20, Luma([90]));
        assert!(matches!(
            background_norm(&image, &FilterParams::new()),
            Err(FilterError::IncompatibleDimensions { window: 51, .. })
        ));
    }
}
