use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;

use super::kernel::{ensure_fits, sigma_for_ksize};
use super::{FilterId, FilterParams};
use crate::error::FilterError;

/// Gaussian smoothing.
///
/// Parameters: `ksize` (odd, 3..=31, default 3) and `sigma` (0..=10, default 0).
/// A sigma of zero is derived from the kernel size; `ksize` bounds the window that must
/// fit the image.
pub fn gaussian(image: &GrayImage, params: &FilterParams) -> Result<GrayImage, FilterError> {
    let ksize = params.odd_window(FilterId::Gaussian, "ksize", 3, 3, 31)?;
    let sigma = params.number(FilterId::Gaussian, "sigma", 0.0, 0.0, 10.0)?;
    ensure_fits(FilterId::Gaussian, ksize, image)?;

    let sigma = if sigma <= 0.0 { sigma_for_ksize(ksize) } else { sigma };
    Ok(gaussian_blur_f32(image, sigma as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_gaussian_smooths_impulse() {
        let mut image = GrayImage::from_pixel(9, 9, Luma([0]));
        image.put_pixel(4, 4, Luma([255]));
        let out = gaussian(&image, &FilterParams::new().with("ksize", 3.0)).unwrap();
        let center = out.get_pixel(4, 4).0[0];
        let neighbour = out.get_pixel(5, 4).0[0];
        assert!(center < 255);
        assert!(neighbour > 0);
        assert!(center > neighbour);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_gaussian_rejects_even_kernel() {
        let image = GrayImage::from_pixel(9, 9, Luma([0]));
        let err = gaussian(&image, &FilterParams::new().with("ksize", 4.0)).unwrap_err();
        assert!(matches!(err, FilterError::InvalidParameter { .. }));
    }

    #[test]
    fn test_gaussian_kernel_larger_than_image() {
        let image = GrayImage::from_pixel(4, 40, Luma([0]));
        let err = gaussian(&image, &FilterParams::new().with("ksize", 5.0)).unwrap_err();
        assert!(matches!(err, FilterError::IncompatibleDimensions { .. }));
    }
}
