use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};

use super::{FilterId, FilterParams};
use crate::error::FilterError;

/// Rotations smaller than this are not worth resampling the page for.
const MIN_ANGLE_DEGREES: f64 = 0.05;

/// Undo a measured skew.
///
/// `angle` is the text line slope in degrees, positive when lines descend to the right,
/// as reported by the analyzer. The page is rotated by `-angle` about its centre and
/// uncovered corners are filled with white.
///
/// Parameters: `angle` (-45..=45, default 0).
pub fn deskew(image: &GrayImage, params: &FilterParams) -> Result<GrayImage, FilterError> {
    let angle = params.number(FilterId::Deskew, "angle", 0.0, -45.0, 45.0)?;
    if angle.abs() < MIN_ANGLE_DEGREES {
        return Ok(image.clone());
    }
    let theta = (-angle).to_radians() as f32;
    Ok(rotate_about_center(image, theta, Interpolation::Bilinear, Luma([255])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_angle_is_identity() {
        let image = GrayImage::from_fn(16, 16, |x, _| Luma([(x * 10) as u8]));
        let out = deskew(&image, &FilterParams::new().with("angle", 0.01)).unwrap();
        assert_eq!(out, image);
    }

    #[test]
    fn test_rotation_keeps_dimensions_and_fills_white() {
        let image = GrayImage::from_pixel(40, 30, Luma([0]));
        let out = deskew(&image, &FilterParams::new().with("angle", 10.0)).unwrap();
        assert_eq!(out.dimensions(), (40, 30));
        assert_eq!(out.get_pixel(0, 0).0[0], 255);
        assert_eq!(out.get_pixel(20, 15).0[0], 0);
    }

    #[test]
    fn test_out_of_range_angle() {
        let image = GrayImage::new(4, 4);
        assert!(deskew(&image, &FilterParams::new().with("angle", 60.0)).is_err());
    }
}
