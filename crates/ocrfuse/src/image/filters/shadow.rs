use image::GrayImage;
use imageproc::morphology::{Mask, grayscale_dilate, grayscale_erode};

use super::kernel::{ensure_fits, normalize_min_max};
use super::{FilterId, FilterParams};
use crate::error::FilterError;

/// Remove soft shadows and stains.
///
/// A closing with a square structuring element wider than the strokes estimates the paper
/// surface; the difference to the source keeps only the ink, which is normalized and
/// inverted back to dark-on-light.
///
/// Parameters: `kernel` (odd, 3..=201, default 31).
pub fn shadow_removal(image: &GrayImage, params: &FilterParams) -> Result<GrayImage, FilterError> {
    let kernel = params.odd_window(FilterId::ShadowRemoval, "kernel", 31, 3, 201)?;
    ensure_fits(FilterId::ShadowRemoval, kernel, image)?;

    let radius = u8::try_from(kernel / 2).map_err(|_| FilterError::InvalidParameter {
        filter: FilterId::ShadowRemoval.as_str().to_string(),
        param: "kernel".to_string(),
        reason: format!("{} exceeds the largest structuring element", kernel),
    })?;
    let background = paper_estimate(image, radius);

    let plane: Vec<f32> = background
        .as_raw()
        .iter()
        .zip(image.as_raw())
        .map(|(bg, src)| 255.0 - bg.saturating_sub(*src) as f32)
        .collect();
    Ok(normalize_min_max(image.width(), image.height(), &plane))
}

/// Grayscale closing with a square element of side `2 * radius + 1`.
fn paper_estimate(image: &GrayImage, radius: u8) -> GrayImage {
    let mask = Mask::square(radius);
    grayscale_erode(&grayscale_dilate(image, &mask), &mask)
}
