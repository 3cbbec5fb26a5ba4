//! Local binarization: gaussian-weighted adaptive threshold and Sauvola.
//!
//! Both produce pure black (0) and white (255) output. An input that is already pure black
//! and white is returned as is, which makes both filters idempotent.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;
use imageproc::integral_image::{integral_image, integral_squared_image, sum_image_pixels};
use rayon::prelude::*;

use super::kernel::{ensure_fits, sigma_for_ksize};
use super::{FilterId, FilterParams};
use crate::error::FilterError;

const WHITE: u8 = 255;
const BLACK: u8 = 0;

/// True if every pixel is either 0 or 255.
pub fn is_binary(image: &GrayImage) -> bool {
    image.as_raw().iter().all(|v| *v == BLACK || *v == WHITE)
}

/// Gaussian adaptive threshold: white where `src > local_mean - c`.
///
/// Parameters: `block_size` (odd, 3..=101, default 31), `c` (-20..=20, default 5).
pub fn adaptive_threshold(image: &GrayImage, params: &FilterParams) -> Result<GrayImage, FilterError> {
    let block = params.odd_window(FilterId::AdaptiveThreshold, "block_size", 31, 3, 101)?;
    let c = params.number(FilterId::AdaptiveThreshold, "c", 5.0, -20.0, 20.0)? as f32;
    ensure_fits(FilterId::AdaptiveThreshold, block, image)?;

    if is_binary(image) {
        return Ok(image.clone());
    }

    let mean = gaussian_blur_f32(image, sigma_for_ksize(block) as f32);
    let data: Vec<u8> = image
        .as_raw()
        .iter()
        .zip(mean.as_raw())
        .map(|(src, m)| if *src as f32 > *m as f32 - c { WHITE } else { BLACK })
        .collect();
    raw_image(image, data)
}

/// Sauvola binarization: white where `src > m * (1 + k * (s / r - 1))`.
///
/// `m` and `s` are the mean and standard deviation of the `window x window` neighbourhood,
/// clipped at the image border.
///
/// Parameters: `window` (odd, 3..=255, default 31), `k` (0..=1, default 0.2),
/// `r` (1..=255, default 128).
pub fn sauvola(image: &GrayImage, params: &FilterParams) -> Result<GrayImage, FilterError> {
    let window = params.odd_window(FilterId::Sauvola, "window", 31, 3, 255)?;
    let k = params.number(FilterId::Sauvola, "k", 0.2, 0.0, 1.0)?;
    let r = params.number(FilterId::Sauvola, "r", 128.0, 1.0, 255.0)?;
    ensure_fits(FilterId::Sauvola, window, image)?;

    if is_binary(image) {
        return Ok(image.clone());
    }

    let (width, height) = (image.width() as usize, image.height() as usize);
    let sums: ImageBuffer<Luma<u64>, Vec<u64>> = integral_image(image);
    let squares: ImageBuffer<Luma<u64>, Vec<u64>> = integral_squared_image(image);
    let half = (window / 2) as usize;
    let src = image.as_raw();

    let mut data = vec![0u8; width * height];
    data.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let y0 = y.saturating_sub(half);
        let y1 = (y + half + 1).min(height);
        for (x, out) in row.iter_mut().enumerate() {
            let x0 = x.saturating_sub(half);
            let x1 = (x + half + 1).min(width);
            let n = ((x1 - x0) * (y1 - y0)) as f64;
            let (left, top, right, bottom) = (x0 as u32, y0 as u32, x1 as u32 - 1, y1 as u32 - 1);
            let sum = sum_image_pixels(&sums, left, top, right, bottom)[0];
            let sq_sum = sum_image_pixels(&squares, left, top, right, bottom)[0];
            let mean = sum as f64 / n;
            let variance = (sq_sum as f64 / n - mean * mean).max(0.0);
            let threshold = mean * (1.0 + k * (variance.sqrt() / r - 1.0));
            *out = if src[y * width + x] as f64 > threshold { WHITE } else { BLACK };
        }
    });
    raw_image(image, data)
}

fn raw_image(like: &GrayImage, data: Vec<u8>) -> Result<GrayImage, FilterError> {
    GrayImage::from_raw(like.width(), like.height(), data).ok_or_else(|| FilterError::EmptyImage {
        filter: "threshold".to_string(),
    })
}

/// Synthetic page: light paper, darker strokes, with a soft left-to-right gradient.
#[cfg(test)]
pub(crate) fn gradient_page(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let paper = 170 + (x * 60 / width.max(1)) as u8;
        let stroke = (y % 12 < 3) && (x % 9 > 2);
        Luma([if stroke { paper.saturating_sub(110) } else { paper }])
    })
}
