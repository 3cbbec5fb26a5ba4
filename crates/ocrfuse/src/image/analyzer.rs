//! Global measurements of a page bitmap.
//!
//! Every reduction runs sequentially over the pixels in row-major order so the same
//! bitmap always yields bit-identical floats.

use image::GrayImage;
use image::imageops::{self, FilterType};
use imageproc::contrast::otsu_level;
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};

use crate::core::config::AnalyzerConfig;
use crate::error::PageError;
use crate::types::RawPage;

const NOISE_SIGMA: f32 = 0.8;
const BACKGROUND_SIGMA: f32 = 8.0;
const LOW_RESOLUTION_LONG_SIDE: u32 = 1500;
const HIGH_RESOLUTION_LONG_SIDE: u32 = 3000;
/// Below this many dark pixels there is no text to measure skew on.
const MIN_SKEW_PIXELS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionClass {
    Low,
    Standard,
    High,
}

impl ResolutionClass {
    pub fn from_long_side(long_side: u32) -> Self {
        if long_side < LOW_RESOLUTION_LONG_SIDE {
            Self::Low
        } else if long_side > HIGH_RESOLUTION_LONG_SIDE {
            Self::High
        } else {
            Self::Standard
        }
    }
}

/// Measured features of one page. Built once per page and never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    /// Standard deviation of gray levels divided by 255
    pub contrast: f64,
    /// Standard deviation of the high-frequency residual
    pub noise: f64,
    /// Text line slope, positive when lines descend to the right
    pub skew_degrees: f64,
    /// Standard deviation of the heavily blurred page
    pub background_variance: f64,
    /// Variance of the Laplacian
    pub sharpness: f64,
    /// Share of near-black and near-white pixels
    pub binary_ratio: f64,
    pub width: u32,
    pub height: u32,
    pub resolution_class: ResolutionClass,
    pub suggested_dpi: u32,
}

impl FeatureSummary {
    pub fn long_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageAnalyzer {
    config: AnalyzerConfig,
}

impl ImageAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Decode a raw page and analyze it.
    pub fn analyze_page(&self, page: &RawPage) -> Result<FeatureSummary, PageError> {
        let gray = page.to_gray()?;
        self.analyze(&gray)
    }

    pub fn analyze(&self, image: &GrayImage) -> Result<FeatureSummary, PageError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PageError::InvalidImage(format!("bitmap has zero area ({}x{})", width, height)));
        }

        let work = self.work_image(image);
        let (_, contrast_std) = mean_std(work.as_raw().iter().map(|&p| p as f64));

        let smooth = gaussian_blur_f32(&work, NOISE_SIGMA);
        let (_, noise) = mean_std(
            work.as_raw()
                .iter()
                .zip(smooth.as_raw())
                .map(|(&p, &s)| (p as f64 - s as f64).abs()),
        );

        let background = gaussian_blur_f32(&work, BACKGROUND_SIGMA);
        let (_, background_variance) = mean_std(background.as_raw().iter().map(|&p| p as f64));

        let tolerance = self.config.binary_tolerance;
        let extremes = work
            .as_raw()
            .iter()
            .filter(|&&p| p <= tolerance || p >= 255 - tolerance)
            .count();
        let binary_ratio = extremes as f64 / work.as_raw().len() as f64;

        let long_side = width.max(height);
        Ok(FeatureSummary {
            contrast: contrast_std / 255.0,
            noise,
            skew_degrees: self.estimate_skew(&work),
            background_variance,
            sharpness: laplacian_variance(&work),
            binary_ratio,
            width,
            height,
            resolution_class: ResolutionClass::from_long_side(long_side),
            suggested_dpi: if long_side < LOW_RESOLUTION_LONG_SIDE { 96 } else { 300 },
        })
    }

    fn work_image(&self, image: &GrayImage) -> GrayImage {
        let (width, height) = image.dimensions();
        let long_side = width.max(height);
        let max_side = self.config.analysis_max_side.max(1);
        if long_side <= max_side {
            return image.clone();
        }
        let scale = max_side as f64 / long_side as f64;
        let w = ((width as f64 * scale).round() as u32).max(1);
        let h = ((height as f64 * scale).round() as u32).max(1);
        imageops::resize(image, w, h, FilterType::Nearest)
    }

    /// Projection-profile skew search over the dark pixels of `work`.
    fn estimate_skew(&self, work: &GrayImage) -> f64 {
        let step = self.config.skew_step_degrees;
        let max = self.config.max_skew_degrees;
        if step <= 0.0 || max <= 0.0 {
            return 0.0;
        }

        let level = otsu_level(work);
        let dark: Vec<(f64, f64)> = work
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] <= level)
            .map(|(x, y, _)| (x as f64, y as f64))
            .collect();
        if dark.len() < MIN_SKEW_PIXELS || dark.len() * 2 > work.as_raw().len() {
            return 0.0;
        }

        let steps = (max / step + 1e-9).floor() as i64;
        let margin = work.width() as f64 * max.to_radians().tan().abs() + 1.0;
        let bins = (work.height() as f64 + 2.0 * margin).ceil() as usize + 1;
        let mut histogram = vec![0u64; bins];

        let mut best_angle = 0.0;
        let mut best_score = 0u64;
        // 0, +step, -step, +2 step, ... so ties keep the smallest magnitude
        let candidates = std::iter::once(0).chain((1..=steps).flat_map(|k| [k, -k]));
        for k in candidates {
            let angle = k as f64 * step;
            let slope = angle.to_radians().tan();
            histogram.iter_mut().for_each(|b| *b = 0);
            for &(x, y) in &dark {
                let bin = (y - x * slope + margin).round().clamp(0.0, (bins - 1) as f64) as usize;
                histogram[bin] += 1;
            }
            let score: u64 = histogram.iter().map(|&c| c * c).sum();
            if score > best_score {
                best_score = score;
                best_angle = angle;
            }
        }
        best_angle
    }
}

fn mean_std(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (mut n, mut sum, mut sum_sq) = (0usize, 0.0, 0.0);
    for v in values {
        n += 1;
        sum += v;
        sum_sq += v * v;
    }
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let variance = (sum_sq / n as f64 - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

fn laplacian_variance(work: &GrayImage) -> f64 {
    let (width, height) = work.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }
    let at = |x: u32, y: u32| work.get_pixel(x, y).0[0] as f64;
    let responses = (1..height - 1).flat_map(|y| {
        (1..width - 1).map(move |x| at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y))
    });
    let (_, std) = mean_std(responses);
    std * std
}
