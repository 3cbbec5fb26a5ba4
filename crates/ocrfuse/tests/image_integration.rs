//! Analysis, strategy selection and preprocessing on synthetic scans.

use std::sync::Arc;

use image::{GrayImage, Luma};
use ocrfuse::image::filters::{FilterId, FilterRegistry};
use ocrfuse::image::{ImageAnalyzer, PreprocessPipeline, StrategyOrigin, StrategySelector};

/// Gray page with thin dashed text lines descending at `degrees`.
fn tilted_page(width: u32, height: u32, degrees: f64) -> GrayImage {
    let slope = degrees.to_radians().tan();
    let mut page = GrayImage::from_pixel(width, height, Luma([200]));
    let mut y0 = 40.0;
    while y0 < height as f64 - 60.0 {
        for x in 20..width - 20 {
            if x % 50 > 42 {
                continue;
            }
            let y = (y0 + x as f64 * slope).round() as i64;
            for dy in 0..4 {
                let yy = y + dy;
                if yy >= 0 && (yy as u32) < height {
                    page.put_pixel(x, yy as u32, Luma([60]));
                }
            }
        }
        y0 += 36.0;
    }
    page
}

#[tokio::test]
async fn test_skewed_scan_is_deskewed() {
    let page = Arc::new(tilted_page(600, 400, -3.0));
    let analyzer = ImageAnalyzer::default();
    let features = analyzer.analyze(&page).unwrap();
    assert_eq!(features.skew_degrees, -3.0);
    assert_eq!(features.binary_ratio, 0.0);

    let strategies = StrategySelector::default().select(&features);
    assert_eq!(strategies[0].name, "skewed");
    assert_eq!(strategies[0].origin, StrategyOrigin::Primary);
    let deskew = &strategies[0].steps[0];
    assert_eq!(deskew.filter, FilterId::Deskew);
    assert_eq!(deskew.params.get("angle"), Some(-3.0));

    let output = PreprocessPipeline::default().run(Arc::clone(&page), strategies.clone()).await;
    assert!(output.failures.is_empty());
    assert_eq!(output.variants.len(), strategies.len());
    assert_eq!(output.variants[0].image.dimensions(), page.dimensions());

    let straightened = analyzer.analyze(&output.variants[0].image).unwrap();
    assert!(straightened.skew_degrees.abs() <= 1.0, "residual skew {}", straightened.skew_degrees);
}

#[tokio::test]
async fn test_every_selectable_chain_runs_on_a_small_page() {
    let registry = Arc::new(FilterRegistry::default());
    let pipeline = PreprocessPipeline::new(Arc::clone(&registry));
    let page = tilted_page(320, 240, 2.0);

    for filter in [
        FilterId::Gaussian,
        FilterId::Clahe,
        FilterId::Sauvola,
        FilterId::Deskew,
        FilterId::BackgroundNorm,
        FilterId::AdaptiveThreshold,
        FilterId::Sharpen,
    ] {
        assert!(registry.contains(filter), "{:?} is registered", filter);
    }

    let features = ImageAnalyzer::default().analyze(&page).unwrap();
    let mut selector_config = ocrfuse::core::config::SelectorConfig::default();
    // Make every rule borderline so alternates cover most chains
    selector_config.ambiguity_margin = 1.0;
    selector_config.max_alternates = 6;
    let strategies = StrategySelector::new(selector_config).select(&features);
    assert!(strategies.len() > 1);

    for strategy in &strategies {
        let out = pipeline.apply_chain(&page, strategy).unwrap();
        assert_eq!(out.dimensions(), page.dimensions(), "{}", strategy);
    }
}

#[test]
fn test_identity_variant_shares_source() {
    let page = Arc::new(GrayImage::from_pixel(64, 64, Luma([255])));
    let features = ImageAnalyzer::default().analyze(&page).unwrap();
    let strategies = StrategySelector::default().select(&features);
    assert!(strategies[0].is_identity());

    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let output = runtime.block_on(PreprocessPipeline::default().run(Arc::clone(&page), strategies));
    assert!(Arc::ptr_eq(&output.variants[0].image, &page));
}
