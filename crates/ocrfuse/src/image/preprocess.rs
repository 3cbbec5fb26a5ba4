use std::sync::Arc;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::FilterError;
use crate::image::filters::FilterRegistry;
use crate::image::strategy::Strategy;

/// A preprocessed bitmap produced by one strategy.
#[derive(Debug, Clone)]
pub struct Variant {
    /// Position of the strategy in the selection
    pub index: usize,
    pub strategy: Strategy,
    pub image: Arc<GrayImage>,
}

/// A strategy whose chain could not be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantFailure {
    pub strategy: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct PreprocessOutput {
    pub variants: Vec<Variant>,
    pub failures: Vec<VariantFailure>,
}

/// Applies strategy chains to a page bitmap.
#[derive(Debug, Clone, Default)]
pub struct PreprocessPipeline {
    registry: Arc<FilterRegistry>,
}

impl PreprocessPipeline {
    pub fn new(registry: Arc<FilterRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    /// Run one chain in order. Stops at the first failing step.
    pub fn apply_chain(&self, image: &GrayImage, strategy: &Strategy) -> Result<GrayImage, FilterError> {
        let mut steps = strategy.steps.iter();
        let Some(first) = steps.next() else {
            return Ok(image.clone());
        };
        let mut current = self.registry.apply(first, image)?;
        for step in steps {
            current = self.registry.apply(step, &current)?;
        }
        Ok(current)
    }

    /// Produce one variant per strategy, running the chains on the blocking pool.
    ///
    /// Identity strategies share the source bitmap. Failing chains are reported in
    /// `failures` and produce no variant; variants keep the order of `strategies`.
    pub async fn run(&self, source: Arc<GrayImage>, strategies: Vec<Strategy>) -> PreprocessOutput {
        let mut output = PreprocessOutput::default();
        let mut tasks = JoinSet::new();

        for (index, strategy) in strategies.into_iter().enumerate() {
            if strategy.is_identity() {
                output.variants.push(Variant {
                    index,
                    strategy,
                    image: Arc::clone(&source),
                });
                continue;
            }

            let pipeline = self.clone();
            let source = Arc::clone(&source);
            let name = strategy.name.clone();
            tasks.spawn_blocking(move || {
                let result = pipeline.apply_chain(&source, &strategy);
                (index, strategy, result)
            });
            debug!(strategy = %name, "Queued preprocessing chain");
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, strategy, Ok(image))) => output.variants.push(Variant {
                    index,
                    strategy,
                    image: Arc::new(image),
                }),
                Ok((_, strategy, Err(e))) => {
                    warn!(strategy = %strategy.name, error = %e, "Preprocessing variant dropped");
                    output.failures.push(VariantFailure {
                        strategy: strategy.name,
                        reason: e.to_string(),
                    });
                }
                Err(join_err) => {
                    warn!(error = %join_err, "Preprocessing task panicked");
                    output.failures.push(VariantFailure {
                        strategy: "unknown".to_string(),
                        reason: format!("preprocessing task failed: {}", join_err),
                    });
                }
            }
        }

        output.variants.sort_by_key(|v| v.index);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::filters::{FilterId, FilterParams, FilterStep, is_binary};
    use crate::image::strategy::StrategyOrigin;
    use image::Luma;

    fn strategy(name: &str, steps: Vec<FilterStep>) -> Strategy {
        Strategy {
            name: name.to_string(),
            origin: StrategyOrigin::Primary,
            steps,
        }
    }

    fn page() -> Arc<GrayImage> {
        Arc::new(GrayImage::from_fn(120, 80, |x, y| {
            if (20..100).contains(&x) && y % 16 < 4 { Luma([30]) } else { Luma([200 - (x / 4) as u8]) }
        }))
    }

    #[tokio::test]
    async fn test_identity_shares_source() {
        let source = page();
        let output = PreprocessPipeline::default()
            .run(Arc::clone(&source), vec![strategy("clean_scan", Vec::new())])
            .await;
        assert_eq!(output.variants.len(), 1);
        assert!(Arc::ptr_eq(&output.variants[0].image, &source));
    }

    #[tokio::test]
    async fn test_chains_run_and_keep_order() {
        let output = PreprocessPipeline::default()
            .run(
                page(),
                vec![
                    strategy(
                        "binarize",
                        vec![FilterStep::new(FilterId::Sauvola, FilterParams::new().with("window", 15.0))],
                    ),
                    strategy("clean_scan", Vec::new()),
                    strategy(
                        "soft",
                        vec![
                            FilterStep::new(FilterId::Gaussian, FilterParams::new()),
                            FilterStep::new(FilterId::Sharpen, FilterParams::new()),
                        ],
                    ),
                ],
            )
            .await;
        let names: Vec<&str> = output.variants.iter().map(|v| v.strategy.name.as_str()).collect();
        assert_eq!(names, vec!["binarize", "clean_scan", "soft"]);
        assert!(is_binary(&output.variants[0].image));
        assert!(output.failures.is_empty());
    }

    #[tokio::test]
    async fn test_failing_chain_is_dropped() {
        let output = PreprocessPipeline::default()
            .run(
                page(),
                vec![
                    strategy(
                        "too_wide",
                        vec![FilterStep::new(
                            FilterId::Sauvola,
                            FilterParams::new().with("window", 101.0),
                        )],
                    ),
                    strategy("clean_scan", Vec::new()),
                ],
            )
            .await;
        assert_eq!(output.variants.len(), 1);
        assert_eq!(output.variants[0].index, 1);
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].strategy, "too_wide");
    }

    #[test]
    fn test_binarized_variant_is_fixed_point() {
        let pipeline = PreprocessPipeline::default();
        let chain = strategy(
            "binarize",
            vec![FilterStep::new(FilterId::Sauvola, FilterParams::new().with("window", 15.0))],
        );
        let once = pipeline.apply_chain(&page(), &chain).unwrap();
        let twice = pipeline.apply_chain(&once, &chain).unwrap();
        assert_eq!(once, twice);
    }
}
