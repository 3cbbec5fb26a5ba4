//! Rule table mapping page features to preprocessing strategies.
//!
//! Rules are evaluated in priority order and the first match becomes the primary
//! strategy. A comparison close to its threshold is treated as undecided: the table is
//! evaluated again with that comparison flipped, and a different outcome becomes an
//! alternate strategy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::config::SelectorConfig;
use crate::image::analyzer::FeatureSummary;
use crate::image::filters::{FilterId, FilterParams, FilterStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyOrigin {
    Primary,
    Alternate,
}

/// A named filter chain. An empty chain leaves the page untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    pub origin: StrategyOrigin,
    pub steps: Vec<FilterStep>,
}

impl Strategy {
    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name)?;
        if self.steps.is_empty() {
            return f.write_str("identity");
        }
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feature {
    BinaryRatio,
    Noise,
    AbsSkew,
    BackgroundVariance,
    Contrast,
    LongSide,
}

impl Feature {
    fn value(self, summary: &FeatureSummary) -> f64 {
        match self {
            Feature::BinaryRatio => summary.binary_ratio,
            Feature::Noise => summary.noise,
            Feature::AbsSkew => summary.skew_degrees.abs(),
            Feature::BackgroundVariance => summary.background_variance,
            Feature::Contrast => summary.contrast,
            Feature::LongSide => summary.long_side() as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy)]
struct Condition {
    feature: Feature,
    comparison: Comparison,
    threshold: f64,
}

impl Condition {
    fn holds(&self, summary: &FeatureSummary) -> bool {
        let value = self.feature.value(summary);
        match self.comparison {
            Comparison::Above => value > self.threshold,
            Comparison::Below => value < self.threshold,
        }
    }

    fn is_near(&self, summary: &FeatureSummary, margin: f64) -> bool {
        let value = self.feature.value(summary);
        (value - self.threshold).abs() <= margin * self.threshold.abs().max(1e-6)
    }
}

type ChainFn = fn(&FeatureSummary) -> Vec<FilterStep>;

struct Rule {
    name: &'static str,
    condition: Option<Condition>,
    chain: ChainFn,
}

fn step(filter: FilterId, params: &[(&str, f64)]) -> FilterStep {
    let params = params.iter().fold(FilterParams::new(), |p, (k, v)| p.with(k, *v));
    FilterStep::new(filter, params)
}

fn sauvola_step() -> FilterStep {
    step(FilterId::Sauvola, &[("window", 31.0), ("k", 0.2), ("r", 128.0)])
}

fn identity_chain(_: &FeatureSummary) -> Vec<FilterStep> {
    Vec::new()
}

fn noisy_chain(_: &FeatureSummary) -> Vec<FilterStep> {
    vec![
        step(FilterId::Gaussian, &[("ksize", 3.0), ("sigma", 0.8)]),
        step(FilterId::Clahe, &[("clip_limit", 2.0), ("tiles", 8.0)]),
        sauvola_step(),
    ]
}

fn skewed_chain(summary: &FeatureSummary) -> Vec<FilterStep> {
    vec![step(FilterId::Deskew, &[("angle", summary.skew_degrees)]), sauvola_step()]
}

fn uneven_background_chain(_: &FeatureSummary) -> Vec<FilterStep> {
    vec![
        step(FilterId::BackgroundNorm, &[("ksize", 51.0), ("eps", 0.001)]),
        step(FilterId::AdaptiveThreshold, &[("block_size", 31.0), ("c", 5.0)]),
    ]
}

fn low_contrast_chain(_: &FeatureSummary) -> Vec<FilterStep> {
    vec![
        step(FilterId::Clahe, &[("clip_limit", 3.0), ("tiles", 8.0)]),
        step(FilterId::Sharpen, &[("strength", 0.5)]),
    ]
}

fn low_resolution_chain(_: &FeatureSummary) -> Vec<FilterStep> {
    vec![
        step(FilterId::Gaussian, &[("ksize", 3.0), ("sigma", 0.8)]),
        step(FilterId::Sharpen, &[("strength", 0.3)]),
    ]
}

/// Chooses the preprocessing strategies for a page.
#[derive(Debug, Clone, Default)]
pub struct StrategySelector {
    config: SelectorConfig,
}

impl StrategySelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    fn rules(&self) -> [Rule; 7] {
        let c = &self.config;
        let when = |feature, comparison, threshold| {
            Some(Condition {
                feature,
                comparison,
                threshold,
            })
        };
        [
            Rule {
                name: "binary",
                condition: when(Feature::BinaryRatio, Comparison::Above, c.binary_ratio_min),
                chain: identity_chain,
            },
            Rule {
                name: "noisy",
                condition: when(Feature::Noise, Comparison::Above, c.noise_max),
                chain: noisy_chain,
            },
            Rule {
                name: "skewed",
                condition: when(Feature::AbsSkew, Comparison::Above, c.skew_max_degrees),
                chain: skewed_chain,
            },
            Rule {
                name: "uneven_background",
                condition: when(Feature::BackgroundVariance, Comparison::Above, c.background_variance_max),
                chain: uneven_background_chain,
            },
            Rule {
                name: "low_contrast",
                condition: when(Feature::Contrast, Comparison::Below, c.contrast_min),
                chain: low_contrast_chain,
            },
            Rule {
                name: "low_resolution",
                condition: when(Feature::LongSide, Comparison::Below, c.low_resolution_long_side),
                chain: low_resolution_chain,
            },
            Rule {
                name: "clean_scan",
                condition: None,
                chain: identity_chain,
            },
        ]
    }

    /// First matching rule, with the outcome of rule `flipped` inverted.
    fn first_match<'r>(rules: &'r [Rule], summary: &FeatureSummary, flipped: Option<usize>) -> &'r Rule {
        rules
            .iter()
            .enumerate()
            .find(|(i, rule)| {
                let holds = rule.condition.is_none_or(|c| c.holds(summary));
                if flipped == Some(*i) { !holds } else { holds }
            })
            .map(|(_, rule)| rule)
            .unwrap_or(&rules[rules.len() - 1])
    }

    /// The primary strategy followed by up to `max_alternates` alternates.
    ///
    /// The result is a pure function of the summary and configuration.
    pub fn select(&self, summary: &FeatureSummary) -> Vec<Strategy> {
        let rules = self.rules();
        let primary = Self::first_match(&rules, summary, None);
        let mut strategies = vec![Strategy {
            name: primary.name.to_string(),
            origin: StrategyOrigin::Primary,
            steps: (primary.chain)(summary),
        }];

        for (i, rule) in rules.iter().enumerate() {
            if strategies.len() > self.config.max_alternates {
                break;
            }
            let Some(condition) = rule.condition else {
                continue;
            };
            if !condition.is_near(summary, self.config.ambiguity_margin) {
                continue;
            }
            let alternate = Self::first_match(&rules, summary, Some(i));
            let steps = (alternate.chain)(summary);
            if strategies.iter().any(|s| s.steps == steps) {
                continue;
            }
            strategies.push(Strategy {
                name: alternate.name.to_string(),
                origin: StrategyOrigin::Alternate,
                steps,
            });
        }
        strategies
    }
}
