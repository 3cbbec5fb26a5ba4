//! Page analysis and preprocessing.
//!
//! The analyzer measures a page, the selector turns the measurements into one or more
//! strategies, and the preprocessing pipeline runs each strategy's filter chain to
//! produce the bitmaps handed to recognition.

pub mod analyzer;
pub mod filters;
pub mod preprocess;
pub mod strategy;

pub use analyzer::{FeatureSummary, ImageAnalyzer, ResolutionClass};
pub use filters::{FilterFn, FilterId, FilterParams, FilterRegistry, FilterStep};
pub use preprocess::{PreprocessOutput, PreprocessPipeline, Variant, VariantFailure};
pub use strategy::{Strategy, StrategyOrigin, StrategySelector};
