//! Stateless bitmap filters and the registry that dispatches them.
//!
//! Every filter is a plain function `(&GrayImage, &FilterParams) -> Result<GrayImage, FilterError>`.
//! Strategies refer to filters by [`FilterId`] and carry their parameters as data, so a
//! chain can be loaded from config, logged, compared and replayed.

mod background;
mod clahe;
mod deskew;
mod gaussian;
pub(crate) mod kernel;
mod shadow;
mod sharpen;
mod threshold;

use ahash::AHashMap;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::FilterError;

pub use background::background_norm;
pub use clahe::clahe;
pub use deskew::deskew;
pub use gaussian::gaussian;
pub use shadow::shadow_removal;
pub use sharpen::sharpen;
pub use threshold::{adaptive_threshold, is_binary, sauvola};

/// Signature shared by all filters.
pub type FilterFn = fn(&GrayImage, &FilterParams) -> Result<GrayImage, FilterError>;

/// Identifier of a filter in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterId {
    Gaussian,
    BackgroundNorm,
    Clahe,
    AdaptiveThreshold,
    Sauvola,
    ShadowRemoval,
    Sharpen,
    Deskew,
}

impl FilterId {
    pub const ALL: [FilterId; 8] = [
        FilterId::Gaussian,
        FilterId::BackgroundNorm,
        FilterId::Clahe,
        FilterId::AdaptiveThreshold,
        FilterId::Sauvola,
        FilterId::ShadowRemoval,
        FilterId::Sharpen,
        FilterId::Deskew,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FilterId::Gaussian => "gaussian",
            FilterId::BackgroundNorm => "background_norm",
            FilterId::Clahe => "clahe",
            FilterId::AdaptiveThreshold => "adaptive_threshold",
            FilterId::Sauvola => "sauvola",
            FilterId::ShadowRemoval => "shadow_removal",
            FilterId::Sharpen => "sharpen",
            FilterId::Deskew => "deskew",
        }
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown filter '{}'", s))
    }
}

/// Named numeric parameters of one filter invocation.
///
/// Missing keys fall back to the filter's documented default.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterParams(BTreeMap<String, f64>);

impl FilterParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Read a real-valued parameter constrained to `[min, max]`.
    pub(crate) fn number(&self, filter: FilterId, key: &str, default: f64, min: f64, max: f64) -> Result<f64, FilterError> {
        let value = self.get(key).unwrap_or(default);
        if !value.is_finite() {
            return Err(FilterError::invalid(filter.as_str(), key, "must be finite"));
        }
        if value < min || value > max {
            return Err(FilterError::invalid(
                filter.as_str(),
                key,
                format!("{} outside [{}, {}]", value, min, max),
            ));
        }
        Ok(value)
    }

    /// Read an odd integral window size no smaller than `min`.
    pub(crate) fn odd_window(&self, filter: FilterId, key: &str, default: u32, min: u32, max: u32) -> Result<u32, FilterError> {
        let value = self.integer(filter, key, default, min, max)?;
        if value % 2 == 0 {
            return Err(FilterError::invalid(
                filter.as_str(),
                key,
                format!("{} must be odd", value),
            ));
        }
        Ok(value)
    }

    pub(crate) fn integer(&self, filter: FilterId, key: &str, default: u32, min: u32, max: u32) -> Result<u32, FilterError> {
        let value = self.number(filter, key, default as f64, min as f64, max as f64)?;
        if value.fract() != 0.0 {
            return Err(FilterError::invalid(
                filter.as_str(),
                key,
                format!("{} must be an integer", value),
            ));
        }
        Ok(value as u32)
    }
}

impl fmt::Display for FilterParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

/// One element of a strategy's filter chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStep {
    pub filter: FilterId,
    #[serde(default)]
    pub params: FilterParams,
}

impl FilterStep {
    pub fn new(filter: FilterId, params: FilterParams) -> Self {
        Self { filter, params }
    }
}

impl fmt::Display for FilterStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.filter, self.params)
    }
}

/// Lookup table from filter identifier to transform.
#[derive(Clone)]
pub struct FilterRegistry {
    filters: AHashMap<FilterId, FilterFn>,
}

impl FilterRegistry {
    /// A registry with no filters installed.
    pub fn empty() -> Self {
        Self {
            filters: AHashMap::new(),
        }
    }

    /// Install or replace the transform for `id`.
    pub fn register(&mut self, id: FilterId, filter: FilterFn) -> Option<FilterFn> {
        self.filters.insert(id, filter)
    }

    pub fn get(&self, id: FilterId) -> Option<FilterFn> {
        self.filters.get(&id).copied()
    }

    pub fn contains(&self, id: FilterId) -> bool {
        self.filters.contains_key(&id)
    }

    pub fn apply(&self, step: &FilterStep, image: &GrayImage) -> Result<GrayImage, FilterError> {
        let filter = self.get(step.filter).ok_or_else(|| {
            FilterError::invalid(step.filter.as_str(), "filter", "not registered")
        })?;
        if image.width() == 0 || image.height() == 0 {
            return Err(FilterError::EmptyImage {
                filter: step.filter.as_str().to_string(),
            });
        }
        filter(image, &step.params)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(FilterId::Gaussian, gaussian);
        registry.register(FilterId::BackgroundNorm, background_norm);
        registry.register(FilterId::Clahe, clahe);
        registry.register(FilterId::AdaptiveThreshold, adaptive_threshold);
        registry.register(FilterId::Sauvola, sauvola);
        registry.register(FilterId::ShadowRemoval, shadow_removal);
        registry.register(FilterId::Sharpen, sharpen);
        registry.register(FilterId::Deskew, deskew);
        registry
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.filters.keys().collect();
        ids.sort();
        f.debug_struct("FilterRegistry").field("filters", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_default_registry_covers_all_filters() {
        let registry = FilterRegistry::default();
        for id in FilterId::ALL {
            assert!(registry.contains(id), "{} missing", id);
        }
    }

    #[test]
    fn test_filter_id_round_trips_through_str() {
        for id in FilterId::ALL {
            assert_eq!(id.as_str().parse::<FilterId>().unwrap(), id);
        }
        assert!("median".parse::<FilterId>().is_err());
    }

    #[test]
    fn test_unregistered_filter_is_an_error() {
        let registry = FilterRegistry::empty();
        let image = GrayImage::from_pixel(8, 8, Luma([200]));
        let step = FilterStep::new(FilterId::Sharpen, FilterParams::new());
        assert!(matches!(
            registry.apply(&step, &image),
            Err(FilterError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_register_replaces_transform() {
        fn invert(image: &GrayImage, _: &FilterParams) -> Result<GrayImage, FilterError> {
            let mut out = image.clone();
            image::imageops::invert(&mut out);
            Ok(out)
        }

        let mut registry = FilterRegistry::default();
        registry.register(FilterId::Sharpen, invert);
        let image = GrayImage::from_pixel(4, 4, Luma([10]));
        let out = registry
            .apply(&FilterStep::new(FilterId::Sharpen, FilterParams::new()), &image)
            .unwrap();
        assert_eq!(out.get_pixel(0, 0).0[0], 245);
    }

    #[test]
    fn test_params_validation() {
        let params = FilterParams::new().with("window", 30.0).with("k", f64::NAN);
        assert!(params.odd_window(FilterId::Sauvola, "window", 31, 3, 255).is_err());
        assert!(params.number(FilterId::Sauvola, "k", 0.2, 0.0, 1.0).is_err());
        assert_eq!(
            params.odd_window(FilterId::Sauvola, "missing", 31, 3, 255).unwrap(),
            31
        );
    }

    #[test]
    fn test_step_display() {
        let step = FilterStep::new(FilterId::Clahe, FilterParams::new().with("clip_limit", 2.0).with("tiles", 8.0));
        assert_eq!(step.to_string(), "clahe(clip_limit=2, tiles=8)");
    }

    #[test]
    fn test_params_serde_is_a_plain_map() {
        let params = FilterParams::new().with("ksize", 3.0);
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"ksize":3.0}"#);
        let back: FilterParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
