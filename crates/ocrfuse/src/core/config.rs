//! Configuration loading and management.
//!
//! A [`PipelineConfig`] holds the tunable policy of every stage. It can be built in code,
//! loaded from TOML, YAML or JSON, or discovered by walking up from the working directory.
//! Every field has a default, so a config file only needs to name what it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ocr::types::EngineParams;
use crate::{OcrFuseError, Result};

/// File names `discover` looks for, in order, in each directory.
pub const CONFIG_FILE_NAMES: [&str; 3] = ["ocrfuse.toml", ".ocrfuse.toml", "ocrfuse.yaml"];

/// Main pipeline configuration.
///
/// # Example
///
/// ```rust
/// use ocrfuse::core::config::PipelineConfig;
///
/// let config = PipelineConfig::default();
/// assert_eq!(config.ocr.engines.len(), 1);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pages processed at once (None = number of CPUs)
    #[serde(default)]
    pub max_concurrent_pages: Option<usize>,

    /// Upper bound for bitmaps held in memory across all pages, in MiB
    #[serde(default = "default_memory_budget_mb")]
    pub memory_budget_mb: usize,

    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    #[serde(default)]
    pub selector: SelectorConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub fusion: FusionConfig,

    #[serde(default)]
    pub lines: LineBuilderConfig,
}

/// Image analysis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Pages with a longer side are downsampled to this size before measuring
    #[serde(default = "default_analysis_max_side")]
    pub analysis_max_side: u32,

    /// Skew search covers `-max..=max` degrees
    #[serde(default = "default_max_skew_degrees")]
    pub max_skew_degrees: f64,

    #[serde(default = "default_skew_step_degrees")]
    pub skew_step_degrees: f64,

    /// Gray levels this close to 0 or 255 count as pure black or white
    #[serde(default = "default_binary_tolerance")]
    pub binary_tolerance: u8,
}

/// Thresholds of the strategy rule table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    #[serde(default = "default_binary_ratio_min")]
    pub binary_ratio_min: f64,

    #[serde(default = "default_noise_max")]
    pub noise_max: f64,

    #[serde(default = "default_skew_max_degrees")]
    pub skew_max_degrees: f64,

    #[serde(default = "default_background_variance_max")]
    pub background_variance_max: f64,

    #[serde(default = "default_contrast_min")]
    pub contrast_min: f64,

    #[serde(default = "default_low_resolution_long_side")]
    pub low_resolution_long_side: f64,

    /// Relative distance to a threshold under which a feature counts as ambiguous
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f64,

    #[serde(default = "default_max_alternates")]
    pub max_alternates: usize,
}

/// Recognition pass settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_pass_timeout_secs")]
    pub pass_timeout_secs: u64,

    /// Passes running at once across all pages (None = 2 x CPUs)
    #[serde(default)]
    pub max_concurrent_passes: Option<usize>,

    /// Executable used by the command line recognizer
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: String,

    /// One pass per engine entry and variant
    #[serde(default = "default_engines")]
    pub engines: Vec<EngineParams>,
}

/// Line scoring weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_symbol_weight")]
    pub symbol_weight: f64,

    /// Share of symbol characters tolerated before the penalty starts
    #[serde(default = "default_max_symbol_ratio")]
    pub max_symbol_ratio: f64,

    #[serde(default = "default_geometry_weight")]
    pub geometry_weight: f64,

    #[serde(default = "default_min_line_height")]
    pub min_line_height: u32,

    /// Line width over height, per character, above which a line looks stretched
    #[serde(default = "default_max_char_aspect")]
    pub max_char_aspect: f64,

    /// Same ratio below which a line looks like a vertical rule
    #[serde(default = "default_min_char_aspect")]
    pub min_char_aspect: f64,

    /// Words below this confidence count as low confidence
    #[serde(default = "default_low_conf_threshold")]
    pub low_conf_threshold: f64,

    #[serde(default = "default_low_conf_weight")]
    pub low_conf_weight: f64,

    #[serde(default = "default_structure_penalty")]
    pub structure_penalty: f64,
}

/// Cross-pass fusion policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Lines are the same line when they overlap vertically by more than this share of the
    /// smaller height
    #[serde(default = "default_overlap_fraction")]
    pub overlap_fraction: f64,

    /// Lines seen by a single pass need a score above this
    #[serde(default = "default_min_acceptance")]
    pub min_acceptance: f64,
}

/// Line table assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineBuilderConfig {
    /// Insert empty rows where the vertical gap between lines is large
    #[serde(default)]
    pub insert_blank_lines: bool,

    #[serde(default = "default_min_blank_gap")]
    pub min_blank_gap: u32,

    /// Gap threshold as a multiple of the median line height
    #[serde(default = "default_blank_gap_factor")]
    pub blank_gap_factor: f64,
}

fn default_memory_budget_mb() -> usize {
    1024
}
fn default_analysis_max_side() -> u32 {
    1600
}
/// Finest skew search step; with the 45 degree range cap this bounds the search to
/// 1801 candidate angles.
const MIN_SKEW_STEP_DEGREES: f64 = 0.05;

fn default_max_skew_degrees() -> f64 {
    5.0
}
fn default_skew_step_degrees() -> f64 {
    0.5
}
fn default_binary_tolerance() -> u8 {
    2
}
fn default_binary_ratio_min() -> f64 {
    0.85
}
fn default_noise_max() -> f64 {
    40.0
}
fn default_skew_max_degrees() -> f64 {
    1.0
}
fn default_background_variance_max() -> f64 {
    30.0
}
fn default_contrast_min() -> f64 {
    0.12
}
fn default_low_resolution_long_side() -> f64 {
    1500.0
}
fn default_ambiguity_margin() -> f64 {
    0.1
}
fn default_max_alternates() -> usize {
    3
}
fn default_engines() -> Vec<EngineParams> {
    vec![EngineParams::default()]
}
fn default_pass_timeout_secs() -> u64 {
    120
}
fn default_tesseract_path() -> String {
    "tesseract".to_string()
}
fn default_symbol_weight() -> f64 {
    0.6
}
fn default_max_symbol_ratio() -> f64 {
    0.3
}
fn default_geometry_weight() -> f64 {
    0.5
}
fn default_min_line_height() -> u32 {
    4
}
fn default_max_char_aspect() -> f64 {
    8.0
}
fn default_min_char_aspect() -> f64 {
    0.05
}
fn default_low_conf_threshold() -> f64 {
    0.4
}
fn default_low_conf_weight() -> f64 {
    0.25
}
fn default_structure_penalty() -> f64 {
    0.15
}
fn default_overlap_fraction() -> f64 {
    0.5
}
fn default_min_acceptance() -> f64 {
    0.5
}
fn default_min_blank_gap() -> u32 {
    6
}
fn default_blank_gap_factor() -> f64 {
    1.2
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            selector: SelectorConfig::default(),
            ocr: OcrConfig::default(),
            quality: QualityConfig::default(),
            fusion: FusionConfig::default(),
            lines: LineBuilderConfig::default(),
            max_concurrent_pages: None,
            memory_budget_mb: default_memory_budget_mb(),
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            analysis_max_side: default_analysis_max_side(),
            max_skew_degrees: default_max_skew_degrees(),
            skew_step_degrees: default_skew_step_degrees(),
            binary_tolerance: default_binary_tolerance(),
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            binary_ratio_min: default_binary_ratio_min(),
            noise_max: default_noise_max(),
            skew_max_degrees: default_skew_max_degrees(),
            background_variance_max: default_background_variance_max(),
            contrast_min: default_contrast_min(),
            low_resolution_long_side: default_low_resolution_long_side(),
            ambiguity_margin: default_ambiguity_margin(),
            max_alternates: default_max_alternates(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engines: default_engines(),
            pass_timeout_secs: default_pass_timeout_secs(),
            max_concurrent_passes: None,
            tesseract_path: default_tesseract_path(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            symbol_weight: default_symbol_weight(),
            max_symbol_ratio: default_max_symbol_ratio(),
            geometry_weight: default_geometry_weight(),
            min_line_height: default_min_line_height(),
            max_char_aspect: default_max_char_aspect(),
            min_char_aspect: default_min_char_aspect(),
            low_conf_threshold: default_low_conf_threshold(),
            low_conf_weight: default_low_conf_weight(),
            structure_penalty: default_structure_penalty(),
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            overlap_fraction: default_overlap_fraction(),
            min_acceptance: default_min_acceptance(),
        }
    }
}

impl Default for LineBuilderConfig {
    fn default() -> Self {
        Self {
            insert_blank_lines: false,
            min_blank_gap: default_min_blank_gap(),
            blank_gap_factor: default_blank_gap_factor(),
        }
    }
}

impl OcrConfig {
    pub fn concurrent_passes(&self) -> usize {
        self.max_concurrent_passes.unwrap_or_else(|| num_cpus::get() * 2)
    }

    pub fn pass_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pass_timeout_secs)
    }
}

impl PipelineConfig {
    pub fn concurrent_pages(&self) -> usize {
        self.max_concurrent_pages.unwrap_or_else(num_cpus::get)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        fn unit(name: &str, value: f64) -> Result<()> {
            if !(0.0..=1.0).contains(&value) {
                return Err(OcrFuseError::validation(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
            Ok(())
        }

        if self.max_concurrent_pages == Some(0) {
            return Err(OcrFuseError::validation("max_concurrent_pages must be at least 1"));
        }
        if self.ocr.max_concurrent_passes == Some(0) {
            return Err(OcrFuseError::validation("ocr.max_concurrent_passes must be at least 1"));
        }
        if self.memory_budget_mb == 0 {
            return Err(OcrFuseError::validation("memory_budget_mb must be at least 1"));
        }
        if self.ocr.engines.is_empty() {
            return Err(OcrFuseError::validation("ocr.engines must list at least one engine"));
        }
        for engine in &self.ocr.engines {
            engine.validate()?;
        }
        if self.ocr.pass_timeout_secs == 0 {
            return Err(OcrFuseError::validation("ocr.pass_timeout_secs must be at least 1"));
        }

        if self.analyzer.analysis_max_side < 64 {
            return Err(OcrFuseError::validation("analyzer.analysis_max_side must be at least 64"));
        }
        if !(self.analyzer.skew_step_degrees >= MIN_SKEW_STEP_DEGREES) {
            return Err(OcrFuseError::validation(format!(
                "analyzer.skew_step_degrees must be at least {}, got {}",
                MIN_SKEW_STEP_DEGREES, self.analyzer.skew_step_degrees
            )));
        }
        if !(self.analyzer.max_skew_degrees >= 0.0) {
            return Err(OcrFuseError::validation("analyzer.max_skew_degrees must not be negative"));
        }
        if self.analyzer.max_skew_degrees > 45.0 {
            return Err(OcrFuseError::validation("analyzer.max_skew_degrees must not exceed 45"));
        }

        unit("selector.binary_ratio_min", self.selector.binary_ratio_min)?;
        unit("selector.contrast_min", self.selector.contrast_min)?;
        unit("selector.ambiguity_margin", self.selector.ambiguity_margin)?;
        if self.selector.noise_max < 0.0
            || self.selector.skew_max_degrees < 0.0
            || self.selector.background_variance_max < 0.0
            || self.selector.low_resolution_long_side < 0.0
        {
            return Err(OcrFuseError::validation("selector thresholds must be non-negative"));
        }

        unit("quality.max_symbol_ratio", self.quality.max_symbol_ratio)?;
        unit("quality.low_conf_threshold", self.quality.low_conf_threshold)?;
        if self.quality.max_symbol_ratio >= 1.0 {
            return Err(OcrFuseError::validation("quality.max_symbol_ratio must be below 1"));
        }
        if self.quality.min_char_aspect < 0.0 || self.quality.max_char_aspect <= self.quality.min_char_aspect {
            return Err(OcrFuseError::validation(
                "quality.max_char_aspect must exceed a non-negative quality.min_char_aspect",
            ));
        }

        unit("fusion.overlap_fraction", self.fusion.overlap_fraction)?;
        unit("fusion.min_acceptance", self.fusion.min_acceptance)?;

        if self.lines.blank_gap_factor <= 0.0 {
            return Err(OcrFuseError::validation("lines.blank_gap_factor must be positive"));
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `OcrFuseError::Validation` if the file can't be read or is invalid TOML.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        toml::from_str(&content)
            .map_err(|e| OcrFuseError::validation(format!("Invalid TOML in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| OcrFuseError::validation(format!("Invalid YAML in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        serde_json::from_str(&content)
            .map_err(|e| OcrFuseError::validation(format!("Invalid JSON in {}: {}", path.as_ref().display(), e)))
    }

    /// Load a config file, choosing the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("toml") => Self::from_toml_file(path),
            Some("yaml") | Some("yml") => Self::from_yaml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(OcrFuseError::validation(format!(
                "Unsupported config file extension: {}",
                path.display()
            ))),
        }
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| OcrFuseError::serialization_with_source("Failed to encode config as TOML", e))
    }

    /// Discover a configuration file in the current directory or its parents.
    ///
    /// Looks for the names in [`CONFIG_FILE_NAMES`].
    ///
    /// # Returns
    ///
    /// - `Some(config)` if found
    /// - `None` if no config file found
    pub fn discover() -> Result<Option<Self>> {
        let current = std::env::current_dir().map_err(OcrFuseError::Io)?;
        Self::discover_from(&current)
    }

    /// Like [`PipelineConfig::discover`], starting from `start`.
    pub fn discover_from(start: &Path) -> Result<Option<Self>> {
        match find_config_file(start) {
            Some(path) => Ok(Some(Self::from_file(path)?)),
            None => Ok(None),
        }
    }
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| OcrFuseError::validation(format!("Failed to read config file {}: {}", path.display(), e)))
}

fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        current = dir.parent();
    }
    None
}
