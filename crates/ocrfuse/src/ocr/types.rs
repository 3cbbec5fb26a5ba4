use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::lines::text::join_words;
use crate::types::BBox;
use crate::{OcrFuseError, Result};

/// Page segmentation modes understood by Tesseract-compatible engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PSMMode {
    OsdOnly = 0,
    AutoOsd = 1,
    AutoOnly = 2,
    Auto = 3,
    SingleColumn = 4,
    SingleBlockVertical = 5,
    SingleBlock = 6,
    SingleLine = 7,
    SingleWord = 8,
    CircleWord = 9,
    SingleChar = 10,
    SparseText = 11,
    SparseTextOsd = 12,
    RawLine = 13,
}

impl PSMMode {
    pub fn from_u8(value: u8) -> std::result::Result<Self, String> {
        match value {
            0 => Ok(PSMMode::OsdOnly),
            1 => Ok(PSMMode::AutoOsd),
            2 => Ok(PSMMode::AutoOnly),
            3 => Ok(PSMMode::Auto),
            4 => Ok(PSMMode::SingleColumn),
            5 => Ok(PSMMode::SingleBlockVertical),
            6 => Ok(PSMMode::SingleBlock),
            7 => Ok(PSMMode::SingleLine),
            8 => Ok(PSMMode::SingleWord),
            9 => Ok(PSMMode::CircleWord),
            10 => Ok(PSMMode::SingleChar),
            11 => Ok(PSMMode::SparseText),
            12 => Ok(PSMMode::SparseTextOsd),
            13 => Ok(PSMMode::RawLine),
            _ => Err(format!("Invalid PSM mode value: {}", value)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Engine settings of one recognition pass.
///
/// Only `language`, `psm`, `oem` and `dpi` are interpreted by the pipeline; `variables`
/// are forwarded to the engine untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_psm")]
    pub psm: u8,

    #[serde(default = "default_oem")]
    pub oem: u8,

    /// Resolution hint. When unset the analyzer's suggestion is used.
    #[serde(default)]
    pub dpi: Option<u32>,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

fn default_language() -> String {
    "eng".to_string()
}
fn default_psm() -> u8 {
    3
}
fn default_oem() -> u8 {
    3
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            language: default_language(),
            psm: default_psm(),
            oem: default_oem(),
            dpi: None,
            variables: BTreeMap::new(),
        }
    }
}

impl EngineParams {
    pub fn with_psm(mut self, psm: u8) -> Self {
        self.psm = psm;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn psm_mode(&self) -> std::result::Result<PSMMode, String> {
        PSMMode::from_u8(self.psm)
    }

    pub fn validate(&self) -> Result<()> {
        self.psm_mode().map_err(OcrFuseError::validation)?;
        if self.oem > 3 {
            return Err(OcrFuseError::validation(format!("Invalid OEM value: {}", self.oem)));
        }
        let valid_component =
            |c: &str| !c.is_empty() && c.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        if !self.language.split('+').all(valid_component) {
            return Err(OcrFuseError::validation(format!(
                "Invalid language code: '{}'",
                self.language
            )));
        }
        if self.dpi == Some(0) {
            return Err(OcrFuseError::validation("dpi hint must be positive"));
        }
        Ok(())
    }
}

/// One recognized word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub bbox: BBox,
    /// In `[0, 1]`
    pub confidence: f64,
}

impl OcrWord {
    pub fn new(text: impl Into<String>, bbox: BBox, confidence: f64) -> Self {
        Self {
            text: text.into(),
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().filter(|c| !c.is_whitespace()).count()
    }
}

/// One recognized line with its words in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub words: Vec<OcrWord>,
    pub bbox: BBox,
    #[serde(default)]
    pub block_num: u32,
    #[serde(default)]
    pub par_num: u32,
    #[serde(default)]
    pub line_num: u32,
}

impl OcrLine {
    /// Build a line whose box is the union of its word boxes.
    pub fn from_words(words: Vec<OcrWord>) -> Self {
        let bbox = words
            .iter()
            .map(|w| w.bbox)
            .reduce(|a, b| a.union(&b))
            .unwrap_or_default();
        Self {
            words,
            bbox,
            block_num: 0,
            par_num: 0,
            line_num: 0,
        }
    }

    pub fn with_numbers(mut self, block_num: u32, par_num: u32, line_num: u32) -> Self {
        self.block_num = block_num;
        self.par_num = par_num;
        self.line_num = line_num;
        self
    }

    pub fn text(&self) -> String {
        join_words(self.words.iter().map(|w| w.text.as_str()))
    }

    pub fn char_count(&self) -> usize {
        self.words.iter().map(OcrWord::char_count).sum()
    }

    /// Unweighted mean of word confidences; 0 for a line without words.
    pub fn mean_confidence(&self) -> f64 {
        if self.words.is_empty() {
            return 0.0;
        }
        self.words.iter().map(|w| w.confidence).sum::<f64>() / self.words.len() as f64
    }
}

/// Structured output of one recognition pass. Immutable once built.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OcrResult {
    lines: Vec<OcrLine>,
}

impl OcrResult {
    /// Lines without any non-empty word are dropped.
    pub fn new(lines: Vec<OcrLine>) -> Self {
        let lines = lines
            .into_iter()
            .filter(|line| line.words.iter().any(|w| !w.text.trim().is_empty()))
            .collect();
        Self { lines }
    }

    pub fn lines(&self) -> &[OcrLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn word_count(&self) -> usize {
        self.lines.iter().map(|l| l.words.len()).sum()
    }

    pub fn text(&self) -> String {
        self.lines.iter().map(OcrLine::text).collect::<Vec<_>>().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_psm_mode_from_u8() {
        assert_eq!(PSMMode::from_u8(6).unwrap(), PSMMode::SingleBlock);
        assert_eq!(PSMMode::RawLine.as_u8(), 13);
        assert!(PSMMode::from_u8(14).is_err());
    }

    #[test]
    fn test_engine_params_validate() {
        assert!(EngineParams::default().validate().is_ok());
        assert!(EngineParams::default().with_language("eng+deu").validate().is_ok());
        assert!(EngineParams::default().with_language("eng+").validate().is_err());
        assert!(EngineParams::default().with_language("../etc").validate().is_err());
        assert!(EngineParams::default().with_psm(20).validate().is_err());
    }

    #[test]
    fn test_line_from_words() {
        let line = OcrLine::from_words(vec![
            OcrWord::new("Hello", BBox::new(10, 10, 50, 30), 0.9),
            OcrWord::new("world", BBox::new(60, 12, 100, 32), 0.7),
        ]);
        assert_eq!(line.bbox, BBox::new(10, 10, 100, 32));
        assert_eq!(line.text(), "Hello world");
        assert_eq!(line.char_count(), 10);
        assert!((line.mean_confidence() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(OcrWord::new("x", BBox::default(), 1.7).confidence, 1.0);
        assert_eq!(OcrWord::new("x", BBox::default(), -0.2).confidence, 0.0);
    }

    #[test]
    fn test_result_drops_empty_lines() {
        let result = OcrResult::new(vec![
            OcrLine::from_words(vec![OcrWord::new("  ", BBox::new(0, 0, 5, 5), 0.5)]),
            OcrLine::from_words(vec![OcrWord::new("kept", BBox::new(0, 10, 40, 20), 0.5)]),
        ]);
        assert_eq!(result.lines().len(), 1);
        assert_eq!(result.text(), "kept");
    }
}
