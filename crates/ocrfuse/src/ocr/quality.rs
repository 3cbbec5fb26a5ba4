//! Quality scoring of a single recognition pass.
//!
//! Scores depend only on the pass being scored, never on its siblings, so the same
//! `OcrResult` always gets the same `PassQuality`.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::core::config::QualityConfig;
use crate::ocr::types::{OcrLine, OcrResult};

/// Punctuation that is normal in running text and neither helps nor hurts a line.
const TEXT_PUNCTUATION: &[char] = &[
    '.', ',', ';', ':', '!', '?', '\'', '"', '(', ')', '[', ']', '-', '–', '—', '/', '&', '%', '«', '»', '…', '’',
    '‘', '“', '”',
];

/// Structural red flags, measured over word, line, paragraph and block counts.
const WORDS_FOR_FEW_PARAGRAPHS: usize = 150;
const FEW_PARAGRAPHS: usize = 3;
const MANY_BLOCKS: usize = 8;
const LINES_FOR_MANY_BLOCKS: usize = 40;
const WORDS_FOR_FEW_LINES: usize = 120;
const FEW_LINES: usize = 12;

/// Score of one recognized line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineQuality {
    /// Final score in `[0, 1]`
    pub score: f64,
    /// Word confidence weighted by word length
    pub confidence: f64,
    pub symbol_penalty: f64,
    pub geometry_penalty: f64,
    pub char_count: usize,
}

/// Scores of a whole pass. `lines[i]` belongs to `result.lines()[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassQuality {
    pub lines: Vec<LineQuality>,
    /// Page score in `[0, 1]`
    pub aggregate: f64,
    pub mean_confidence: f64,
    pub low_conf_ratio: f64,
    pub words: usize,
    pub line_count: usize,
    pub paragraphs: usize,
    pub blocks: usize,
    pub bad_structure: bool,
}

/// Scores recognition output from confidence, character mix and line geometry.
#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    config: QualityConfig,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn score_line(&self, line: &OcrLine) -> LineQuality {
        let (weighted, weight) = line.words.iter().fold((0.0, 0.0), |(acc, total), word| {
            let w = word.char_count().max(1) as f64;
            (acc + word.confidence * w, total + w)
        });
        let confidence = if weight > 0.0 { weighted / weight } else { 0.0 };

        let (symbols, visible) = line
            .words
            .iter()
            .flat_map(|w| w.text.chars())
            .filter(|c| !c.is_whitespace())
            .fold((0usize, 0usize), |(symbols, visible), c| {
                let symbol = !c.is_alphanumeric() && !TEXT_PUNCTUATION.contains(&c);
                (symbols + usize::from(symbol), visible + 1)
            });
        let symbol_ratio = if visible > 0 { symbols as f64 / visible as f64 } else { 1.0 };
        let excess = (symbol_ratio - self.config.max_symbol_ratio).max(0.0);
        let symbol_penalty = self.config.symbol_weight * excess / (1.0 - self.config.max_symbol_ratio);

        let geometry_penalty = if self.implausible_geometry(line, visible) {
            self.config.geometry_weight
        } else {
            0.0
        };

        LineQuality {
            score: (confidence - symbol_penalty - geometry_penalty).clamp(0.0, 1.0),
            confidence,
            symbol_penalty,
            geometry_penalty,
            char_count: visible,
        }
    }

    fn implausible_geometry(&self, line: &OcrLine, chars: usize) -> bool {
        let (width, height) = (line.bbox.width(), line.bbox.height());
        if width == 0 || height < self.config.min_line_height {
            return true;
        }
        let per_char = width as f64 / height as f64 / chars.max(1) as f64;
        per_char > self.config.max_char_aspect || per_char < self.config.min_char_aspect
    }

    pub fn score(&self, result: &OcrResult) -> PassQuality {
        let lines: Vec<LineQuality> = result.lines().iter().map(|l| self.score_line(l)).collect();

        let mut blocks = AHashSet::new();
        let mut paragraphs = AHashSet::new();
        let mut words = 0usize;
        let mut low_conf = 0usize;
        let mut conf_sum = 0.0;
        for line in result.lines() {
            blocks.insert(line.block_num);
            paragraphs.insert((line.block_num, line.par_num));
            for word in &line.words {
                words += 1;
                conf_sum += word.confidence;
                if word.confidence < self.config.low_conf_threshold {
                    low_conf += 1;
                }
            }
        }

        let line_count = lines.len();
        let (blocks, paragraphs) = (blocks.len(), paragraphs.len());
        let bad_structure = (words > WORDS_FOR_FEW_PARAGRAPHS && paragraphs <= FEW_PARAGRAPHS)
            || (blocks >= MANY_BLOCKS && line_count <= LINES_FOR_MANY_BLOCKS)
            || (words > WORDS_FOR_FEW_LINES && line_count < FEW_LINES);

        let mean_confidence = if words > 0 { conf_sum / words as f64 } else { 0.0 };
        let low_conf_ratio = if words > 0 { low_conf as f64 / words as f64 } else { 0.0 };

        let total_chars: usize = lines.iter().map(|l| l.char_count.max(1)).sum();
        let weighted_mean = if lines.is_empty() {
            0.0
        } else {
            lines.iter().map(|l| l.score * l.char_count.max(1) as f64).sum::<f64>() / total_chars as f64
        };
        let structure = if bad_structure { self.config.structure_penalty } else { 0.0 };
        let aggregate = (weighted_mean - self.config.low_conf_weight * low_conf_ratio - structure).clamp(0.0, 1.0);

        PassQuality {
            lines,
            aggregate,
            mean_confidence,
            low_conf_ratio,
            words,
            line_count,
            paragraphs,
            blocks,
            bad_structure,
        }
    }
}
