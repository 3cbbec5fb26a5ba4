//! Shared fixtures for integration tests: synthetic pages and a scripted recognizer.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use image::{GrayImage, Luma};
use ocrfuse::core::config::PipelineConfig;
use ocrfuse::ocr::{EngineParams, OcrLine, OcrResult, OcrWord, RecognitionError, Recognizer};
use ocrfuse::{BBox, PageId, RawPage};

/// One line the scripted engine reports: text, top edge and word confidence.
#[derive(Debug, Clone)]
pub struct ScriptedLine {
    pub text: &'static str,
    pub top: u32,
    pub confidence: f64,
}

pub fn line(text: &'static str, top: u32, confidence: f64) -> ScriptedLine {
    ScriptedLine { text, top, confidence }
}

/// What the engine does for a given page segmentation mode.
#[derive(Debug, Clone)]
pub enum Script {
    Lines(Vec<ScriptedLine>),
    Fail(&'static str),
    /// Sleep, then report the lines
    Slow(Duration, Vec<ScriptedLine>),
}

/// Recognizer answering by `psm`, counting calls and concurrent passes.
pub struct ScriptedRecognizer {
    scripts: HashMap<u8, Script>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn on_psm(mut self, psm: u8, script: Script) -> Self {
        self.scripts.insert(psm, script);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn recognize(&self, _image: &GrayImage, params: &EngineParams) -> Result<OcrResult, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        match self.scripts.get(&params.psm) {
            Some(Script::Lines(lines)) => Ok(build_result(lines)),
            Some(Script::Fail(reason)) => Err(RecognitionError::EngineFailed(reason.to_string())),
            Some(Script::Slow(delay, lines)) => {
                tokio::time::sleep(*delay).await;
                Ok(build_result(lines))
            }
            None => Err(RecognitionError::EngineFailed(format!("no script for psm {}", params.psm))),
        }
    }
}

/// Lay words out left to right, 20 px per character and 20 px high.
pub fn build_result(lines: &[ScriptedLine]) -> OcrResult {
    let lines = lines
        .iter()
        .enumerate()
        .map(|(i, l)| {
            let mut left = 50;
            let words = l
                .text
                .split(' ')
                .map(|w| {
                    let width = 20 * w.chars().count() as u32;
                    let word = OcrWord::new(w, BBox::from_ltwh(left, l.top, width, 20), l.confidence);
                    left += width + 10;
                    word
                })
                .collect();
            OcrLine::from_words(words).with_numbers(1, 1, i as u32 + 1)
        })
        .collect();
    OcrResult::new(lines)
}

/// White page with solid black text bars. Every pixel is pure black or white.
pub fn binary_page(document: &str, index: usize, width: u32, height: u32) -> RawPage {
    let mut page = GrayImage::from_pixel(width, height, Luma([255]));
    let mut top = 40;
    while top + 14 < height.saturating_sub(40) {
        for y in top..top + 14 {
            for x in 60..width.saturating_sub(60) {
                page.put_pixel(x, y, Luma([0]));
            }
        }
        top += 45;
    }
    RawPage::from_gray(PageId::new(document, index), page)
}

/// Faded gray page with grain, far from binary.
pub fn degraded_page(document: &str, index: usize) -> RawPage {
    let (width, height) = (800u32, 600u32);
    let mut state: u32 = 0x2545_f491;
    let mut page = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let ink = (y % 45) < 14 && (60..740).contains(&x);
            let base: i32 = if ink { 118 } else { 150 };
            let grain = (state % 21) as i32 - 10;
            page.put_pixel(x, y, Luma([(base + grain).clamp(0, 255) as u8]));
        }
    }
    RawPage::from_gray(PageId::new(document, index), page)
}

/// Defaults with one strategy per page and the given page segmentation modes.
pub fn config_with_psms(psms: &[u8]) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.selector.max_alternates = 0;
    config.ocr.engines = psms.iter().map(|&psm| EngineParams::default().with_psm(psm)).collect();
    config.ocr.pass_timeout_secs = 10;
    config
}

pub fn three_lines() -> Vec<ScriptedLine> {
    vec![
        line("Quarterly report", 40, 0.93),
        line("Revenue grew strongly", 85, 0.9),
        line("Costs were stable", 130, 0.88),
    ]
}
