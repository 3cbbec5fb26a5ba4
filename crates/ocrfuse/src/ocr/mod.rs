//! Recognition passes, their quality scores and cross-pass fusion.

pub mod error;
pub mod quality;
pub mod recognizer;
pub mod selector;
#[cfg(feature = "tesseract-cli")]
pub mod tesseract_cli;
pub mod tsv;
pub mod types;
pub mod worker;

pub use error::RecognitionError;
pub use quality::{LineQuality, PassQuality, QualityScorer};
pub use recognizer::Recognizer;
pub use selector::{FusedLine, FusedPage, MultipassSelector, ScoredPass};
#[cfg(feature = "tesseract-cli")]
pub use tesseract_cli::TesseractCli;
pub use tsv::parse_tsv;
pub use types::{EngineParams, OcrLine, OcrResult, OcrWord, PSMMode};
pub use worker::{OcrPageWorker, OcrPassConfig, PassOutcome, enumerate_passes};
