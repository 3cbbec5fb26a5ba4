//! ocrfuse - adaptive multi-pass OCR page reconstruction
//!
//! ocrfuse turns scanned page bitmaps into structured line tables. Each page is
//! measured, cleaned up by one or more preprocessing strategies chosen from its
//! features, recognized several times, and the competing recognition results are fused
//! line by line so every row of the output comes from the pass that read it best.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ocrfuse::{PagePipeline, PipelineConfig, RawPage, PageId, TesseractCli};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> ocrfuse::Result<()> {
//! let bitmap = image::open("scan.png").map_err(ocrfuse::OcrFuseError::from)?.to_luma8();
//! let pipeline = PagePipeline::new(PipelineConfig::default(), Arc::new(TesseractCli::default()))?;
//! let report = pipeline
//!     .process_page(RawPage::from_gray(PageId::new("scan", 0), bitmap), &CancellationToken::new())
//!     .await;
//! println!("{:?}", report.status);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Image** (`image`): feature analysis, filters, strategy selection, preprocessing
//! - **OCR** (`ocr`): recognizer trait, recognition passes, quality scoring, fusion
//! - **Lines** (`lines`): line table assembly and persistence
//! - **Core** (`core`): page pipeline, memory budget, cancellation, progress, config

#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod image;
pub mod lines;
pub mod ocr;
pub mod types;

pub use error::{FilterError, OcrFuseError, PageError, RecognitionError, Result};
pub use types::{BBox, PageId, PixelFormat, RawPage};

pub use crate::core::config::PipelineConfig;
pub use crate::core::pipeline::{PageDiagnostics, PagePipeline, PageReport, PageStatus};
pub use crate::core::progress::{ChannelProgress, NoopProgress, ProgressEvent, ProgressSink, TracingProgress};

pub use crate::image::analyzer::{FeatureSummary, ImageAnalyzer};
pub use crate::image::strategy::{Strategy, StrategySelector};

pub use crate::lines::table::{LineRow, LineTable};

pub use crate::ocr::recognizer::Recognizer;
#[cfg(feature = "tesseract-cli")]
pub use crate::ocr::tesseract_cli::TesseractCli;
pub use crate::ocr::types::{EngineParams, OcrLine, OcrResult, OcrWord};
