//! Pipeline orchestration.
//!
//! This module owns the page lifecycle and the resources shared between pages:
//! - **Pipeline** (`pipeline`): drives a page through every stage and runs batches
//! - **Jobs** (`job`): per-page state and artifacts
//! - **Budget** (`budget`): memory accounting for bitmaps
//! - **Progress** (`progress`): stage events for callers
//! - **Configuration** (`config`): loading and validating stage policy
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ocrfuse::core::config::PipelineConfig;
//! use ocrfuse::core::pipeline::PagePipeline;
//! use ocrfuse::ocr::TesseractCli;
//! use ocrfuse::types::{PageId, RawPage};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(bitmap: image::GrayImage) -> ocrfuse::Result<()> {
//! let pipeline = PagePipeline::new(PipelineConfig::default(), Arc::new(TesseractCli::default()))?;
//! let page = RawPage::from_gray(PageId::new("scan", 0), bitmap);
//! let report = pipeline.process_page(page, &CancellationToken::new()).await;
//! if let Some(table) = report.line_table {
//!     println!("{}", table.text());
//! }
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod config;
pub mod job;
pub mod pipeline;
pub mod progress;

pub use budget::{MemoryBudget, PageArena, Reservation};
pub use config::{
    AnalyzerConfig, FusionConfig, LineBuilderConfig, OcrConfig, PipelineConfig, QualityConfig, SelectorConfig,
};
pub use job::PageJob;
pub use pipeline::{PageDiagnostics, PagePipeline, PageReport, PageStatus, PassFailure};
pub use progress::{ChannelProgress, NoopProgress, ProgressEvent, ProgressSink, TracingProgress};
