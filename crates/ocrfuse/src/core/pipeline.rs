//! Page reconstruction pipeline.
//!
//! `PagePipeline` drives one page through analysis, strategy selection, preprocessing,
//! recognition, scoring, fusion and line table assembly. Batches run pages
//! concurrently, bounded by `max_concurrent_pages`, while recognition passes of all
//! pages share one pass semaphore and bitmaps share one memory budget.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::budget::MemoryBudget;
use crate::core::config::PipelineConfig;
use crate::core::job::PageJob;
use crate::core::progress::{NoopProgress, ProgressEvent, ProgressSink};
use crate::error::{PageError, Result};
use crate::image::analyzer::{FeatureSummary, ImageAnalyzer};
use crate::image::filters::FilterRegistry;
use crate::image::preprocess::{PreprocessPipeline, VariantFailure};
use crate::image::strategy::StrategySelector;
use crate::lines::builder::LineTextBuilder;
use crate::lines::table::LineTable;
use crate::ocr::error::RecognitionError;
use crate::ocr::quality::QualityScorer;
use crate::ocr::recognizer::Recognizer;
use crate::ocr::selector::{MultipassSelector, ScoredPass};
use crate::ocr::worker::{OcrPageWorker, enumerate_passes};
use crate::types::{PageId, RawPage};

/// Final state of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum PageStatus {
    Completed,
    /// Recognition ran but no line was good enough; the table is empty.
    LowConfidencePage,
    Failed(PageError),
    Cancelled,
}

impl PageStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::LowConfidencePage => "low_confidence_page",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// A recognition pass that produced no result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassFailure {
    pub pass: String,
    pub error: RecognitionError,
}

/// What happened inside a page, successful or not.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageDiagnostics {
    pub features: Option<FeatureSummary>,
    pub strategies: Vec<String>,
    pub variant_failures: Vec<VariantFailure>,
    pub passes_run: usize,
    pub pass_failures: Vec<PassFailure>,
    pub fused_clusters: usize,
    pub rejected_singletons: usize,
    pub reserved_kib: u64,
    pub elapsed_ms: u64,
}

/// Result handed back for every submitted page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageReport {
    pub page: PageId,
    pub status: PageStatus,
    /// Present for `Completed` and `LowConfidencePage`
    pub line_table: Option<LineTable>,
    pub diagnostics: PageDiagnostics,
}

impl PageReport {
    fn terminal(page: PageId, status: PageStatus) -> Self {
        Self {
            page,
            status,
            line_table: None,
            diagnostics: PageDiagnostics::default(),
        }
    }
}

enum StageExit {
    Failed(PageError),
    Cancelled,
}

impl From<PageError> for StageExit {
    fn from(e: PageError) -> Self {
        StageExit::Failed(e)
    }
}

/// Hand the built table to the job, which accepts exactly one per page.
fn store_table(job: &mut PageJob, table: LineTable) -> std::result::Result<(), StageExit> {
    job.store_line_table(table).map_err(|e| {
        warn!(page = %job.id(), error = %e, "Rejected second line table");
        StageExit::Failed(e)
    })
}

#[derive(Clone)]
pub struct PagePipeline {
    config: Arc<PipelineConfig>,
    analyzer: ImageAnalyzer,
    selector: StrategySelector,
    preprocess: PreprocessPipeline,
    worker: OcrPageWorker,
    scorer: QualityScorer,
    fusion: MultipassSelector,
    builder: LineTextBuilder,
    budget: MemoryBudget,
    progress: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for PagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagePipeline")
            .field("worker", &self.worker)
            .field("budget_kib", &self.budget.total_kib())
            .finish_non_exhaustive()
    }
}

impl PagePipeline {
    /// Build a pipeline from a validated configuration.
    pub fn new(config: PipelineConfig, recognizer: Arc<dyn Recognizer>) -> Result<Self> {
        config.validate()?;
        let pass_slots = Arc::new(Semaphore::new(config.ocr.concurrent_passes()));
        let worker = OcrPageWorker::new(recognizer, pass_slots, config.ocr.pass_timeout());

        Ok(Self {
            analyzer: ImageAnalyzer::new(config.analyzer.clone()),
            selector: StrategySelector::new(config.selector.clone()),
            preprocess: PreprocessPipeline::new(Arc::new(FilterRegistry::default())),
            worker,
            scorer: QualityScorer::new(config.quality.clone()),
            fusion: MultipassSelector::new(config.fusion.clone()),
            builder: LineTextBuilder::new(config.lines.clone()),
            budget: MemoryBudget::from_megabytes(config.memory_budget_mb),
            progress: Arc::new(NoopProgress),
            config: Arc::new(config),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Replace the filter registry used by preprocessing chains.
    pub fn with_registry(mut self, registry: Arc<FilterRegistry>) -> Self {
        self.preprocess = PreprocessPipeline::new(registry);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    /// Process one page. Never fails as a whole: errors are reported in the status.
    pub async fn process_page(&self, page: RawPage, cancel: &CancellationToken) -> PageReport {
        let span = info_span!("page", page = %page.id, recognizer = self.worker.recognizer_name());
        self.process_page_inner(page, cancel).instrument(span).await
    }

    async fn process_page_inner(&self, page: RawPage, cancel: &CancellationToken) -> PageReport {
        let started = Instant::now();
        let id = page.id.clone();
        self.progress.emit(ProgressEvent::PageStarted { page: id.clone() });

        let mut job = PageJob::new(id.clone(), self.budget.clone());
        let mut diagnostics = PageDiagnostics::default();

        let (status, line_table) = match self.run_stages(page, &mut job, &mut diagnostics, cancel).await {
            Ok(status) => (status, job.take_line_table()),
            Err(StageExit::Failed(e)) => {
                warn!(error = %e, "Page failed");
                (PageStatus::Failed(e), None)
            }
            Err(StageExit::Cancelled) => {
                debug!("Page cancelled");
                (PageStatus::Cancelled, None)
            }
        };

        diagnostics.elapsed_ms = started.elapsed().as_millis() as u64;
        drop(job);

        self.progress.emit(ProgressEvent::PageFinished {
            page: id.clone(),
            status: status.label().to_string(),
        });
        PageReport {
            page: id,
            status,
            line_table,
            diagnostics,
        }
    }

    async fn run_stages(
        &self,
        page: RawPage,
        job: &mut PageJob,
        diagnostics: &mut PageDiagnostics,
        cancel: &CancellationToken,
    ) -> std::result::Result<PageStatus, StageExit> {
        let checkpoint = || {
            if cancel.is_cancelled() {
                Err(StageExit::Cancelled)
            } else {
                Ok(())
            }
        };
        checkpoint()?;

        let page_index = page.id.page_index;
        let raw = Arc::new(page.to_gray()?);
        drop(page);
        job.set_raw(Arc::clone(&raw));

        let analyzer = self.analyzer.clone();
        let source = Arc::clone(&raw);
        let features = tokio::task::spawn_blocking(move || analyzer.analyze(&source))
            .await
            .map_err(|e| PageError::Crashed(format!("image analysis: {}", e)))??;
        debug!(
            contrast = features.contrast,
            noise = features.noise,
            skew = features.skew_degrees,
            binary_ratio = features.binary_ratio,
            "Page analyzed"
        );
        let suggested_dpi = features.suggested_dpi;
        job.set_features(features);
        diagnostics.features = job.features().cloned();
        checkpoint()?;

        let strategies = match job.features() {
            Some(features) => self.selector.select(features),
            None => return Err(PageError::BuildIncomplete { stage: "analysis".to_string() }.into()),
        };
        job.set_strategies(strategies);
        diagnostics.strategies = job.strategies().iter().map(|s| s.name.clone()).collect();
        self.progress.emit(ProgressEvent::StrategySelected {
            page: job.id().clone(),
            strategies: diagnostics.strategies.clone(),
        });

        let bitmap_bytes = raw.as_raw().len();
        let mut footprint = vec![("raw".to_string(), bitmap_bytes)];
        footprint.extend(
            job.strategies()
                .iter()
                .filter(|s| !s.is_identity())
                .map(|s| (format!("variant:{}", s.name), bitmap_bytes)),
        );
        let items: Vec<(&str, usize)> = footprint.iter().map(|(l, b)| (l.as_str(), *b)).collect();
        job.arena()
            .reserve(&items, cancel)
            .await
            .map_err(|_| StageExit::Cancelled)?;
        diagnostics.reserved_kib = job.arena().reserved_kib();
        checkpoint()?;

        let output = self.preprocess.run(Arc::clone(&raw), job.strategies().to_vec()).await;
        diagnostics.variant_failures = output.failures;
        if output.variants.is_empty() {
            return Err(PageError::NoUsableVariant {
                failed: diagnostics.variant_failures.len(),
            }
            .into());
        }
        job.set_variants(output.variants);
        checkpoint()?;

        let passes = enumerate_passes(job.variants(), &self.config.ocr.engines, Some(suggested_dpi));
        diagnostics.passes_run = passes.len();
        let outcomes = self.worker.run_passes(job.variants(), passes, cancel).await;
        job.set_outcomes(outcomes);
        checkpoint()?;

        let mut scored = Vec::with_capacity(job.outcomes().len());
        for outcome in job.outcomes() {
            match &outcome.result {
                Ok(result) => scored.push(ScoredPass {
                    index: outcome.config.index,
                    name: outcome.config.name.clone(),
                    strategy: outcome.config.strategy.clone(),
                    quality: self.scorer.score(result),
                    result: result.clone(),
                }),
                Err(e) => diagnostics.pass_failures.push(PassFailure {
                    pass: outcome.config.name.clone(),
                    error: e.clone(),
                }),
            }
        }
        self.progress.emit(ProgressEvent::PassesCompleted {
            page: job.id().clone(),
            succeeded: scored.len(),
            failed: diagnostics.pass_failures.len(),
        });
        if scored.is_empty() {
            return Err(PageError::NoUsableOcrResult {
                failed: diagnostics.pass_failures.len(),
            }
            .into());
        }

        let fused = self.fusion.fuse(&scored);
        diagnostics.fused_clusters = fused.clusters;
        diagnostics.rejected_singletons = fused.rejected_singletons;
        self.progress.emit(ProgressEvent::FusionDone {
            page: job.id().clone(),
            lines: fused.lines.len(),
        });
        let low_confidence = fused.lines.is_empty();
        job.set_fused(fused);

        let table = self.builder.build(page_index, job.fused())?;
        job.release_bitmaps();
        store_table(job, table)?;

        let status = if low_confidence {
            PageStatus::LowConfidencePage
        } else {
            PageStatus::Completed
        };
        info!(status = status.label(), passes = scored.len(), "Page reconstructed");
        Ok(status)
    }

    /// Process pages concurrently. Reports come back in submission order.
    ///
    /// Each page runs under a child of `cancel`; cancelling it stops every page that
    /// has not finished.
    pub async fn process_batch(&self, pages: Vec<RawPage>, cancel: &CancellationToken) -> Vec<PageReport> {
        if pages.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrent_pages()));
        let ids: Vec<PageId> = pages.iter().map(|p| p.id.clone()).collect();
        info!(pages = pages.len(), "Processing batch");

        let mut tasks = JoinSet::new();
        for (index, page) in pages.into_iter().enumerate() {
            let pipeline = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let token = cancel.child_token();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let report = match permit {
                    Some(_permit) => pipeline.process_page(page, &token).await,
                    None => PageReport::terminal(page.id, PageStatus::Cancelled),
                };
                (index, report)
            });
        }

        let mut reports: Vec<Option<PageReport>> = vec![None; ids.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => reports[index] = Some(report),
                Err(join_err) => warn!(error = %join_err, "Page task panicked"),
            }
        }

        reports
            .into_iter()
            .zip(ids)
            .map(|(report, id)| {
                report.unwrap_or_else(|| {
                    PageReport::terminal(id, PageStatus::Failed(PageError::Crashed("page task panicked".to_string())))
                })
            })
            .collect()
    }
}
