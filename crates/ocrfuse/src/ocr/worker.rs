//! Runs the recognition passes of one page.
//!
//! A pass is one (variant × engine parameters) pair. Passes run concurrently, each
//! holding a slot of the pass semaphore shared by every page of the pipeline. A pass
//! that fails, times out, panics or is cancelled only records its error.
//!
//! On timeout or cancellation the engine task is aborted and the pass slot is released
//! right away. Recognizers therefore have to be cancel-safe: dropping the `recognize`
//! future must stop the work it started. `TesseractCli` relies on `kill_on_drop` for
//! this; an engine that blocks inside a synchronous call keeps running unaccounted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

use crate::image::preprocess::Variant;
use crate::ocr::error::RecognitionError;
use crate::ocr::recognizer::Recognizer;
use crate::ocr::types::{EngineParams, OcrResult};

/// Everything needed to run one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPassConfig {
    /// Position in the page's pass enumeration
    pub index: usize,
    pub name: String,
    pub variant_index: usize,
    pub strategy: String,
    pub params: EngineParams,
}

/// Result of one pass, successful or not.
#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub config: OcrPassConfig,
    pub result: Result<OcrResult, RecognitionError>,
    pub elapsed: Duration,
}

impl PassOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Enumerate the passes for a page: every variant with every engine configuration.
///
/// Engines without a DPI hint get `suggested_dpi`.
pub fn enumerate_passes(variants: &[Variant], engines: &[EngineParams], suggested_dpi: Option<u32>) -> Vec<OcrPassConfig> {
    let single_language = engines.windows(2).all(|w| w[0].language == w[1].language);

    let mut passes = Vec::with_capacity(variants.len() * engines.len());
    for variant in variants {
        for engine in engines {
            let strategy = variant.strategy.name.clone();
            let name = if single_language {
                format!("{}/psm{}", strategy, engine.psm)
            } else {
                format!("{}/{}/psm{}", strategy, engine.language, engine.psm)
            };
            let mut params = engine.clone();
            if params.dpi.is_none() {
                params.dpi = suggested_dpi;
            }
            passes.push(OcrPassConfig {
                index: passes.len(),
                name,
                variant_index: variant.index,
                strategy,
                params,
            });
        }
    }
    passes
}

/// Executes passes against a [`Recognizer`].
#[derive(Clone)]
pub struct OcrPageWorker {
    recognizer: Arc<dyn Recognizer>,
    pass_slots: Arc<Semaphore>,
    pass_timeout: Duration,
}

impl std::fmt::Debug for OcrPageWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrPageWorker")
            .field("recognizer", &self.recognizer.name())
            .field("available_slots", &self.pass_slots.available_permits())
            .field("pass_timeout", &self.pass_timeout)
            .finish()
    }
}

impl OcrPageWorker {
    pub fn new(recognizer: Arc<dyn Recognizer>, pass_slots: Arc<Semaphore>, pass_timeout: Duration) -> Self {
        Self {
            recognizer,
            pass_slots,
            pass_timeout,
        }
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    /// Run every pass and return the outcomes ordered by pass index.
    ///
    /// Returns only after all passes finished. Outcomes that complete after `cancel`
    /// fired are reported as [`RecognitionError::Cancelled`].
    pub async fn run_passes(
        &self,
        variants: &[Variant],
        passes: Vec<OcrPassConfig>,
        cancel: &CancellationToken,
    ) -> Vec<PassOutcome> {
        let mut tasks = JoinSet::new();
        let total = passes.len();

        for config in passes {
            let Some(variant) = variants.iter().find(|v| v.index == config.variant_index) else {
                warn!(pass = %config.name, "Pass refers to a missing variant");
                continue;
            };
            let image = Arc::clone(&variant.image);
            let recognizer = Arc::clone(&self.recognizer);
            let slots = Arc::clone(&self.pass_slots);
            let cancel = cancel.clone();
            let pass_timeout = self.pass_timeout;

            tasks.spawn(async move {
                let started = Instant::now();
                let result = run_pass(recognizer, image, &config, slots, pass_timeout, &cancel).await;
                PassOutcome {
                    config,
                    result,
                    elapsed: started.elapsed(),
                }
            }
            .in_current_span());
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    match &outcome.result {
                        Ok(result) => debug!(
                            pass = %outcome.config.name,
                            lines = result.lines().len(),
                            elapsed_ms = outcome.elapsed.as_millis() as u64,
                            "Recognition pass finished"
                        ),
                        Err(e) => warn!(pass = %outcome.config.name, error = %e, "Recognition pass failed"),
                    }
                    outcomes.push(outcome);
                }
                // run_pass never panics itself; the engine call runs in its own task
                Err(join_err) => warn!(error = %join_err, "Recognition task aborted"),
            }
        }
        outcomes.sort_by_key(|o| o.config.index);
        outcomes
    }
}

#[tracing::instrument(skip_all, fields(pass = %config.name, psm = config.params.psm))]
async fn run_pass(
    recognizer: Arc<dyn Recognizer>,
    image: Arc<image::GrayImage>,
    config: &OcrPassConfig,
    slots: Arc<Semaphore>,
    pass_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<OcrResult, RecognitionError> {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(RecognitionError::Cancelled),
        permit = slots.acquire_owned() => permit
            .map_err(|_| RecognitionError::Unavailable("pass pool is closed".to_string()))?,
    };

    let params = config.params.clone();
    let mut engine = tokio::spawn(async move { recognizer.recognize(&image, &params).await });

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            engine.abort();
            Err(RecognitionError::Cancelled)
        }
        finished = tokio::time::timeout(pass_timeout, &mut engine) => match finished {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => Err(RecognitionError::Crashed(panic_message(join_err))),
            Ok(Err(join_err)) => Err(RecognitionError::Crashed(join_err.to_string())),
            Err(_) => {
                engine.abort();
                Err(RecognitionError::Timeout(pass_timeout))
            }
        },
    };

    if cancel.is_cancelled() {
        return Err(RecognitionError::Cancelled);
    }
    result
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    let payload = join_err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "engine panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::strategy::{Strategy, StrategyOrigin};
    use crate::ocr::types::OcrWord;
    use crate::types::BBox;
    use async_trait::async_trait;
    use image::{GrayImage, Luma};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedRecognizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Recognizer for ScriptedRecognizer {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn recognize(&self, _image: &GrayImage, params: &EngineParams) -> Result<OcrResult, RecognitionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match params.psm {
                4 => Err(RecognitionError::EngineFailed("bad layout".to_string())),
                5 => panic!("engine exploded"),
                7 => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(OcrResult::default())
                }
                _ => Ok(OcrResult::new(vec![crate::ocr::types::OcrLine::from_words(vec![
                    OcrWord::new("ok", BBox::new(0, 0, 20, 10), 0.9),
                ])])),
            }
        }
    }

    fn variant(index: usize, name: &str) -> Variant {
        Variant {
            index,
            strategy: Strategy {
                name: name.to_string(),
                origin: StrategyOrigin::Primary,
                steps: Vec::new(),
            },
            image: Arc::new(GrayImage::from_pixel(16, 16, Luma([255]))),
        }
    }

    fn worker(recognizer: Arc<ScriptedRecognizer>, timeout: Duration) -> OcrPageWorker {
        OcrPageWorker::new(recognizer, Arc::new(Semaphore::new(4)), timeout)
    }

    #[test]
    fn test_enumerate_passes_names_and_dpi() {
        let variants = vec![variant(0, "clean_scan"), variant(1, "low_contrast")];
        let engines = vec![EngineParams::default(), EngineParams::default().with_psm(6)];
        let passes = enumerate_passes(&variants, &engines, Some(300));
        let names: Vec<&str> = passes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["clean_scan/psm3", "clean_scan/psm6", "low_contrast/psm3", "low_contrast/psm6"]
        );
        assert!(passes.iter().all(|p| p.params.dpi == Some(300)));
        assert_eq!(passes[3].index, 3);
        assert_eq!(passes[3].variant_index, 1);
    }

    #[test]
    fn test_enumerate_passes_with_languages() {
        let engines = vec![EngineParams::default(), EngineParams::default().with_language("deu")];
        let passes = enumerate_passes(&[variant(0, "binary")], &engines, None);
        assert_eq!(passes[1].name, "binary/deu/psm3");
        assert_eq!(passes[1].params.dpi, None);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_siblings() {
        let recognizer = Arc::new(ScriptedRecognizer {
            calls: AtomicUsize::new(0),
        });
        let variants = vec![variant(0, "clean_scan")];
        let engines: Vec<EngineParams> = [3, 4, 5].iter().map(|p| EngineParams::default().with_psm(*p)).collect();
        let passes = enumerate_passes(&variants, &engines, None);

        let outcomes = worker(Arc::clone(&recognizer), Duration::from_secs(5))
            .run_passes(&variants, passes, &CancellationToken::new())
            .await;

        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_success());
        assert!(matches!(outcomes[1].result, Err(RecognitionError::EngineFailed(_))));
        match &outcomes[2].result {
            Err(RecognitionError::Crashed(msg)) => assert!(msg.contains("engine exploded")),
            other => panic!("expected crash, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_timeout() {
        let recognizer = Arc::new(ScriptedRecognizer {
            calls: AtomicUsize::new(0),
        });
        let variants = vec![variant(0, "clean_scan")];
        let passes = enumerate_passes(&variants, &[EngineParams::default().with_psm(7)], None);

        let outcomes = worker(recognizer, Duration::from_secs(2))
            .run_passes(&variants, passes, &CancellationToken::new())
            .await;
        assert_eq!(outcomes[0].result, Err(RecognitionError::Timeout(Duration::from_secs(2))));
    }

    struct Hanging {
        dropped: Arc<std::sync::atomic::AtomicBool>,
    }

    struct SetOnDrop(Arc<std::sync::atomic::AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Recognizer for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn recognize(&self, _image: &GrayImage, _params: &EngineParams) -> Result<OcrResult, RecognitionError> {
            let _guard = SetOnDrop(Arc::clone(&self.dropped));
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(OcrResult::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_engine_is_dropped_and_slot_returned() {
        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let slots = Arc::new(Semaphore::new(2));
        let worker = OcrPageWorker::new(
            Arc::new(Hanging {
                dropped: Arc::clone(&dropped),
            }),
            Arc::clone(&slots),
            Duration::from_secs(1),
        );
        let variants = vec![variant(0, "clean_scan")];
        let passes = enumerate_passes(&variants, &[EngineParams::default()], None);

        let outcomes = worker.run_passes(&variants, passes, &CancellationToken::new()).await;
        assert_eq!(outcomes[0].result, Err(RecognitionError::Timeout(Duration::from_secs(1))));
        assert_eq!(slots.available_permits(), 2);

        for _ in 0..10 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let recognizer = Arc::new(ScriptedRecognizer {
            calls: AtomicUsize::new(0),
        });
        let variants = vec![variant(0, "clean_scan")];
        let passes = enumerate_passes(&variants, &[EngineParams::default()], None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = worker(Arc::clone(&recognizer), Duration::from_secs(5))
            .run_passes(&variants, passes, &cancel)
            .await;
        assert_eq!(outcomes[0].result, Err(RecognitionError::Cancelled));
    }
}
