//! Batch processing: ordering, page isolation, memory budget, cancellation.

use std::sync::Arc;
use std::time::Duration;

use ocrfuse::{PageError, PageId, PagePipeline, PageStatus, PixelFormat, RawPage};
use tokio_util::sync::CancellationToken;

mod helpers;
use helpers::*;

#[tokio::test]
async fn test_batch_reports_keep_submission_order() {
    let recognizer = Arc::new(ScriptedRecognizer::new().on_psm(3, Script::Lines(three_lines())));
    let mut config = config_with_psms(&[3]);
    config.max_concurrent_pages = Some(3);
    let pipeline = PagePipeline::new(config, recognizer.clone()).unwrap();

    let pages: Vec<RawPage> = (0..6).map(|i| binary_page("report", i, 600, 400)).collect();
    let reports = pipeline.process_batch(pages, &CancellationToken::new()).await;

    assert_eq!(reports.len(), 6);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.page, PageId::new("report", i));
        assert_eq!(report.status, PageStatus::Completed);
        assert!(report.line_table.as_ref().unwrap().rows().iter().all(|r| r.page_index == i));
    }
    assert_eq!(recognizer.calls(), 6);
}

#[tokio::test]
async fn test_empty_batch() {
    let recognizer = Arc::new(ScriptedRecognizer::new());
    let pipeline = PagePipeline::new(config_with_psms(&[3]), recognizer).unwrap();
    assert!(pipeline.process_batch(Vec::new(), &CancellationToken::new()).await.is_empty());
}

#[tokio::test]
async fn test_failed_page_does_not_affect_others() {
    let recognizer = Arc::new(ScriptedRecognizer::new().on_psm(3, Script::Lines(three_lines())));
    let pipeline = PagePipeline::new(config_with_psms(&[3]), recognizer).unwrap();

    let pages = vec![
        binary_page("mixed", 0, 600, 400),
        RawPage::new(PageId::new("mixed", 1), 600, 400, PixelFormat::Gray8, vec![255; 12]),
        binary_page("mixed", 2, 600, 400),
    ];
    let reports = pipeline.process_batch(pages, &CancellationToken::new()).await;

    assert_eq!(reports[0].status, PageStatus::Completed);
    assert!(matches!(reports[1].status, PageStatus::Failed(PageError::InvalidImage(_))));
    assert_eq!(reports[2].status, PageStatus::Completed);
    let text = |i: usize| reports[i].line_table.as_ref().unwrap().text();
    assert_eq!(text(0), text(2));
    assert!(reports[1].line_table.is_none());
}

#[tokio::test]
async fn test_memory_is_reserved_and_returned() {
    let recognizer = Arc::new(ScriptedRecognizer::new().on_psm(3, Script::Lines(three_lines())));
    let mut config = config_with_psms(&[3]);
    config.memory_budget_mb = 1;
    let pipeline = PagePipeline::new(config, recognizer).unwrap();

    // 800 x 600 gray bytes, identity strategy only
    let report = pipeline
        .process_page(binary_page("budget", 0, 800, 600), &CancellationToken::new())
        .await;
    assert_eq!(report.status, PageStatus::Completed);
    assert_eq!(report.diagnostics.reserved_kib, 469);
    assert_eq!(pipeline.budget().available_kib(), 1024);
}

#[tokio::test]
async fn test_oversized_page_runs_alone() {
    let recognizer = Arc::new(ScriptedRecognizer::new().on_psm(3, Script::Lines(three_lines())));
    let mut config = config_with_psms(&[3]);
    config.memory_budget_mb = 1;
    let pipeline = PagePipeline::new(config, recognizer).unwrap();

    let report = pipeline
        .process_page(binary_page("huge", 0, 1100, 1000), &CancellationToken::new())
        .await;
    assert_eq!(report.status, PageStatus::Completed);
    assert_eq!(report.diagnostics.reserved_kib, 1024);
    assert_eq!(pipeline.budget().available_kib(), 1024);
}

#[tokio::test]
async fn test_tight_budget_batch_completes() {
    let recognizer = Arc::new(
        ScriptedRecognizer::new().on_psm(3, Script::Slow(Duration::from_millis(20), three_lines())),
    );
    let mut config = config_with_psms(&[3]);
    config.memory_budget_mb = 1;
    config.max_concurrent_pages = Some(4);
    let pipeline = PagePipeline::new(config, recognizer.clone()).unwrap();

    // Two pages fit into the budget at a time
    let pages: Vec<RawPage> = (0..5).map(|i| binary_page("tight", i, 800, 600)).collect();
    let reports = pipeline.process_batch(pages, &CancellationToken::new()).await;

    assert!(reports.iter().all(|r| r.status == PageStatus::Completed));
    assert_eq!(recognizer.calls(), 5);
    assert!(recognizer.max_in_flight.load(std::sync::atomic::Ordering::SeqCst) <= 2);
    assert_eq!(pipeline.budget().available_kib(), 1024);
}

#[tokio::test]
async fn test_cancelled_batch_cancels_every_page() {
    let recognizer = Arc::new(ScriptedRecognizer::new().on_psm(3, Script::Lines(three_lines())));
    let pipeline = PagePipeline::new(config_with_psms(&[3]), recognizer.clone()).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let pages: Vec<RawPage> = (0..3).map(|i| binary_page("stop", i, 600, 400)).collect();
    let reports = pipeline.process_batch(pages, &cancel).await;

    assert_eq!(reports.len(), 3);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.page.page_index, i);
        assert_eq!(report.status, PageStatus::Cancelled);
    }
    assert_eq!(recognizer.calls(), 0);
}

#[tokio::test]
async fn test_cancel_mid_batch() {
    let recognizer = Arc::new(
        ScriptedRecognizer::new().on_psm(3, Script::Slow(Duration::from_secs(30), three_lines())),
    );
    let mut config = config_with_psms(&[3]);
    config.max_concurrent_pages = Some(2);
    let pipeline = PagePipeline::new(config, recognizer).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let pages: Vec<RawPage> = (0..4).map(|i| binary_page("halt", i, 600, 400)).collect();
    let reports = tokio::time::timeout(Duration::from_secs(10), pipeline.process_batch(pages, &cancel))
        .await
        .expect("cancellation ends the batch");

    assert!(reports.iter().all(|r| r.status == PageStatus::Cancelled));
    assert_eq!(pipeline.budget().available_kib(), pipeline.budget().total_kib() as usize);
}
