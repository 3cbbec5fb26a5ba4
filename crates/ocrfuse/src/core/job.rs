use std::sync::Arc;

use image::GrayImage;

use crate::core::budget::{MemoryBudget, PageArena};
use crate::error::PageError;
use crate::image::analyzer::FeatureSummary;
use crate::image::preprocess::Variant;
use crate::image::strategy::Strategy;
use crate::lines::table::LineTable;
use crate::ocr::selector::FusedPage;
use crate::ocr::worker::PassOutcome;
use crate::types::PageId;

/// State of one page while it moves through the pipeline.
///
/// The job owns every intermediate artifact of its page together with the arena holding
/// their memory reservations. Dropping the job releases all of them. The line table is
/// produced once and can be taken once.
#[derive(Debug)]
pub struct PageJob {
    id: PageId,
    arena: PageArena,
    raw: Option<Arc<GrayImage>>,
    features: Option<FeatureSummary>,
    strategies: Vec<Strategy>,
    variants: Vec<Variant>,
    outcomes: Vec<PassOutcome>,
    fused: Option<FusedPage>,
    line_table: Option<LineTable>,
    table_produced: bool,
}

impl PageJob {
    pub fn new(id: PageId, budget: MemoryBudget) -> Self {
        Self {
            id,
            arena: PageArena::new(budget),
            raw: None,
            features: None,
            strategies: Vec::new(),
            variants: Vec::new(),
            outcomes: Vec::new(),
            fused: None,
            line_table: None,
            table_produced: false,
        }
    }

    pub fn id(&self) -> &PageId {
        &self.id
    }

    pub fn arena(&self) -> &PageArena {
        &self.arena
    }

    pub fn set_raw(&mut self, raw: Arc<GrayImage>) {
        self.raw = Some(raw);
    }

    pub fn raw(&self) -> Option<&Arc<GrayImage>> {
        self.raw.as_ref()
    }

    pub fn set_features(&mut self, features: FeatureSummary) {
        self.features = Some(features);
    }

    pub fn features(&self) -> Option<&FeatureSummary> {
        self.features.as_ref()
    }

    pub fn set_strategies(&mut self, strategies: Vec<Strategy>) {
        self.strategies = strategies;
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn set_variants(&mut self, variants: Vec<Variant>) {
        self.variants = variants;
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn set_outcomes(&mut self, outcomes: Vec<PassOutcome>) {
        self.outcomes = outcomes;
    }

    pub fn outcomes(&self) -> &[PassOutcome] {
        &self.outcomes
    }

    pub fn set_fused(&mut self, fused: FusedPage) {
        self.fused = Some(fused);
    }

    pub fn fused(&self) -> Option<&FusedPage> {
        self.fused.as_ref()
    }

    /// Store the finished table. A second table for the same page is rejected and the
    /// job keeps the first one.
    pub fn store_line_table(&mut self, table: LineTable) -> Result<(), PageError> {
        if self.table_produced {
            return Err(PageError::TableAlreadyProduced);
        }
        self.table_produced = true;
        self.line_table = Some(table);
        Ok(())
    }

    /// Hand the table over. Later calls return `None`.
    pub fn take_line_table(&mut self) -> Option<LineTable> {
        self.line_table.take()
    }

    /// Drop the bitmaps and return their memory to the budget.
    pub fn release_bitmaps(&mut self) {
        self.raw = None;
        self.variants.clear();
        self.arena.release();
    }
}
