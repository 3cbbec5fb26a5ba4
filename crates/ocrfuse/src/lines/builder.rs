use crate::core::config::LineBuilderConfig;
use crate::error::PageError;
use crate::lines::table::{LineRow, LineTable};
use crate::ocr::selector::FusedPage;

/// Turns the fused lines of a page into its [`LineTable`].
#[derive(Debug, Clone, Default)]
pub struct LineTextBuilder {
    config: LineBuilderConfig,
}

impl LineTextBuilder {
    pub fn new(config: LineBuilderConfig) -> Self {
        Self { config }
    }

    /// Assemble the table for `page_index`.
    ///
    /// `fused` is `None` when fusion never ran for the page, which is reported as
    /// `BuildIncomplete`. An empty fusion result yields an empty table.
    pub fn build(&self, page_index: usize, fused: Option<&FusedPage>) -> Result<LineTable, PageError> {
        let fused = fused.ok_or_else(|| PageError::BuildIncomplete {
            stage: "fusion".to_string(),
        })?;

        let gap_threshold = self.gap_threshold(fused);
        let mut rows = Vec::with_capacity(fused.lines.len());
        let mut previous_bottom: Option<u32> = None;

        for fused_line in &fused.lines {
            let line = &fused_line.line;
            if let (Some(threshold), Some(bottom)) = (gap_threshold, previous_bottom)
                && line.bbox.top > bottom.saturating_add(threshold)
            {
                rows.push(LineRow::blank(page_index, rows.len()));
            }
            previous_bottom = Some(previous_bottom.map_or(line.bbox.bottom, |b| b.max(line.bbox.bottom)));

            rows.push(LineRow {
                page_index,
                line_order: rows.len(),
                text: line.text(),
                bbox: Some(line.bbox),
                block_num: Some(line.block_num),
                par_num: Some(line.par_num),
                line_num: Some(line.line_num),
                avg_conf: fused_line.mean_confidence,
                word_count: line.words.iter().filter(|w| !w.text.trim().is_empty()).count(),
                quality: fused_line.score,
                provenance: Some(fused_line.provenance.clone()),
            });
        }

        Ok(LineTable::new(page_index, rows))
    }

    fn gap_threshold(&self, fused: &FusedPage) -> Option<u32> {
        if !self.config.insert_blank_lines || fused.lines.len() < 2 {
            return None;
        }
        let mut heights: Vec<u32> = fused.lines.iter().map(|l| l.line.bbox.height()).collect();
        heights.sort_unstable();
        let median = heights[heights.len() / 2].max(1);
        let scaled = (median as f64 * self.config.blank_gap_factor) as u32;
        Some(scaled.max(self.config.min_blank_gap))
    }
}
