//! Line-level fusion of several recognition passes over the same page.
//!
//! Lines from all passes are clustered by geometry, the best line of each cluster
//! wins, and the surviving rows are made non-overlapping.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::config::FusionConfig;
use crate::lines::table::Provenance;
use crate::ocr::quality::PassQuality;
use crate::ocr::types::{OcrLine, OcrResult};
use crate::types::BBox;

/// A successful pass together with its quality scores.
#[derive(Debug, Clone)]
pub struct ScoredPass {
    /// Position of the pass in the page's enumeration
    pub index: usize,
    pub name: String,
    pub strategy: String,
    pub result: OcrResult,
    pub quality: PassQuality,
}

/// The line a cluster settled on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedLine {
    pub line: OcrLine,
    pub score: f64,
    pub mean_confidence: f64,
    pub provenance: Provenance,
}

/// Fused lines of a page in reading order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FusedPage {
    pub lines: Vec<FusedLine>,
    pub clusters: usize,
    pub rejected_singletons: usize,
    pub resolved_overlaps: usize,
    pub passes_considered: usize,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    pass: usize,
    line: usize,
    bbox: BBox,
}

#[derive(Debug)]
struct Cluster {
    seed: BBox,
    members: Vec<Candidate>,
}

impl Cluster {
    fn has_pass(&self, pass: usize) -> bool {
        self.members.iter().any(|m| m.pass == pass)
    }
}

#[derive(Debug, Clone)]
struct Ranked {
    fused: FusedLine,
    aggregate: f64,
}

impl Ranked {
    /// `Greater` when `self` should win over `other`.
    fn rank(&self, other: &Ranked) -> Ordering {
        self.fused
            .score
            .total_cmp(&other.fused.score)
            .then_with(|| self.fused.mean_confidence.total_cmp(&other.fused.mean_confidence))
            .then_with(|| self.aggregate.total_cmp(&other.aggregate))
            .then_with(|| other.fused.provenance.pass_index.cmp(&self.fused.provenance.pass_index))
    }
}

/// Fuses the passes of one page at line granularity.
#[derive(Debug, Clone, Default)]
pub struct MultipassSelector {
    config: FusionConfig,
}

impl MultipassSelector {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn fuse(&self, passes: &[ScoredPass]) -> FusedPage {
        let clusters = self.cluster(passes);
        let cluster_count = clusters.len();
        let apply_acceptance = passes.len() > 1;

        let mut rejected_singletons = 0;
        let mut winners = Vec::with_capacity(clusters.len());
        for cluster in &clusters {
            let Some(best) = cluster
                .members
                .iter()
                .map(|m| ranked(&passes[m.pass], m.line, cluster.members.len()))
                .max_by(|a, b| a.rank(b))
            else {
                continue;
            };
            if apply_acceptance && cluster.members.len() == 1 && best.fused.score <= self.config.min_acceptance {
                rejected_singletons += 1;
                continue;
            }
            winners.push(best);
        }

        sort_reading_order(&mut winners);
        let (mut kept, resolved_overlaps) = self.resolve_overlaps(winners);
        sort_reading_order(&mut kept);

        debug!(
            passes = passes.len(),
            clusters = cluster_count,
            lines = kept.len(),
            rejected_singletons,
            resolved_overlaps,
            "Fused recognition passes"
        );

        FusedPage {
            lines: kept.into_iter().map(|r| r.fused).collect(),
            clusters: cluster_count,
            rejected_singletons,
            resolved_overlaps,
            passes_considered: passes.len(),
        }
    }

    fn cluster(&self, passes: &[ScoredPass]) -> Vec<Cluster> {
        let mut candidates: Vec<Candidate> = passes
            .iter()
            .enumerate()
            .flat_map(|(pass, scored)| {
                scored
                    .result
                    .lines()
                    .iter()
                    .enumerate()
                    .map(move |(line, l)| Candidate { pass, line, bbox: l.bbox })
            })
            .collect();
        candidates.sort_by_key(|c| (c.bbox.top, c.bbox.left, passes[c.pass].index, c.line));

        let mut clusters: Vec<Cluster> = Vec::new();
        for candidate in candidates {
            let target = clusters
                .iter()
                .enumerate()
                .filter(|(_, c)| !c.has_pass(candidate.pass))
                .filter(|(_, c)| c.seed.horizontal_overlap(&candidate.bbox) > 0)
                .map(|(i, c)| (i, c.seed.vertical_overlap_ratio(&candidate.bbox)))
                .filter(|(_, ratio)| *ratio > self.config.overlap_fraction)
                .fold(None::<(usize, f64)>, |best, (i, ratio)| match best {
                    Some((_, r)) if r >= ratio => best,
                    _ => Some((i, ratio)),
                });

            match target {
                Some((i, _)) => clusters[i].members.push(candidate),
                None => clusters.push(Cluster {
                    seed: candidate.bbox,
                    members: vec![candidate],
                }),
            }
        }
        clusters
    }

    /// Drops or trims rows so that no two horizontally overlapping rows share any height.
    fn resolve_overlaps(&self, winners: Vec<Ranked>) -> (Vec<Ranked>, usize) {
        let mut kept: Vec<Ranked> = Vec::with_capacity(winners.len());
        let mut resolved = 0;

        'next: for mut current in winners {
            let mut i = 0;
            while i < kept.len() {
                let (a, b) = (kept[i].fused.line.bbox, current.fused.line.bbox);
                if a.horizontal_overlap(&b) == 0 || a.vertical_overlap(&b) == 0 {
                    i += 1;
                    continue;
                }
                resolved += 1;
                if a.vertical_overlap_ratio(&b) > self.config.overlap_fraction {
                    if kept[i].rank(&current) != Ordering::Less {
                        continue 'next;
                    }
                    kept.remove(i);
                    continue;
                }
                split_at_midpoint(&mut kept[i].fused.line.bbox, &mut current.fused.line.bbox);
                i += 1;
            }
            kept.push(current);
        }
        (kept, resolved)
    }
}

fn ranked(pass: &ScoredPass, line: usize, support: usize) -> Ranked {
    let ocr_line = &pass.result.lines()[line];
    let score = pass.quality.lines.get(line).map_or(0.0, |q| q.score);
    Ranked {
        fused: FusedLine {
            line: ocr_line.clone(),
            score,
            mean_confidence: ocr_line.mean_confidence(),
            provenance: Provenance {
                pass_index: pass.index,
                pass_name: pass.name.clone(),
                strategy: pass.strategy.clone(),
                support,
            },
        },
        aggregate: pass.quality.aggregate,
    }
}

fn sort_reading_order(lines: &mut [Ranked]) {
    lines.sort_by_key(|r| (r.fused.line.bbox.top, r.fused.line.bbox.left));
}

/// Splits the shared band between an upper and a lower box at its middle row.
fn split_at_midpoint(upper: &mut BBox, lower: &mut BBox) {
    if upper.top > lower.top {
        std::mem::swap(upper, lower);
    }
    let band_end = upper.bottom.min(lower.bottom);
    let mid = lower.top + (band_end - lower.top) / 2;
    upper.bottom = mid.max(upper.top + 1);
    lower.top = upper.bottom.min(lower.bottom.saturating_sub(1)).max(lower.top);
}
