use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::BBox;
use crate::{OcrFuseError, Result};

/// Column header of the TSV form of a line table.
pub const LINE_TABLE_TSV_HEADER: &str =
    "pageIndex\tlineOrder\tblockNum\tparNum\tlineNum\tleft\ttop\tright\tbottom\tavgConf\twordCount\tquality\tpass\tstrategy\ttext";

const TSV_FIELDS: usize = 15;

/// Which pass a row was taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub pass_index: usize,
    pub pass_name: String,
    pub strategy: String,
    /// Number of passes that recognized this line
    pub support: usize,
}

/// One line of the reconstructed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRow {
    pub page_index: usize,
    /// Position on the page, counting synthetic blank rows
    pub line_order: usize,
    pub text: String,
    /// None for synthetic blank rows
    pub bbox: Option<BBox>,
    pub block_num: Option<u32>,
    pub par_num: Option<u32>,
    pub line_num: Option<u32>,
    pub avg_conf: f64,
    pub word_count: usize,
    /// Fused quality score in `[0, 1]`
    pub quality: f64,
    pub provenance: Option<Provenance>,
}

impl LineRow {
    /// A row without geometry marking a paragraph break.
    pub fn blank(page_index: usize, line_order: usize) -> Self {
        Self {
            page_index,
            line_order,
            text: String::new(),
            bbox: None,
            block_num: None,
            par_num: None,
            line_num: None,
            avg_conf: 0.0,
            word_count: 0,
            quality: 0.0,
            provenance: None,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Ordered lines of one page, top to bottom then left to right.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LineTable {
    pub page_index: usize,
    rows: Vec<LineRow>,
}

impl LineTable {
    pub fn new(page_index: usize, rows: Vec<LineRow>) -> Self {
        Self { page_index, rows }
    }

    pub fn rows(&self) -> &[LineRow] {
        &self.rows
    }

    /// Mutable access for the editing stage that owns the table after handoff.
    pub fn rows_mut(&mut self) -> &mut Vec<LineRow> {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<LineRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_at(&self, index: usize) -> Option<&LineRow> {
        self.rows.get(index)
    }

    /// Index of the first row, in reading order, whose box contains the point.
    pub fn hit_test(&self, x: u32, y: u32) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.bbox.is_some_and(|b| b.contains(x, y)))
    }

    /// Page text with one line per row.
    pub fn text(&self) -> String {
        self.rows.iter().map(|r| r.text.as_str()).collect::<Vec<_>>().join("\n")
    }

    pub fn to_tsv(&self) -> String {
        let mut out = String::with_capacity(64 * (self.rows.len() + 1));
        out.push_str(LINE_TABLE_TSV_HEADER);
        out.push('\n');

        let id = |v: Option<u32>| v.map_or_else(|| "-1".to_string(), |n| n.to_string());
        for row in &self.rows {
            let (left, top, right, bottom) = match row.bbox {
                Some(b) => (b.left.to_string(), b.top.to_string(), b.right.to_string(), b.bottom.to_string()),
                None => Default::default(),
            };
            let (pass, strategy) = row
                .provenance
                .as_ref()
                .map(|p| (p.pass_name.as_str(), p.strategy.as_str()))
                .unwrap_or(("", ""));
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.4}\t{}\t{:.4}\t{}\t{}\t{}\n",
                row.page_index,
                row.line_order,
                id(row.block_num),
                id(row.par_num),
                id(row.line_num),
                left,
                top,
                right,
                bottom,
                row.avg_conf,
                row.word_count,
                row.quality,
                sanitize(pass),
                sanitize(strategy),
                sanitize(&row.text),
            ));
        }
        out
    }

    /// Parse the output of [`LineTable::to_tsv`].
    ///
    /// Pass indices and support counts are not part of the TSV form and come back as 0.
    /// The page index is taken from the rows; a table without rows belongs to page 0, use
    /// [`LineTable::from_tsv_for_page`] when the page is known.
    pub fn from_tsv(tsv: &str) -> Result<Self> {
        let rows = parse_tsv_rows(tsv)?;
        let page_index = rows.first().map(|r| r.page_index).unwrap_or_default();
        Self::checked(page_index, rows)
    }

    /// Parse a TSV table of a known page. Every row must carry that page index.
    pub fn from_tsv_for_page(page_index: usize, tsv: &str) -> Result<Self> {
        Self::checked(page_index, parse_tsv_rows(tsv)?)
    }

    fn checked(page_index: usize, rows: Vec<LineRow>) -> Result<Self> {
        if let Some(row) = rows.iter().find(|r| r.page_index != page_index) {
            return Err(OcrFuseError::serialization(format!(
                "line table TSV row {} belongs to page {}, expected page {}",
                row.line_order, row.page_index, page_index
            )));
        }
        Ok(Self { page_index, rows })
    }


    pub fn save_tsv(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_tsv())?;
        Ok(())
    }

    pub fn load_tsv(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_tsv(&content)
    }
}

fn parse_tsv_rows(tsv: &str) -> Result<Vec<LineRow>> {
    let mut lines = tsv.lines().filter(|l| !l.trim().is_empty());
    match lines.next() {
        Some(header) if header.starts_with("pageIndex\t") => {}
        _ => return Err(OcrFuseError::serialization("line table TSV is missing its header")),
    }

    let mut rows = Vec::new();
    for (n, line) in lines.enumerate() {
        let fields: Vec<&str> = line.splitn(TSV_FIELDS, '\t').collect();
        if fields.len() < TSV_FIELDS {
            return Err(OcrFuseError::serialization(format!(
                "line table TSV row {} has {} fields, expected {}",
                n + 1,
                fields.len(),
                TSV_FIELDS
            )));
        }
        let field = |i: usize| fields[i].trim();
        let bad = |i: usize, what: &str| format!("row {}: bad {} '{}'", n + 1, what, fields[i]);
        let count = |i: usize| -> Result<usize> {
            field(i)
                .parse::<usize>()
                .map_err(|e| OcrFuseError::serialization_with_source(bad(i, "count"), e))
        };
        let coord = |i: usize| -> Result<u32> {
            field(i)
                .parse::<u32>()
                .map_err(|e| OcrFuseError::serialization_with_source(bad(i, "coordinate"), e))
        };
        let real = |i: usize| -> Result<f64> {
            field(i)
                .parse::<f64>()
                .map_err(|e| OcrFuseError::serialization_with_source(bad(i, "number"), e))
        };
        // -1 marks a missing layout id
        let id = |i: usize| -> Result<Option<u32>> {
            let v = field(i)
                .parse::<i64>()
                .map_err(|e| OcrFuseError::serialization_with_source(bad(i, "id"), e))?;
            Ok(u32::try_from(v).ok())
        };

        let bbox = if field(5).is_empty() {
            None
        } else {
            Some(BBox::new(coord(5)?, coord(6)?, coord(7)?, coord(8)?))
        };
        let provenance = (!fields[12].is_empty()).then(|| Provenance {
            pass_index: 0,
            pass_name: fields[12].to_string(),
            strategy: fields[13].to_string(),
            support: 0,
        });

        rows.push(LineRow {
            page_index: count(0)?,
            line_order: count(1)?,
            block_num: id(2)?,
            par_num: id(3)?,
            line_num: id(4)?,
            bbox,
            avg_conf: real(9)?,
            word_count: count(10)?,
            quality: real(11)?,
            provenance,
            text: fields[14].to_string(),
        });
    }
    Ok(rows)
}

fn sanitize(text: &str) -> String {
    text.replace(['\t', '\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(order: usize, text: &str, bbox: BBox) -> LineRow {
        LineRow {
            page_index: 2,
            line_order: order,
            text: text.to_string(),
            bbox: Some(bbox),
            block_num: Some(1),
            par_num: Some(1),
            line_num: Some(order as u32 + 1),
            avg_conf: 0.91,
            word_count: text.split_whitespace().count(),
            quality: 0.88,
            provenance: Some(Provenance {
                pass_index: 1,
                pass_name: "clean_scan/psm3".to_string(),
                strategy: "clean_scan".to_string(),
                support: 2,
            }),
        }
    }

    fn sample() -> LineTable {
        LineTable::new(
            2,
            vec![
                row(0, "First line", BBox::new(10, 10, 200, 30)),
                LineRow::blank(2, 1),
                row(2, "Third\tline", BBox::new(10, 80, 180, 100)),
            ],
        )
    }

    #[test]
    fn test_hit_test_and_row_at() {
        let table = sample();
        assert_eq!(table.hit_test(15, 20), Some(0));
        assert_eq!(table.hit_test(15, 90), Some(2));
        assert_eq!(table.hit_test(15, 50), None);
        assert!(table.row_at(1).unwrap().is_blank());
        assert!(table.row_at(3).is_none());
    }

    #[test]
    fn test_tsv_round_trip_keeps_text_and_geometry() {
        let table = sample();
        let tsv = table.to_tsv();
        assert!(tsv.starts_with(LINE_TABLE_TSV_HEADER));

        let back = LineTable::from_tsv(&tsv).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back.page_index, 2);
        assert_eq!(back.rows()[0].text, "First line");
        assert_eq!(back.rows()[0].bbox, Some(BBox::new(10, 10, 200, 30)));
        assert_eq!(back.rows()[1].bbox, None);
        assert_eq!(back.rows()[1].block_num, None);
        assert_eq!(back.rows()[2].text, "Third line");
        assert_eq!(
            back.rows()[2].provenance.as_ref().map(|p| p.pass_name.as_str()),
            Some("clean_scan/psm3")
        );
        assert!((back.rows()[0].avg_conf - 0.91).abs() < 1e-4);
    }

    #[test]
    fn test_from_tsv_rejects_missing_header() {
        assert!(LineTable::from_tsv("0\t0\t1").is_err());
    }

    #[test]
    fn test_from_tsv_rejects_negative_geometry() {
        let tsv = sample().to_tsv().replacen("\t10\t10\t200\t30\t", "\t-5\t10\t200\t30\t", 1);
        let err = LineTable::from_tsv(&tsv).unwrap_err();
        assert!(err.to_string().contains("bad coordinate '-5'"), "{}", err);
    }

    #[test]
    fn test_empty_table_keeps_its_page() {
        let empty = LineTable::new(7, Vec::new());
        let back = LineTable::from_tsv_for_page(7, &empty.to_tsv()).unwrap();
        assert_eq!(back.page_index, 7);
        assert!(back.is_empty());

        let err = LineTable::from_tsv_for_page(3, &sample().to_tsv()).unwrap_err();
        assert!(err.to_string().contains("expected page 3"));
    }

    #[test]
    fn test_from_tsv_rejects_short_rows() {
        let tsv = format!("{}\n0\t0\t1\n", LINE_TABLE_TSV_HEADER);
        assert!(LineTable::from_tsv(&tsv).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("page.tsv");
        sample().save_tsv(&path).unwrap();
        let loaded = LineTable::load_tsv(&path).unwrap();
        assert_eq!(loaded.text(), "First line\n\nThird line");
    }

    #[test]
    fn test_json_round_trip() {
        let table = sample();
        let json = serde_json::to_string(&table).unwrap();
        let back: LineTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}
