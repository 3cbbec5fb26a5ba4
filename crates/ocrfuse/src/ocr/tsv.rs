use crate::ocr::error::RecognitionError;
use crate::ocr::types::{OcrLine, OcrResult, OcrWord};
use crate::types::BBox;

/// Columns in a Tesseract TSV row.
pub const TSV_MIN_FIELDS: usize = 12;
/// `level` of a text line row.
pub const TSV_LINE_LEVEL: u32 = 4;
/// `level` of a word row.
pub const TSV_WORD_LEVEL: u32 = 5;

type LineKey = (u32, u32, u32, u32);

/// Parse Tesseract TSV output into an [`OcrResult`].
///
/// Words are grouped into lines by `(page, block, paragraph, line)` in the order
/// they appear. Rows with a negative confidence or blank text carry no word and are
/// skipped, as are malformed rows. Output without the TSV header is unreadable.
pub fn parse_tsv(tsv_data: &str) -> Result<OcrResult, RecognitionError> {
    let mut rows = tsv_data.lines().filter(|l| !l.trim().is_empty());
    match rows.next() {
        Some(header) if header.trim_start().starts_with("level") => {}
        Some(_) => return Err(RecognitionError::UnreadableResult("missing TSV header".to_string())),
        None => return Err(RecognitionError::UnreadableResult("empty TSV output".to_string())),
    }

    let mut lines: Vec<(LineKey, Vec<OcrWord>)> = Vec::new();

    for row in rows {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < TSV_MIN_FIELDS - 1 {
            continue;
        }

        let number = |i: usize| fields[i].trim().parse::<u32>().ok();
        let Some(level) = number(0) else {
            continue;
        };
        if level != TSV_WORD_LEVEL {
            continue;
        }

        let conf = parse_confidence(fields[10]);
        let text = fields.get(11).map(|t| t.trim()).unwrap_or_default();
        let Some(conf) = conf.filter(|c| *c >= 0.0) else {
            continue;
        };
        if text.is_empty() {
            continue;
        }

        let (Some(left), Some(top), Some(width), Some(height)) = (number(6), number(7), number(8), number(9)) else {
            continue;
        };
        let key = (
            number(1).unwrap_or(1),
            number(2).unwrap_or(0),
            number(3).unwrap_or(0),
            number(4).unwrap_or(0),
        );
        let word = OcrWord::new(text, BBox::from_ltwh(left, top, width, height), conf / 100.0);

        match lines.iter_mut().rev().find(|(k, _)| *k == key) {
            Some((_, words)) => words.push(word),
            None => lines.push((key, vec![word])),
        }
    }

    let lines = lines
        .into_iter()
        .map(|((_, block, par, line), words)| OcrLine::from_words(words).with_numbers(block, par, line))
        .collect();
    Ok(OcrResult::new(lines))
}

/// Some locales print the confidence with a decimal comma.
fn parse_confidence(field: &str) -> Option<f64> {
    field.trim().replace(',', ".").parse::<f64>().ok()
}
