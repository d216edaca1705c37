//! Phase A: deterministic pre-scan of the Grundschutz-Check PDF.
//!
//! A section header is a line near the top of a page reading
//! `<kuerzel> <name>` for an entry of the system structure map. The scan
//! produces an ordered list of page spans, one per Zielobjekt, covering
//! the document from the first header to the end.

use super::GsCheckError;
use crate::models::SystemStructureMap;

/// How many leading non-empty lines of a page are considered header
/// candidates.
const HEADER_CANDIDATE_LINES: usize = 5;

/// A contiguous page range belonging to one Zielobjekt. Pages are
/// 0-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSpan {
    pub kuerzel: String,
    pub start_page: usize,
    pub end_page: usize,
}

impl SectionSpan {
    pub fn page_count(&self) -> usize {
        self.end_page - self.start_page + 1
    }
}

/// Extracts the text layer of every page.
pub fn extract_page_texts(pdf_bytes: &[u8]) -> Result<Vec<String>, GsCheckError> {
    pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
        .map_err(|e| GsCheckError::Pdf(format!("text extraction failed: {e}")))
}

fn normalize(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scans page texts for Zielobjekt section headers and returns the
/// ordered spans. Each Zielobjekt matches at most once (its first
/// occurrence); pages before the first header carry no requirements and
/// are ignored.
pub fn scan_headers(page_texts: &[String], map: &SystemStructureMap) -> Vec<SectionSpan> {
    let headers: Vec<(String, String)> = map
        .zielobjekte
        .iter()
        .map(|z| (z.kuerzel.clone(), normalize(&format!("{} {}", z.kuerzel, z.name))))
        .collect();

    let mut remaining: Vec<&(String, String)> = headers.iter().collect();
    let mut markers: Vec<(usize, String)> = Vec::new();

    for (page_number, text) in page_texts.iter().enumerate() {
        let candidates: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(HEADER_CANDIDATE_LINES)
            .map(normalize)
            .collect();

        for line in &candidates {
            if let Some(pos) = remaining.iter().position(|(_, header)| header == line) {
                let (kuerzel, _) = remaining.remove(pos);
                markers.push((page_number, kuerzel.clone()));
                break;
            }
        }
    }

    if markers.is_empty() {
        tracing::warn!("no Zielobjekt section headers found in document");
        return Vec::new();
    }
    if !remaining.is_empty() {
        tracing::warn!(
            missing = ?remaining.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            "some Zielobjekte have no section in the check document"
        );
    }

    markers.sort_by_key(|(page, _)| *page);
    let last_page = page_texts.len().saturating_sub(1);
    markers
        .iter()
        .enumerate()
        .map(|(i, (start, kuerzel))| {
            let end = markers
                .get(i + 1)
                .map(|(next, _)| next.saturating_sub(1))
                .unwrap_or(last_page);
            SectionSpan {
                kuerzel: kuerzel.clone(),
                start_page: *start,
                end_page: end.max(*start),
            }
        })
        .collect()
}
