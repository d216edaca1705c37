//! Phase B: semantic chunking of Zielobjekt sections.
//!
//! Short sections become one chunk. Long sections are split into
//! `ceil(pages / MAX_PAGES_PER_CHUNK)` contiguous sub-chunks; adjacent
//! sub-chunks share a small page overlap so a requirement spanning a
//! boundary is seen by both sides (the merge step removes the duplicate).

use super::header_index::SectionSpan;

pub const MAX_PAGES_PER_CHUNK: usize = 25;
pub const CHUNK_OVERLAP_PAGES: usize = 3;

/// One extraction unit: a page range belonging to exactly one Zielobjekt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kuerzel: String,
    /// 0-based inclusive page range within the whole document.
    pub start_page: usize,
    pub end_page: usize,
    /// Position of this chunk within its section (1-based) and the
    /// section's chunk count; used for prompt context and cache keys.
    pub part: usize,
    pub total_parts: usize,
}

pub fn chunk_sections(spans: &[SectionSpan]) -> Vec<Chunk> {
    spans.iter().flat_map(chunk_section).collect()
}

fn chunk_section(span: &SectionSpan) -> Vec<Chunk> {
    let pages = span.page_count();
    if pages <= MAX_PAGES_PER_CHUNK {
        return vec![Chunk {
            kuerzel: span.kuerzel.clone(),
            start_page: span.start_page,
            end_page: span.end_page,
            part: 1,
            total_parts: 1,
        }];
    }

    let parts = pages.div_ceil(MAX_PAGES_PER_CHUNK);
    let base = pages.div_ceil(parts);
    let mut chunks = Vec::with_capacity(parts);

    for i in 0..parts {
        let mut start = span.start_page + i * base;
        let end = (start + base - 1).min(span.end_page);
        if i > 0 {
            // Extend backwards into the previous chunk.
            start = start.saturating_sub(CHUNK_OVERLAP_PAGES).max(span.start_page);
        }
        chunks.push(Chunk {
            kuerzel: span.kuerzel.clone(),
            start_page: start,
            end_page: end,
            part: i + 1,
            total_parts: parts,
        });
    }
    chunks
}
