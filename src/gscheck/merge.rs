//! Phase D: merge-and-refine.
//!
//! Chunk overlap and table fragmentation produce duplicate extractions of
//! the same requirement. Duplicates are grouped by
//! `(zielobjekt_kuerzel, anforderung_id)` and reconciled:
//! longest title, unique sentences in source order, most severe status,
//! most recent valid review date.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::Requirement;

/// BSI requirement IDs: layer, dotted baustein numbers, `A<number>`
/// (e.g. `SYS.1.1.A3`, `OPS.1.1.2.A2`, `ISMS.1.A9`).
fn anforderung_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Z]{2,5}(\.\d+)+\.A\d+$").expect("requirement ID pattern is valid")
    })
}

/// The persisted merge artifact. `input_digest` makes the step idempotent
/// under a content hash of its inputs: a re-run with identical chunk
/// results is skipped.
#[derive(Debug, Serialize, Deserialize)]
pub struct MergedArtifact {
    pub input_digest: String,
    pub anforderungen: Vec<Requirement>,
}

/// Hex sha256 over the serialized pre-merge requirement list.
pub fn input_digest(requirements: &[Requirement]) -> String {
    let payload = serde_json::to_vec(requirements).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&payload);
    format!("{:x}", hasher.finalize())
}

pub fn merge_requirements(items: Vec<Requirement>) -> Vec<Requirement> {
    let mut groups: BTreeMap<(String, String), Vec<Requirement>> = BTreeMap::new();
    for item in items {
        if !anforderung_id_pattern().is_match(item.anforderung_id.trim()) {
            tracing::warn!(
                kuerzel = %item.zielobjekt_kuerzel,
                id = %item.anforderung_id,
                "skipping extracted requirement with malformed ID"
            );
            continue;
        }
        let id = item.anforderung_id.trim().to_string();
        groups
            .entry((item.zielobjekt_kuerzel.clone(), id))
            .or_default()
            .push(item);
    }

    groups
        .into_iter()
        .map(|((kuerzel, id), versions)| merge_group(kuerzel, id, versions))
        .collect()
}

fn merge_group(kuerzel: String, id: String, versions: Vec<Requirement>) -> Requirement {
    let titel = versions
        .iter()
        .map(|v| v.titel.trim())
        .filter(|t| !t.is_empty())
        .max_by_key(|t| t.len())
        .unwrap_or_default()
        .to_string();

    let umsetzungserlaeuterung = merge_explanations(
        versions
            .iter()
            .map(|v| v.umsetzungserlaeuterung.as_str()),
    );

    // Most severe status wins; absent statuses never override a present one.
    let umsetzungsstatus = versions
        .iter()
        .filter_map(|v| v.umsetzungsstatus)
        .max_by_key(|s| s.priority());

    let datum_letzte_pruefung = versions.iter().filter_map(|v| v.datum_letzte_pruefung).max();

    Requirement {
        zielobjekt_kuerzel: kuerzel,
        anforderung_id: id,
        titel,
        umsetzungsstatus,
        umsetzungserlaeuterung,
        datum_letzte_pruefung,
    }
}

/// Concatenates unique sentences from all versions, preserving source
/// order. Sentence equality is case-insensitive with normalized
/// whitespace.
fn merge_explanations<'a>(texts: impl Iterator<Item = &'a str>) -> String {
    let mut seen: Vec<String> = Vec::new();
    let mut out: Vec<String> = Vec::new();
    for text in texts {
        for sentence in split_sentences(text) {
            let key = sentence
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();
            if key.is_empty() || seen.contains(&key) {
                continue;
            }
            seen.push(key);
            out.push(sentence);
        }
    }
    out.join(" ")
}

/// Splits on sentence-final `.`, `!`, `?` followed by whitespace. The
/// terminator stays with its sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |n| n.is_whitespace()) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}
