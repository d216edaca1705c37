//! Phase C: per-chunk structured extraction.
//!
//! Each chunk is materialized as a page-range PDF in the store, attached
//! by reference and sent through the gateway. Chunk results are cached
//! under an intermediate prefix so an interrupted run resumes without
//! re-extracting. A chunk that keeps failing contributes an empty list
//! and a structural warning instead of blocking the run.

use std::sync::Arc;

use serde::Deserialize;
use tokio::task::JoinSet;

use super::chunker::Chunk;
use super::GsCheckError;
use crate::ai::{AiGateway, GenerateRequest};
use crate::config::AppConfig;
use crate::models::{Requirement, SystemStructureMap};
use crate::prompts;
use crate::store::{paths, JsonStore, ObjectStore};

#[derive(Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    anforderungen: Vec<Requirement>,
}

/// Result of extracting all chunks: the raw (pre-merge) requirement list
/// and structural warnings for chunks that failed terminally.
pub struct ExtractionOutcome {
    pub requirements: Vec<Requirement>,
    pub warnings: Vec<String>,
}

/// Copies the page range `[start_page, end_page]` (0-based inclusive)
/// into a standalone PDF.
pub fn pdf_page_range(
    pdf_bytes: &[u8],
    start_page: usize,
    end_page: usize,
) -> Result<Vec<u8>, GsCheckError> {
    let mut doc = lopdf::Document::load_mem(pdf_bytes)
        .map_err(|e| GsCheckError::Pdf(format!("cannot load check document: {e}")))?;

    let page_numbers: Vec<u32> = doc
        .get_pages()
        .keys()
        .filter(|page| {
            let idx = **page as usize - 1;
            idx < start_page || idx > end_page
        })
        .copied()
        .collect();
    doc.delete_pages(&page_numbers);
    doc.prune_objects();

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| GsCheckError::Pdf(format!("cannot write chunk document: {e}")))?;
    Ok(out)
}

pub struct ChunkRefiner {
    config: Arc<AppConfig>,
    store: Arc<dyn ObjectStore>,
    ai: Arc<AiGateway>,
}

impl ChunkRefiner {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn ObjectStore>, ai: Arc<AiGateway>) -> Self {
        Self { config, store, ai }
    }

    /// Extracts requirements from every chunk in parallel. The gateway's
    /// semaphore bounds the number of in-flight model calls.
    pub async fn extract_all(
        self: &Arc<Self>,
        pdf_bytes: Arc<Vec<u8>>,
        chunks: Vec<Chunk>,
        map: &SystemStructureMap,
        force: bool,
    ) -> Result<ExtractionOutcome, GsCheckError> {
        let name_map: std::collections::BTreeMap<String, String> = map
            .zielobjekte
            .iter()
            .map(|z| (z.kuerzel.clone(), z.name.clone()))
            .collect();

        let mut join_set: JoinSet<(Chunk, Result<Vec<Requirement>, GsCheckError>)> =
            JoinSet::new();
        for chunk in chunks {
            let refiner = Arc::clone(self);
            let bytes = Arc::clone(&pdf_bytes);
            let name = name_map
                .get(&chunk.kuerzel)
                .cloned()
                .unwrap_or_else(|| "Unbekannt".to_string());
            join_set.spawn(async move {
                let result = refiner.extract_chunk(&bytes, &chunk, &name, force).await;
                (chunk, result)
            });
        }

        let mut requirements = Vec::new();
        let mut warnings = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (chunk, result) = joined
                .map_err(|e| GsCheckError::InvalidData(format!("chunk task panicked: {e}")))?;
            match result {
                Ok(items) => requirements.extend(items),
                Err(e) => {
                    let warning = format!(
                        "Extraktion für Zielobjekt '{}' (Teil {}/{}) fehlgeschlagen: {e}",
                        chunk.kuerzel, chunk.part, chunk.total_parts
                    );
                    tracing::error!(
                        kuerzel = %chunk.kuerzel,
                        part = chunk.part,
                        error = %e,
                        "chunk extraction failed terminally, continuing with empty result"
                    );
                    warnings.push(warning);
                }
            }
        }

        // Deterministic order regardless of task completion order.
        requirements.sort_by(|a, b| {
            (a.zielobjekt_kuerzel.as_str(), a.anforderung_id.as_str())
                .cmp(&(b.zielobjekt_kuerzel.as_str(), b.anforderung_id.as_str()))
        });
        warnings.sort();
        Ok(ExtractionOutcome {
            requirements,
            warnings,
        })
    }

    async fn extract_chunk(
        &self,
        pdf_bytes: &[u8],
        chunk: &Chunk,
        zielobjekt_name: &str,
        force: bool,
    ) -> Result<Vec<Requirement>, GsCheckError> {
        let cache_key = self.config.output_key(&format!(
            "{}{}_{:02}.json",
            paths::GS_INDIVIDUAL_PREFIX,
            sanitize_kuerzel(&chunk.kuerzel),
            chunk.part
        ));
        if !force && self.store.exists(&cache_key)? {
            tracing::info!(kuerzel = %chunk.kuerzel, part = chunk.part, "using cached chunk result");
            let cached: ChunkResponse = self.store.read_json(&cache_key)?;
            return Ok(self.claim_for_zielobjekt(cached.anforderungen, &chunk.kuerzel));
        }

        let chunk_pdf = pdf_page_range(pdf_bytes, chunk.start_page, chunk.end_page)?;
        let chunk_pdf_key = self.config.output_key(&format!(
            "{}{}_{:02}.pdf",
            paths::GS_CHUNK_PDF_PREFIX,
            sanitize_kuerzel(&chunk.kuerzel),
            chunk.part
        ));
        self.store.write_bytes(&chunk_pdf_key, &chunk_pdf)?;

        let chunk_note = if chunk.total_parts > 1 {
            prompts::fill(
                prompts::GS_CHUNK_OVERLAP_NOTE,
                &[
                    ("part", &chunk.part.to_string()),
                    ("total", &chunk.total_parts.to_string()),
                ],
            )
        } else {
            String::new()
        };
        let prompt = prompts::fill(
            prompts::GS_CHUNK_EXTRACTION,
            &[
                ("kuerzel", &chunk.kuerzel),
                ("name", zielobjekt_name),
                ("chunk_note", &chunk_note),
            ],
        );
        let request = GenerateRequest::new(
            prompt,
            prompts::gs_chunk_schema(),
            format!(
                "GS-Check: {} (Teil {}/{})",
                chunk.kuerzel, chunk.part, chunk.total_parts
            ),
        )
        .with_attachments(vec![chunk_pdf_key]);

        let value = self.ai.generate_structured(&request).await?;
        let parsed: ChunkResponse = serde_json::from_value(value)
            .map_err(|e| GsCheckError::InvalidData(format!("chunk response: {e}")))?;

        self.store.write_json(
            &cache_key,
            &serde_json::json!({ "anforderungen": parsed.anforderungen }),
        )?;
        Ok(self.claim_for_zielobjekt(parsed.anforderungen, &chunk.kuerzel))
    }

    /// The chunk belongs to exactly one Zielobjekt; whatever the model put
    /// into the field is overwritten with the chunk's kuerzel.
    fn claim_for_zielobjekt(
        &self,
        mut items: Vec<Requirement>,
        kuerzel: &str,
    ) -> Vec<Requirement> {
        for item in &mut items {
            item.zielobjekt_kuerzel = kuerzel.to_string();
        }
        items
    }
}

fn sanitize_kuerzel(kuerzel: &str) -> String {
    kuerzel
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::mock::MockProvider;
    use crate::ai::AiError;
    use crate::config::test_support::test_config;
    use crate::gscheck::header_index::test_pdf;
    use crate::models::Zielobjekt;
    use crate::store::LocalStore;
    use serde_json::json;

    fn map() -> SystemStructureMap {
        SystemStructureMap {
            zielobjekte: vec![Zielobjekt {
                kuerzel: "S-001".into(),
                name: "Windows Server".into(),
            }],
            baustein_assignments: vec![],
        }
    }

    fn chunk(part: usize, total: usize) -> Chunk {
        Chunk {
            kuerzel: "S-001".into(),
            start_page: 0,
            end_page: 0,
            part,
            total_parts: total,
        }
    }

    fn chunk_response() -> serde_json::Value {
        json!({
            "anforderungen": [{
                "zielobjekt_kuerzel": "irrelevant",
                "anforderung_id": "SYS.1.1.A3",
                "titel": "Restriktive Rechtevergabe",
                "umsetzungsstatus": "Ja",
                "umsetzungserlaeuterung": "Umgesetzt über Gruppenrichtlinien."
            }]
        })
    }

    fn setup(
        responses: Vec<Result<serde_json::Value, AiError>>,
    ) -> (tempfile::TempDir, Arc<ChunkRefiner>, Arc<LocalStore>) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(dir.path().to_str().unwrap()));
        let store = Arc::new(LocalStore::new(dir.path()));
        let ai = Arc::new(AiGateway::new(Arc::new(MockProvider::new(responses)), 2));
        let refiner = Arc::new(ChunkRefiner::new(config, store.clone(), ai));
        (dir, refiner, store)
    }

    #[test]
    fn page_range_extraction_keeps_requested_pages() {
        let pdf = test_pdf::make_pdf(&["eins", "zwei", "drei", "vier"]);
        let sliced = pdf_page_range(&pdf, 1, 2).unwrap();
        let texts = pdf_extract::extract_text_from_mem_by_pages(&sliced).unwrap();
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("zwei"));
        assert!(texts[1].contains("drei"));
    }

    #[tokio::test]
    async fn extraction_claims_items_for_chunk_zielobjekt() {
        let (_dir, refiner, _store) = setup(vec![Ok(chunk_response())]);
        let pdf = Arc::new(test_pdf::make_pdf(&["S-001 Windows Server"]));
        let outcome = refiner
            .extract_all(pdf, vec![chunk(1, 1)], &map(), false)
            .await
            .unwrap();
        assert_eq!(outcome.requirements.len(), 1);
        assert_eq!(outcome.requirements[0].zielobjekt_kuerzel, "S-001");
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn failed_chunk_yields_warning_not_error() {
        let (_dir, refiner, _store) = setup(vec![Err(AiError::Blocked("refused".into()))]);
        let pdf = Arc::new(test_pdf::make_pdf(&["S-001 Windows Server"]));
        let outcome = refiner
            .extract_all(pdf, vec![chunk(1, 1)], &map(), false)
            .await
            .unwrap();
        assert!(outcome.requirements.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("S-001"));
    }

    #[tokio::test]
    async fn cached_chunk_results_skip_the_model() {
        let (_dir, refiner, store) = setup(vec![Ok(chunk_response())]);
        let pdf = Arc::new(test_pdf::make_pdf(&["S-001 Windows Server"]));

        refiner
            .extract_all(Arc::clone(&pdf), vec![chunk(1, 1)], &map(), false)
            .await
            .unwrap();
        assert!(store
            .exists("output/results/intermediate/gs_individual/S-001_01.json")
            .unwrap());

        // Second refiner whose provider would fail: the cache must answer.
        let failing = Arc::new(ChunkRefiner::new(
            refiner.config.clone(),
            refiner.store.clone(),
            Arc::new(AiGateway::new(
                Arc::new(MockProvider::failing(AiError::Fatal("offline".into()))),
                2,
            )),
        ));
        let outcome = failing
            .extract_all(pdf, vec![chunk(1, 1)], &map(), false)
            .await
            .unwrap();
        assert_eq!(outcome.requirements.len(), 1);
    }

    #[tokio::test]
    async fn results_are_sorted_deterministically() {
        let first = json!({
            "anforderungen": [
                { "zielobjekt_kuerzel": "x", "anforderung_id": "SYS.1.1.A3", "titel": "B" },
                { "zielobjekt_kuerzel": "x", "anforderung_id": "SYS.1.1.A1", "titel": "A" }
            ]
        });
        let (_dir, refiner, _store) = setup(vec![Ok(first)]);
        let pdf = Arc::new(test_pdf::make_pdf(&["S-001 Windows Server"]));
        let outcome = refiner
            .extract_all(pdf, vec![chunk(1, 1)], &map(), false)
            .await
            .unwrap();
        assert_eq!(outcome.requirements[0].anforderung_id, "SYS.1.1.A1");
        assert_eq!(outcome.requirements[1].anforderung_id, "SYS.1.1.A3");
    }
}
