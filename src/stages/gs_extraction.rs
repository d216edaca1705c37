//! The Grundschutz-Check extraction stage: ground truth, header index,
//! chunking, per-chunk refinement and the final merge.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{StageContext, StageError, StageName, StageRunner};
use crate::gscheck::ground_truth::GroundTruthMapper;
use crate::gscheck::merge::{self, MergedArtifact};
use crate::gscheck::refiner::ChunkRefiner;
use crate::gscheck::{chunker, header_index};
use crate::models::DocumentCategory;
use crate::store::{paths, JsonStore, ObjectStore};

pub struct GsCheckExtractionRunner;

#[async_trait]
impl StageRunner for GsCheckExtractionRunner {
    fn name(&self) -> StageName {
        StageName::GsCheckExtraction
    }

    async fn run(&self, ctx: &StageContext, force: bool) -> Result<Value, StageError> {
        let mapper = GroundTruthMapper::new(ctx.config.clone(), ctx.store.clone());
        let system_map = mapper
            .build(&ctx.ai, &ctx.finder, &ctx.catalog, force)
            .await?;

        // Exact-category lookup: when classification fell back to
        // 'Sonstiges' there is no authoritative check document, and that
        // must fail here rather than extract from an unrelated file.
        let check_documents = ctx
            .finder
            .documents_in_category(DocumentCategory::GrundschutzCheck)
            .await?;
        let check_document = check_documents.first().ok_or_else(|| {
            StageError::Invalid("no document classified as 'Grundschutz-Check'".into())
        })?;
        if check_documents.len() > 1 {
            tracing::warn!(
                count = check_documents.len(),
                using = %check_document,
                "multiple Grundschutz-Check documents classified, using the first"
            );
        }

        let pdf_bytes = Arc::new(
            ctx.store
                .read_bytes(&ctx.finder.document_key(check_document))?,
        );
        let page_texts = header_index::extract_page_texts(&pdf_bytes)?;
        let spans = header_index::scan_headers(&page_texts, &system_map);
        let mut warnings = Vec::new();
        if spans.is_empty() {
            warnings.push(
                "Im Grundschutz-Check wurden keine Zielobjekt-Abschnitte erkannt.".to_string(),
            );
        }

        let spans = if ctx.config.test_mode && spans.len() > 3 {
            tracing::warn!(from = spans.len(), to = 3, "test mode: limiting sections");
            spans[..3].to_vec()
        } else {
            spans
        };

        let chunks = chunker::chunk_sections(&spans);
        tracing::info!(
            sections = spans.len(),
            chunks = chunks.len(),
            pages = page_texts.len(),
            "chunked check document"
        );

        let refiner = Arc::new(ChunkRefiner::new(
            ctx.config.clone(),
            ctx.store.clone(),
            ctx.ai.clone(),
        ));
        let outcome = refiner
            .extract_all(pdf_bytes, chunks, &system_map, force)
            .await?;
        warnings.extend(outcome.warnings);

        let merged_key = ctx.config.output_key(paths::EXTRACTED_CHECK_MERGED);
        let digest = merge::input_digest(&outcome.requirements);
        let existing: Option<MergedArtifact> = if ctx.store.exists(&merged_key)? {
            Some(ctx.store.read_json(&merged_key)?)
        } else {
            None
        };

        let requirement_count = match existing {
            Some(artifact) if !force && artifact.input_digest == digest => {
                tracing::info!("merged artifact up to date, skipping merge");
                artifact.anforderungen.len()
            }
            _ => {
                let merged = merge::merge_requirements(outcome.requirements);
                let count = merged.len();
                ctx.store.write_json(
                    &merged_key,
                    &MergedArtifact {
                        input_digest: digest,
                        anforderungen: merged,
                    },
                )?;
                tracing::info!(requirements = count, "saved merged requirement list");
                count
            }
        };

        Ok(json!({
            "status": "success",
            "zielobjekte": system_map.zielobjekte.len(),
            "sections": spans.len(),
            "requirements": requirement_count,
            "warnings": warnings,
        }))
    }
}
