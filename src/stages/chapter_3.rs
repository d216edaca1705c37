//! Chapter 3: document review.
//!
//! One task per subchapter from the prompt registry, each asking the
//! section's questions over the documents its categories resolve to.
//! Subchapter 3.6.1 consumes the extraction artifacts instead of raw
//! documents. Summary subchapters receive the findings of the earlier
//! tasks.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;

use super::{StageContext, StageError, StageName, StageRunner};
use crate::ai::GenerateRequest;
use crate::gscheck::analysis;
use crate::gscheck::merge::MergedArtifact;
use crate::models::{Finding, FindingCategory};
use crate::prompts;
use crate::store::{paths, JsonStore, ObjectStore};

pub struct Chapter3Runner;

#[async_trait]
impl StageRunner for Chapter3Runner {
    fn name(&self) -> StageName {
        StageName::Chapter3
    }

    fn prerequisites(&self) -> Vec<StageName> {
        vec![StageName::GsCheckExtraction]
    }

    async fn run(&self, ctx: &StageContext, _force: bool) -> Result<Value, StageError> {
        let mut aggregated = Map::new();

        // Document coverage: a missing critical category is a major
        // deviation recorded against the reference-document section.
        let coverage_finding = self.check_document_coverage(ctx).await?;

        // Question tasks run concurrently; each resolves its own
        // document set through the finder.
        let mut join_set: JoinSet<(String, Value)> = JoinSet::new();
        for task in prompts::chapter_3_tasks() {
            let ai = ctx.ai.clone();
            let finder = ctx.finder.clone();
            let key = task.key.to_string();
            join_set.spawn(async move {
                let value = process_question_task(&ai, &finder, &task).await;
                (key, value)
            });
        }
        while let Some(joined) = join_set.join_next().await {
            let (key, value) =
                joined.map_err(|e| StageError::Invalid(format!("chapter-3 task panicked: {e}")))?;
            aggregated.insert(key, value);
        }

        // 3.6.1: five-question analysis over the merged requirement list.
        let merged_key = ctx.config.output_key(paths::EXTRACTED_CHECK_MERGED);
        if !ctx.store.exists(&merged_key)? {
            return Err(StageError::MissingPrerequisite(
                "extracted_grundschutz_check_merged.json".into(),
            ));
        }
        let artifact: MergedArtifact = ctx.store.read_json(&merged_key)?;
        // Chunks that failed terminally during extraction surface as part
        // of the 3.6.1 finding.
        let extraction_result_key = ctx
            .config
            .stage_result_key(StageName::GsCheckExtraction.as_str());
        let structural_warnings: Vec<String> = if ctx.store.exists(&extraction_result_key)? {
            let result: Value = ctx.store.read_json(&extraction_result_key)?;
            result["warnings"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|w| w.as_str().map(str::to_string))
                .collect()
        } else {
            Vec::new()
        };
        let check_analysis = analysis::analyze(
            &ctx.config,
            &ctx.ai,
            &ctx.finder,
            &ctx.catalog,
            &artifact.anforderungen,
            ctx.run_date,
            &structural_warnings,
        )
        .await?;
        aggregated.insert(
            "detailsZumItGrundschutzCheck".to_string(),
            check_analysis.to_value(),
        );

        if coverage_finding.category != FindingCategory::OK {
            aggregated.insert(
                "aktualitaetDerReferenzdokumente".to_string(),
                json!({
                    "finding": {
                        "category": coverage_finding.category,
                        "description": coverage_finding.description,
                    }
                }),
            );
        }

        // Verdict over everything found so far.
        let findings_text = collect_findings_text(&aggregated);
        let summary_prompt = prompts::fill(
            prompts::CHAPTER_3_SUMMARY,
            &[
                ("summary_topic", "Gesamturteil der Dokumentenprüfung"),
                ("previous_findings", &findings_text),
            ],
        );
        let summary_request = GenerateRequest::new(
            summary_prompt,
            prompts::chapter_3_summary_schema(),
            "Chapter-3 Summary",
        );
        match ctx.ai.generate_structured(&summary_request).await {
            Ok(value) => {
                aggregated.insert("gesamturteil".to_string(), json!({ "content": value["verdict"] }));
            }
            Err(e) => {
                tracing::error!(error = %e, "chapter-3 summary generation failed");
                aggregated.insert("gesamturteil".to_string(), json!({ "error": e.to_string() }));
            }
        }

        Ok(Value::Object(aggregated))
    }
}

impl Chapter3Runner {
    async fn check_document_coverage(&self, ctx: &StageContext) -> Result<Finding, StageError> {
        let present = ctx.finder.present_categories().await?;
        let missing: Vec<&str> = prompts::CRITICAL_CATEGORIES
            .iter()
            .filter(|c| !present.contains(c))
            .map(|c| c.as_str())
            .collect();
        if missing.is_empty() {
            Ok(Finding::new(
                FindingCategory::OK,
                "Alle kritischen Dokumententypen sind vorhanden.",
            ))
        } else {
            tracing::warn!(missing = ?missing, "document coverage check failed");
            Ok(Finding::new(
                FindingCategory::AS,
                format!(
                    "Kritische Referenzdokumente fehlen: {}.",
                    missing.join(", ")
                ),
            ))
        }
    }
}

async fn process_question_task(
    ai: &crate::ai::AiGateway,
    finder: &crate::finder::DocumentFinder,
    task: &prompts::Chapter3Task,
) -> Value {
    let documents = match finder.documents_for_categories(task.categories).await {
        Ok(docs) => docs,
        Err(e) => return json!({ "error": e.to_string() }),
    };
    if documents.is_empty() {
        return json!({
            "error": format!(
                "no source documents for categories: {:?}",
                task.categories.iter().map(|c| c.as_str()).collect::<Vec<_>>()
            )
        });
    }

    let questions = task
        .questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {q}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = prompts::fill(prompts::CHAPTER_3_QUESTIONS, &[("questions", &questions)]);
    let attachments = documents.iter().map(|d| finder.document_key(d)).collect();
    let request = GenerateRequest::new(
        prompt,
        prompts::chapter_3_questions_schema(task.questions.len()),
        format!("Chapter-3: {}", task.key),
    )
    .with_attachments(attachments);

    match ai.generate_structured(&request).await {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(task = task.key, error = %e, "chapter-3 task failed");
            json!({ "error": e.to_string() })
        }
    }
}

/// Formats all non-OK findings of the aggregated results for the summary
/// prompt.
fn collect_findings_text(aggregated: &Map<String, Value>) -> String {
    let mut lines = Vec::new();
    for (key, value) in aggregated {
        if let Some(finding) = value.get("finding") {
            let category = finding["category"].as_str().unwrap_or("OK");
            if category != "OK" {
                lines.push(format!(
                    "- [{category}] {}: {}",
                    key,
                    finding["description"].as_str().unwrap_or_default()
                ));
            }
        }
    }
    if lines.is_empty() {
        "Keine Abweichungen festgestellt.".to_string()
    } else {
        lines.sort();
        lines.join("\n")
    }
}
