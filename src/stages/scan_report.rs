//! Previous-report scanner: pulls structured data out of the prior audit
//! report so findings keep their IDs and chapters 1/4 gain context.
//!
//! Runs three extractions in parallel. When no previous report is
//! classified the stage emits a skipped marker instead of failing, so
//! resume logic stays uniform.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;

use super::{StageContext, StageError, StageName, StageRunner};
use crate::ai::GenerateRequest;
use crate::models::DocumentCategory;
use crate::prompts;

pub struct ScanReportRunner;

struct ScanTask {
    key: &'static str,
    prompt: &'static str,
    schema: Value,
}

fn scan_tasks() -> Vec<ScanTask> {
    vec![
        ScanTask {
            key: "chapter_1_data",
            prompt: prompts::SCAN_CHAPTER_1,
            schema: prompts::scan_chapter_1_schema(),
        },
        ScanTask {
            key: "chapter_4_context",
            prompt: prompts::SCAN_CHAPTER_4,
            schema: prompts::scan_chapter_4_schema(),
        },
        ScanTask {
            key: "chapter_7_findings",
            prompt: prompts::SCAN_CHAPTER_7,
            schema: prompts::scan_chapter_7_schema(),
        },
    ]
}

#[async_trait]
impl StageRunner for ScanReportRunner {
    fn name(&self) -> StageName {
        StageName::ScanReport
    }

    async fn run(&self, ctx: &StageContext, _force: bool) -> Result<Value, StageError> {
        if !ctx
            .finder
            .has_category(DocumentCategory::VorherigerAuditbericht)
            .await?
        {
            tracing::info!("no previous audit report classified, skipping scan");
            return Ok(json!({
                "status": "skipped",
                "reason": "no previous audit report found",
            }));
        }

        let documents = ctx
            .finder
            .documents_in_category(DocumentCategory::VorherigerAuditbericht)
            .await?;
        // Use the first report if several were classified.
        let report_key = ctx.finder.document_key(&documents[0]);
        tracing::info!(report = %documents[0], "scanning previous audit report");

        let mut join_set: JoinSet<(&'static str, Result<Value, crate::ai::AiError>)> =
            JoinSet::new();
        for task in scan_tasks() {
            let ai = ctx.ai.clone();
            let attachment = report_key.clone();
            join_set.spawn(async move {
                let request = GenerateRequest::new(
                    task.prompt,
                    task.schema,
                    format!("Scan-Report: {}", task.key),
                )
                .with_attachments(vec![attachment]);
                (task.key, ai.generate_structured(&request).await)
            });
        }

        let mut result = Map::new();
        while let Some(joined) = join_set.join_next().await {
            let (key, outcome) =
                joined.map_err(|e| StageError::Invalid(format!("scan task panicked: {e}")))?;
            match outcome {
                Ok(value) => {
                    // The chapter-7 task returns the findings list at its
                    // top level; lift it so the controller's ingest sees
                    // the conventional `all_findings` key.
                    if key == "chapter_7_findings" {
                        result.insert(
                            "all_findings".to_string(),
                            value.get("all_findings").cloned().unwrap_or(json!([])),
                        );
                    } else {
                        result.insert(key.to_string(), value);
                    }
                }
                Err(e) => {
                    tracing::error!(task = key, error = %e, "scan extraction failed");
                    result.insert(key.to_string(), json!({ "error": e.to_string() }));
                }
            }
        }

        result.insert("status".to_string(), json!("success"));
        Ok(Value::Object(result))
    }
}
