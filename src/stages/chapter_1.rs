//! Chapter 1: introductory report content.
//!
//! Automated subchapters are generated in one call. The audit team is
//! carried over from the previous-report scan when one ran; subchapters
//! the auditor fills by hand are emitted as placeholders.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{StageContext, StageError, StageName, StageRunner};
use crate::ai::GenerateRequest;
use crate::prompts;
use crate::store::{JsonStore, ObjectStore};

pub struct Chapter1Runner;

const MANUAL_PLACEHOLDER: &str = "Wird vom Auditor manuell ergänzt.";

#[async_trait]
impl StageRunner for Chapter1Runner {
    fn name(&self) -> StageName {
        StageName::Chapter1
    }

    async fn run(&self, ctx: &StageContext, _force: bool) -> Result<Value, StageError> {
        let language_note = match &ctx.config.output_language {
            Some(language) => format!(" Verfasse die Texte auf {language}."),
            None => String::new(),
        };
        let prompt = prompts::fill(
            prompts::CHAPTER_1,
            &[
                ("audit_type", ctx.config.audit_type.as_str()),
                ("language_note", &language_note),
            ],
        );
        let request = GenerateRequest::new(prompt, prompts::chapter_1_schema(), "Chapter-1");
        let generated = ctx.ai.generate_structured(&request).await?;

        // The previous report's audit team pre-fills 1.5; without a scan
        // the slot stays manual.
        let auditteam = match scanned_auditteam(ctx)? {
            Some(team) => json!({ "content": team }),
            None => json!({ "content": MANUAL_PLACEHOLDER, "manual": true }),
        };

        Ok(json!({
            "audittyp": { "content": ctx.config.audit_type.as_str() },
            "auditgrundlage": { "content": generated["auditgrundlage"] },
            "geltungsbereich": { "content": generated["geltungsbereich"] },
            "auditverfahren": { "content": generated["auditverfahren"] },
            "auditteam": auditteam,
            // Contact data is collected during the on-site audit.
            "ansprechpartner": { "content": MANUAL_PLACEHOLDER, "manual": true },
        }))
    }
}

/// Audit team extracted by the previous-report scan, if that stage ran
/// and found one.
fn scanned_auditteam(ctx: &StageContext) -> Result<Option<String>, StageError> {
    let scan_key = ctx.config.stage_result_key(StageName::ScanReport.as_str());
    if !ctx.store.exists(&scan_key)? {
        return Ok(None);
    }
    let scan: Value = ctx.store.read_json(&scan_key)?;
    Ok(scan["chapter_1_data"]["auditteam"]
        .as_str()
        .map(str::trim)
        .filter(|team| !team.is_empty())
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ai::provider::mock::MockProvider;
    use crate::ai::AiGateway;
    use crate::catalog::ControlCatalog;
    use crate::config::test_support::test_config;
    use crate::finder::DocumentFinder;
    use crate::models::DocumentMap;
    use crate::store::{paths, JsonStore, LocalStore};

    async fn context(dir: &tempfile::TempDir) -> StageContext {
        let config = Arc::new(test_config(dir.path().to_str().unwrap()));
        let store = Arc::new(LocalStore::new(dir.path()));
        store
            .write_json(
                &config.output_key(paths::DOCUMENT_MAP),
                &DocumentMap::new(vec![]),
            )
            .unwrap();
        let finder = Arc::new(DocumentFinder::new(config.clone(), store.clone()));
        finder
            .ensure_initialized(&AiGateway::new(Arc::new(MockProvider::always(json!({}))), 1))
            .await
            .unwrap();

        let response = json!({
            "auditgrundlage": "BSI-Standards 200-1 bis 200-3.",
            "geltungsbereich": "Gesamter Informationsverbund.",
            "auditverfahren": "Dokumentenprüfung und Vor-Ort-Audit.",
        });
        StageContext {
            config,
            store,
            ai: Arc::new(AiGateway::new(Arc::new(MockProvider::always(response)), 2)),
            finder,
            catalog: Arc::new(ControlCatalog::load().unwrap()),
            run_date: chrono::NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn generates_automated_and_placeholder_sections() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir).await;

        let result = Chapter1Runner.run(&ctx, false).await.unwrap();
        assert_eq!(result["audittyp"]["content"], "Zertifizierungsaudit");
        assert_eq!(
            result["auditgrundlage"]["content"],
            "BSI-Standards 200-1 bis 200-3."
        );
        // No previous-report scan ran: the audit team stays manual.
        assert_eq!(result["auditteam"]["manual"], true);
        assert_eq!(result["auditteam"]["content"], MANUAL_PLACEHOLDER);
    }

    #[tokio::test]
    async fn audit_team_is_taken_from_previous_report_scan() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir).await;
        ctx.store
            .write_json(
                &ctx.config.stage_result_key(StageName::ScanReport.as_str()),
                &json!({
                    "status": "success",
                    "chapter_1_data": {
                        "institution": "Beispiel GmbH",
                        "audittyp": "Zertifizierungsaudit",
                        "auditteam": "Dr. Weber (Lead), M. Schulz",
                    }
                }),
            )
            .unwrap();

        let result = Chapter1Runner.run(&ctx, false).await.unwrap();
        assert_eq!(
            result["auditteam"]["content"],
            "Dr. Weber (Lead), M. Schulz"
        );
        assert!(result["auditteam"]["manual"].is_null());
    }

    #[tokio::test]
    async fn blank_scanned_team_keeps_the_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir).await;
        ctx.store
            .write_json(
                &ctx.config.stage_result_key(StageName::ScanReport.as_str()),
                &json!({ "status": "skipped", "chapter_1_data": { "auditteam": "  " } }),
            )
            .unwrap();

        let result = Chapter1Runner.run(&ctx, false).await.unwrap();
        assert_eq!(result["auditteam"]["content"], MANUAL_PLACEHOLDER);
        assert_eq!(result["auditteam"]["manual"], true);
    }
}
