//! Chapter 4: the audit plan.
//!
//! The Baustein selection is model-driven but hard-constrained: the full
//! system structure map is injected into the prompt, and every returned
//! `(baustein, kuerzel)` pair is validated against the map. Pairs the map
//! does not contain are dropped with a warning finding. For surveillance
//! audits the bausteine checked in the previous audit (recovered by the
//! report scan) are injected as well, so the selection can rotate away
//! from them. BSI count rules (certification: at least 6 bausteine;
//! surveillance: ISMS.1 plus at least 2 others) are checked
//! deterministically after validation.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{StageContext, StageError, StageName, StageRunner};
use crate::ai::GenerateRequest;
use crate::config::AuditType;
use crate::models::{DocumentCategory, SystemStructureMap};
use crate::prompts;
use crate::store::{paths, JsonStore, ObjectStore};

pub struct Chapter4Runner;

#[async_trait]
impl StageRunner for Chapter4Runner {
    fn name(&self) -> StageName {
        StageName::Chapter4
    }

    fn prerequisites(&self) -> Vec<StageName> {
        vec![StageName::GsCheckExtraction]
    }

    async fn run(&self, ctx: &StageContext, _force: bool) -> Result<Value, StageError> {
        let map_key = ctx.config.output_key(paths::SYSTEM_STRUCTURE_MAP);
        if !ctx.store.exists(&map_key)? {
            return Err(StageError::MissingPrerequisite(
                "system_structure_map.json".into(),
            ));
        }
        let system_map: SystemStructureMap = ctx.store.read_json(&map_key)?;

        let (section_key, prompt_template) = match ctx.config.audit_type {
            AuditType::Zertifizierung => (
                "auswahlBausteineErstRezertifizierung",
                prompts::CHAPTER_4_CERT,
            ),
            AuditType::Ueberwachung1 => (
                "auswahlBausteine1Ueberwachungsaudit",
                prompts::CHAPTER_4_SURV_1,
            ),
            AuditType::Ueberwachung2 => (
                "auswahlBausteine2Ueberwachungsaudit",
                prompts::CHAPTER_4_SURV_2,
            ),
        };

        let map_text = render_system_map(&system_map);
        let previous_plan = self.previously_checked_bausteine(ctx)?;
        let prompt = prompts::fill(
            prompt_template,
            &[
                ("system_map", &map_text),
                ("previous_plan", &previous_plan),
            ],
        );
        let request = GenerateRequest::new(
            prompt,
            prompts::chapter_4_bausteine_schema(),
            format!("Chapter-4: {section_key}"),
        );
        let raw = ctx.ai.generate_structured(&request).await?;

        let (rows, dropped) = validate_rows(&raw, &system_map);
        let mut result = json!({
            section_key: { "table": { "rows": rows } },
            // Site selection is deterministic: a single-site audit always
            // covers the main location.
            "auswahlStandorte": {
                "table": {
                    "rows": [{
                        "standort": "Hauptstandort",
                        "begruendung": "Zentraler Standort mit kritischer Infrastruktur.",
                    }]
                }
            },
        });

        if dropped > 0 {
            result["finding"] = json!({
                "category": "E",
                "description": format!(
                    "{dropped} vorgeschlagene Baustein-Zuordnungen waren nicht Teil der \
                     Systemstruktur und wurden aus dem Prüfplan entfernt."
                ),
            });
        }
        if let Some(violation) = check_selection_rules(
            ctx.config.audit_type,
            result[section_key]["table"]["rows"]
                .as_array()
                .map(Vec::len)
                .unwrap_or(0),
            &result[section_key]["table"]["rows"],
        ) {
            tracing::warn!(rule = %violation, "baustein selection violates audit-type rules");
            result["rule_warning"] = json!(violation);
        }

        // Risk-analysis measure selection (4.1.5) with the Risikoanalyse
        // attached; an empty table is acceptable when the document set
        // has none. Exact lookup: the empty branch means "no risk
        // analysis submitted" and must not be masked by the finder's
        // fallback to all documents.
        let risk_documents = ctx
            .finder
            .documents_in_category(DocumentCategory::Risikoanalyse)
            .await?;
        let risk_rows = if risk_documents.is_empty() {
            json!({ "rows": [] })
        } else {
            let attachments = risk_documents
                .iter()
                .map(|d| ctx.finder.document_key(d))
                .collect();
            let request = GenerateRequest::new(
                prompts::CHAPTER_4_RISK_MEASURES,
                prompts::chapter_4_risk_measures_schema(),
                "Chapter-4: auswahlMassnahmenAusRisikoanalyse",
            )
            .with_attachments(attachments);
            match ctx.ai.generate_structured(&request).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!(error = %e, "risk measure selection failed");
                    json!({ "rows": [] })
                }
            }
        };
        result["auswahlMassnahmenAusRisikoanalyse"] = json!({ "table": risk_rows });

        Ok(result)
    }
}

const NO_PREVIOUS_PLAN: &str = "Keine Angaben aus einem vorherigen Auditbericht vorhanden.";

impl Chapter4Runner {
    /// Bausteine checked in the previous audit, from the report scan
    /// result. Without a scan (or an empty one) the prompts state so
    /// explicitly.
    fn previously_checked_bausteine(&self, ctx: &StageContext) -> Result<String, StageError> {
        let scan_key = ctx.config.stage_result_key(StageName::ScanReport.as_str());
        if !ctx.store.exists(&scan_key)? {
            return Ok(NO_PREVIOUS_PLAN.to_string());
        }
        let scan: Value = ctx.store.read_json(&scan_key)?;
        Ok(render_previous_plan(&scan).unwrap_or_else(|| NO_PREVIOUS_PLAN.to_string()))
    }
}

/// Formats the scanned `chapter_4_context` bausteine as prompt lines.
/// `None` when the scan carries no usable rows.
fn render_previous_plan(scan: &Value) -> Option<String> {
    let lines: Vec<String> = scan["chapter_4_context"]["gepruefte_bausteine"]
        .as_array()?
        .iter()
        .filter_map(|row| {
            let baustein = row["baustein"].as_str()?;
            Some(format!(
                "- {baustein} ({})",
                row["zielobjekt"].as_str().unwrap_or("-")
            ))
        })
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Serializes the map compactly for prompt injection.
fn render_system_map(map: &SystemStructureMap) -> String {
    let mut lines = vec!["Zielobjekte:".to_string()];
    for z in &map.zielobjekte {
        lines.push(format!("- {} ({})", z.kuerzel, z.name));
    }
    lines.push("Baustein-Zuordnungen:".to_string());
    for a in &map.baustein_assignments {
        lines.push(format!("- {} -> {}", a.baustein_id, a.kuerzel));
    }
    lines.join("\n")
}

/// Keeps only rows whose `(baustein, kuerzel)` pair exists in the map.
/// Returns the surviving rows and the number dropped.
fn validate_rows(raw: &Value, map: &SystemStructureMap) -> (Vec<Value>, usize) {
    let mut rows = Vec::new();
    let mut dropped = 0;
    for row in raw["rows"].as_array().into_iter().flatten() {
        let baustein = row["baustein"].as_str().unwrap_or_default();
        // Tolerate "SYS.1.1 Allgemeiner Server" style answers.
        let baustein_id = baustein.split_whitespace().next().unwrap_or_default();
        let kuerzel = row["zielobjekt_kuerzel"].as_str().unwrap_or_default();
        if map.has_pair(baustein_id, kuerzel) {
            let mut cleaned = row.clone();
            cleaned["baustein"] = json!(baustein_id);
            rows.push(cleaned);
        } else {
            tracing::warn!(
                baustein = baustein_id,
                kuerzel = kuerzel,
                "dropping baustein selection not present in system structure map"
            );
            dropped += 1;
        }
    }
    (rows, dropped)
}

/// Deterministic BSI selection rules per audit type. Returns a violation
/// message or `None`.
fn check_selection_rules(audit_type: AuditType, count: usize, rows: &Value) -> Option<String> {
    match audit_type {
        AuditType::Zertifizierung => (count < 6).then(|| {
            format!("Erst-/Rezertifizierung erfordert mindestens 6 Bausteine, ausgewählt: {count}")
        }),
        AuditType::Ueberwachung1 | AuditType::Ueberwachung2 => {
            let has_isms = rows
                .as_array()
                .into_iter()
                .flatten()
                .any(|r| r["baustein"].as_str().unwrap_or_default() == "ISMS.1");
            if !has_isms {
                Some("Überwachungsaudit erfordert den Baustein ISMS.1".to_string())
            } else if count < 3 {
                Some(format!(
                    "Überwachungsaudit erfordert ISMS.1 plus mindestens 2 weitere Bausteine, \
                     ausgewählt: {count}"
                ))
            } else {
                None
            }
        }
    }
}
