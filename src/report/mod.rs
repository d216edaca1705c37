//! Deterministic report assembly.
//!
//! Merges every chapter result and the central findings file into a
//! populated copy of the report blueprint. No model calls, no document
//! lookups: whatever the stages produced is what the report shows.
//! Missing blueprint slots are logged and skipped, never fatal.

pub mod blueprint;

use serde_json::{json, Value};
use thiserror::Error;

use crate::config::AppConfig;
use crate::models::{Finding, FindingCategory};
use crate::stages::StageName;
use crate::store::{paths, JsonStore, ObjectStore, StoreError};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("blueprint is malformed: {0}")]
    Blueprint(String),
}

/// The chapter stages whose results feed the report.
const STAGES_TO_AGGREGATE: [StageName; 5] = [
    StageName::Chapter1,
    StageName::Chapter3,
    StageName::Chapter4,
    StageName::Chapter5,
    StageName::Chapter7,
];

pub struct ReportAssembler<'a> {
    config: &'a AppConfig,
    store: &'a dyn ObjectStore,
}

impl<'a> ReportAssembler<'a> {
    pub fn new(config: &'a AppConfig, store: &'a dyn ObjectStore) -> Self {
        Self { config, store }
    }

    /// Assembles and persists the final report. Stages without results
    /// leave their sections as blueprint placeholders.
    pub fn assemble(&self) -> Result<Value, ReportError> {
        let mut report = blueprint::load()?;
        blueprint::set_string(
            &mut report,
            &["bsiAuditReport", "allgemeines", "audittyp", "content"],
            self.config.audit_type.as_str(),
        );

        for stage in STAGES_TO_AGGREGATE {
            let result_key = self.config.stage_result_key(stage.as_str());
            if !self.store.exists(&result_key)? {
                tracing::warn!(stage = %stage, "no result for stage, section stays placeholder");
                continue;
            }
            let result: Value = self.store.read_json(&result_key)?;
            match stage {
                StageName::Chapter1 => populate_chapter_1(&mut report, &result),
                StageName::Chapter3 => populate_chapter_3(&mut report, &result),
                StageName::Chapter4 => populate_chapter_4(&mut report, &result),
                StageName::Chapter5 => populate_chapter_5(&mut report, &result),
                StageName::Chapter7 => populate_chapter_7(&mut report, &result),
                _ => {}
            }
        }

        self.populate_findings(&mut report)?;

        let report_key = self.config.output_key(paths::FINAL_REPORT);
        self.store.write_json(&report_key, &report)?;
        tracing::info!(key = %report_key, "final report assembled");
        Ok(report)
    }

    /// Fills the three 7.2 tables from the findings ledger, ordered by
    /// numeric ID within each category.
    fn populate_findings(&self, report: &mut Value) -> Result<(), ReportError> {
        let findings_key = self.config.output_key(paths::ALL_FINDINGS);
        let mut findings: Vec<Finding> = if self.store.exists(&findings_key)? {
            self.store.read_json(&findings_key)?
        } else {
            tracing::warn!("central findings file not found, 7.2 stays empty");
            return Ok(());
        };

        findings.sort_by_key(|f| {
            f.id.as_deref()
                .and_then(Finding::parse_id)
                .map(|(_, n)| n)
                .unwrap_or(u32::MAX)
        });

        for (category, slot) in [
            (FindingCategory::AG, "geringfuegigeAbweichungen"),
            (FindingCategory::AS, "schwerwiegendeAbweichungen"),
            (FindingCategory::E, "empfehlungen"),
        ] {
            let rows: Vec<Value> = findings
                .iter()
                .filter(|f| f.category == category)
                .map(|f| {
                    json!({
                        "nr": f.id,
                        "beschreibung": f.description,
                        "quelle": f.source_chapter,
                    })
                })
                .collect();
            blueprint::set_rows(
                report,
                &[
                    "bsiAuditReport",
                    "anhang",
                    "abweichungenUndEmpfehlungen",
                    slot,
                    "table",
                ],
                rows,
            );
        }
        Ok(())
    }
}

fn populate_chapter_1(report: &mut Value, result: &Value) {
    let Some(sections) = result.as_object() else {
        tracing::warn!("chapter-1 result is not an object");
        return;
    };
    for (key, value) in sections {
        let Some(content) = value.get("content") else {
            continue;
        };
        blueprint::set_value(
            report,
            &["bsiAuditReport", "allgemeines", key, "content"],
            content.clone(),
        );
    }
}

fn populate_chapter_3(report: &mut Value, result: &Value) {
    let Some(sections) = result.as_object() else {
        tracing::warn!("chapter-3 result is not an object");
        return;
    };
    for (key, value) in sections {
        if key == "gesamturteil" {
            if let Some(content) = value.get("content") {
                blueprint::set_value(
                    report,
                    &["bsiAuditReport", "dokumentenpruefung", "gesamturteil", "content"],
                    content.clone(),
                );
            }
            continue;
        }

        // 3.2.1 lives one level deeper than its siblings.
        let path: Vec<&str> = if key == "definitionDesInformationsverbundes" {
            vec![
                "bsiAuditReport",
                "dokumentenpruefung",
                "strukturanalyseA1",
                key,
            ]
        } else {
            vec!["bsiAuditReport", "dokumentenpruefung", key]
        };
        let Some(target) = blueprint::get_path_mut(report, &path) else {
            tracing::warn!(section = key, "no blueprint slot for chapter-3 section");
            continue;
        };
        populate_section(target, value);
    }
}

/// Writes a section's answers into its question slots (in order) and the
/// finding text into the finding slot.
fn populate_section(target: &mut Value, result: &Value) {
    let Some(content) = target.get_mut("content").and_then(Value::as_array_mut) else {
        return;
    };

    if let Some(finding) = result.get("finding") {
        let text = format!(
            "[{}] {}",
            finding["category"].as_str().unwrap_or("OK"),
            finding["description"].as_str().unwrap_or_default()
        );
        for item in content.iter_mut() {
            if item["type"] == "finding" {
                item["findingText"] = json!(text);
                break;
            }
        }
    }

    let answers = result["answers"].as_array().cloned().unwrap_or_default();
    let mut answer_index = 0;
    for item in content.iter_mut() {
        if item["type"] == "question" {
            match answers.get(answer_index) {
                Some(answer) => item["answer"] = answer.clone(),
                None => {
                    if !answers.is_empty() {
                        tracing::warn!("fewer answers than questions in section result");
                    }
                    break;
                }
            }
            answer_index += 1;
        }
    }
}

fn populate_chapter_4(report: &mut Value, result: &Value) {
    let Some(sections) = result.as_object() else {
        return;
    };
    for (key, value) in sections {
        let Some(rows) = value["table"]["rows"].as_array() else {
            continue;
        };
        blueprint::set_rows(
            report,
            &[
                "bsiAuditReport",
                "erstellungEinesPruefplans",
                "auditplanung",
                key,
                "table",
            ],
            rows.clone(),
        );
    }
}

fn populate_chapter_5(report: &mut Value, result: &Value) {
    if let Some(pruefungen) =
        result["verifikationDesITGrundschutzChecks"]["einzelergebnisse"]["bausteinPruefungen"]
            .as_array()
    {
        blueprint::set_value(
            report,
            &[
                "bsiAuditReport",
                "vorOrtAudit",
                "verifikationDesITGrundschutzChecks",
                "einzelergebnisse",
                "bausteinPruefungen",
            ],
            json!(pruefungen),
        );
    }
    if let Some(massnahmen) =
        result["risikoanalyse"]["einzelergebnisseDerRisikoanalyse"]["massnahmenPruefungen"]
            .as_array()
    {
        blueprint::set_value(
            report,
            &[
                "bsiAuditReport",
                "vorOrtAudit",
                "risikoanalyse",
                "einzelergebnisseDerRisikoanalyse",
                "massnahmenPruefungen",
            ],
            json!(massnahmen),
        );
    }
}

fn populate_chapter_7(report: &mut Value, result: &Value) {
    if let Some(rows) = result["referenzdokumente"]["table"]["rows"].as_array() {
        blueprint::set_rows(
            report,
            &["bsiAuditReport", "anhang", "referenzdokumente", "table"],
            rows.clone(),
        );
    }
}
