//! Audit controller: stage orchestration and the central findings ledger.
//!
//! Stages execute in dependency order. Completed stages are skipped on
//! resume unless forced; a failed stage is recorded and independent
//! stages keep running. After every stage the controller harvests the
//! embedded `finding` objects, assigns sequential IDs per category
//! (respecting IDs preserved from a scanned previous report), collapses
//! duplicates and persists the ledger.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Finding, FindingCategory};
use crate::stages::{StageContext, StageError, StageName, StageRunner};
use crate::store::{paths, JsonStore, ObjectStore, StoreError};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("missing prerequisite '{prerequisite}' for stage '{stage}'")]
    MissingPrerequisite { stage: String, prerequisite: String },

    #[error("stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Skipped,
    Failed,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: String,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub stages: Vec<StageOutcome>,
}

impl RunSummary {
    pub fn any_failed(&self) -> bool {
        self.stages.iter().any(|s| s.status == StageStatus::Failed)
    }
}

pub struct AuditController {
    ctx: StageContext,
    runners: Vec<Box<dyn StageRunner>>,
}

impl AuditController {
    pub fn new(ctx: StageContext, runners: Vec<Box<dyn StageRunner>>) -> Self {
        Self { ctx, runners }
    }

    fn runner_for(&self, name: StageName) -> Option<&dyn StageRunner> {
        self.runners
            .iter()
            .find(|r| r.name() == name)
            .map(|r| r.as_ref())
    }

    /// Runs every stage in dependency order. Stages with existing output
    /// are skipped unless `force`. A failure never stops independent
    /// stages; dependents are blocked with a clear message.
    pub async fn run_all(&self, force: bool) -> Result<RunSummary, ControllerError> {
        let started_at = Utc::now().to_rfc3339();
        let mut outcomes = Vec::new();
        let mut failed: Vec<StageName> = Vec::new();

        for stage in StageName::all_in_order() {
            let runner = match self.runner_for(*stage) {
                Some(r) => r,
                None => continue,
            };

            // A failed or blocked prerequisite blocks the dependent stage.
            let blocking: Vec<StageName> = runner
                .prerequisites()
                .into_iter()
                .filter(|p| failed.contains(p))
                .collect();
            if !blocking.is_empty() {
                let detail = format!(
                    "prerequisite stage(s) failed: {}",
                    blocking
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                tracing::warn!(stage = %stage, %detail, "skipping blocked stage");
                outcomes.push(StageOutcome {
                    stage: stage.as_str().to_string(),
                    status: StageStatus::Blocked,
                    detail: Some(detail),
                });
                failed.push(*stage);
                continue;
            }

            match self.execute_stage(runner, force).await {
                Ok(skipped) => outcomes.push(StageOutcome {
                    stage: stage.as_str().to_string(),
                    status: if skipped {
                        StageStatus::Skipped
                    } else {
                        StageStatus::Completed
                    },
                    detail: None,
                }),
                Err(e) => {
                    tracing::error!(stage = %stage, error = %e, "stage failed");
                    outcomes.push(StageOutcome {
                        stage: stage.as_str().to_string(),
                        status: StageStatus::Failed,
                        detail: Some(e.to_string()),
                    });
                    failed.push(*stage);
                }
            }
        }

        let summary = RunSummary {
            run_id: Uuid::new_v4().to_string(),
            started_at,
            finished_at: Utc::now().to_rfc3339(),
            stages: outcomes,
        };
        self.ctx
            .store
            .write_json(&self.ctx.config.output_key(paths::RUN_SUMMARY), &summary)?;
        Ok(summary)
    }

    /// Runs exactly one stage, overwriting its output. Prerequisite
    /// outputs must already exist.
    pub async fn run_stage(&self, name: &str) -> Result<(), ControllerError> {
        let stage =
            StageName::from_str(name).ok_or_else(|| ControllerError::UnknownStage(name.into()))?;
        let runner = self
            .runner_for(stage)
            .ok_or_else(|| ControllerError::UnknownStage(name.into()))?;

        for prerequisite in runner.prerequisites() {
            if !prerequisite.output_exists(&self.ctx)? {
                return Err(ControllerError::MissingPrerequisite {
                    stage: stage.as_str().to_string(),
                    prerequisite: prerequisite.as_str().to_string(),
                });
            }
        }

        if let Err(e) = self.execute_stage_inner(runner, true).await {
            tracing::error!(stage = %stage, error = %e, "stage failed");
            return Err(ControllerError::StageFailed {
                stage: stage.as_str().to_string(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Executes one stage with resume semantics. Returns `true` when the
    /// existing output was reused.
    async fn execute_stage(
        &self,
        runner: &dyn StageRunner,
        force: bool,
    ) -> Result<bool, StageError> {
        let stage = runner.name();
        if !force && stage.output_exists(&self.ctx)? {
            tracing::info!(stage = %stage, "stage already completed, skipping generation");
            // Findings of a skipped stage still flow into the ledger so a
            // partially re-run pipeline keeps a complete findings file.
            let result_key = self.ctx.config.stage_result_key(stage.as_str());
            if self.ctx.store.exists(&result_key)? {
                let result: Value = self.ctx.store.read_json(&result_key)?;
                self.ingest_findings(stage, &result)?;
            }
            return Ok(true);
        }

        self.execute_stage_inner(runner, force).await?;
        Ok(false)
    }

    async fn execute_stage_inner(
        &self,
        runner: &dyn StageRunner,
        force: bool,
    ) -> Result<(), StageError> {
        let stage = runner.name();
        tracing::info!(stage = %stage, "running stage");
        let result = runner.run(&self.ctx, force).await?;

        self.ctx
            .store
            .write_json(&self.ctx.config.stage_result_key(stage.as_str()), &result)?;
        tracing::info!(stage = %stage, "saved stage result");

        self.ingest_findings(stage, &result)?;
        Ok(())
    }

    // ── Findings ledger ──────────────────────────────────────

    /// Loads the ledger, replaces this stage's findings with the ones in
    /// `result`, reassigns IDs and persists.
    fn ingest_findings(&self, stage: StageName, result: &Value) -> Result<(), StoreError> {
        let findings_key = self.ctx.config.output_key(paths::ALL_FINDINGS);
        let mut ledger: Vec<Finding> = if self.ctx.store.exists(&findings_key)? {
            self.ctx.store.read_json(&findings_key).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "could not parse findings file, starting empty");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        // Drop whatever this stage contributed in an earlier run.
        if stage == StageName::ScanReport {
            ledger.retain(|f| !f.source_chapter.starts_with("Previous Audit"));
        } else {
            ledger.retain(|f| f.source_chapter != stage.source_ref());
        }

        let mut fresh = extract_stage_findings(stage, result);
        if fresh.is_empty() && ledger.is_empty() {
            return Ok(());
        }

        // Preserved IDs first, then the survivors of earlier stages, then
        // the new ones; the counters see every existing ID before fresh
        // findings get theirs.
        let mut combined = Vec::new();
        combined.append(&mut ledger);
        combined.append(&mut fresh);
        let assigned = assign_finding_ids(combined);
        let mut deduped = dedupe_findings(assigned);

        // Stable persisted order: re-running a completed pipeline must
        // reproduce the file byte for byte.
        deduped.sort_by(|a, b| {
            let key = |f: &Finding| {
                (
                    f.category.as_str(),
                    f.id.as_deref()
                        .and_then(Finding::parse_id)
                        .map(|(_, n)| n)
                        .unwrap_or(u32::MAX),
                )
            };
            key(a).cmp(&key(b))
        });

        self.ctx.store.write_json(&findings_key, &deduped)?;
        tracing::info!(count = deduped.len(), "saved findings ledger");
        Ok(())
    }
}

/// Pulls the findings a stage result carries. The previous-report scan
/// contributes its `all_findings` list with preserved IDs; every other
/// stage is searched recursively for embedded `finding` objects.
fn extract_stage_findings(stage: StageName, result: &Value) -> Vec<Finding> {
    match stage {
        StageName::ScanReport => previous_report_findings(result),
        StageName::GsCheckExtraction => Vec::new(),
        _ => {
            let mut found = Vec::new();
            harvest_recursive(result, stage.source_ref(), &mut found);
            found
        }
    }
}

fn previous_report_findings(result: &Value) -> Vec<Finding> {
    let mut findings = Vec::new();
    for entry in result["all_findings"].as_array().into_iter().flatten() {
        let id = entry["nummer"].as_str().unwrap_or_default();
        let Some(category) = entry["category"].as_str().and_then(FindingCategory::from_str)
        else {
            continue;
        };
        if id.is_empty() || Finding::parse_id(id).is_none() {
            tracing::warn!(id, "ignoring previous finding without parseable ID");
            continue;
        }
        findings.push(Finding {
            id: Some(id.to_string()),
            category,
            description: entry["beschreibung"]
                .as_str()
                .unwrap_or("Keine Beschreibung vorhanden.")
                .to_string(),
            source_chapter: "Previous Audit".to_string(),
            status: entry["status"].as_str().map(str::to_string),
        });
    }
    findings
}

fn harvest_recursive(value: &Value, source_ref: &str, out: &mut Vec<Finding>) {
    match value {
        Value::Object(map) => {
            if let Some(finding) = map.get("finding") {
                if let Some(category) = finding["category"]
                    .as_str()
                    .and_then(FindingCategory::from_str)
                {
                    if category != FindingCategory::OK {
                        out.push(Finding {
                            id: None,
                            category,
                            description: finding["description"]
                                .as_str()
                                .unwrap_or_default()
                                .to_string(),
                            source_chapter: source_ref.to_string(),
                            status: None,
                        });
                    }
                }
            }
            for child in map.values() {
                harvest_recursive(child, source_ref, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                harvest_recursive(item, source_ref, out);
            }
        }
        _ => {}
    }
}

/// Assigns `«CAT»-«NN»` IDs to findings that have none, continuing after
/// the highest existing number per category.
pub fn assign_finding_ids(findings: Vec<Finding>) -> Vec<Finding> {
    let mut counters: BTreeMap<FindingCategory, u32> = BTreeMap::new();
    for finding in &findings {
        if let Some((category, number)) = finding.id.as_deref().and_then(Finding::parse_id) {
            let counter = counters.entry(category).or_default();
            *counter = (*counter).max(number);
        }
    }

    findings
        .into_iter()
        .map(|mut finding| {
            if finding.id.is_none() {
                let counter = counters.entry(finding.category).or_default();
                *counter += 1;
                finding.id = Some(format!("{}-{:02}", finding.category.as_str(), counter));
            }
            finding
        })
        .collect()
}

/// Collapses findings that agree on category and normalized description.
/// The first occurrence (earliest stage, preserved IDs first) wins.
pub fn dedupe_findings(findings: Vec<Finding>) -> Vec<Finding> {
    let mut seen: Vec<(FindingCategory, String)> = Vec::new();
    let mut out = Vec::new();
    for finding in findings {
        let key = (finding.category, finding.normalized_description());
        if seen.contains(&key) {
            tracing::info!(
                id = finding.id.as_deref().unwrap_or("-"),
                "collapsing duplicate finding"
            );
            continue;
        }
        seen.push(key);
        out.push(finding);
    }
    out
}
