//! Chapter 5: the on-site audit checklist. Strictly deterministic.
//!
//! Combines the Chapter 4 plan, the control catalog and the merged
//! requirement list into per-control checklist rows pre-filled with the
//! customer's implementation status and explanation. Assessment columns
//! stay empty for the auditor.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{StageContext, StageError, StageName, StageRunner};
use crate::gscheck::merge::MergedArtifact;
use crate::models::Requirement;
use crate::store::{paths, JsonStore, ObjectStore};

pub struct Chapter5Runner;

const NO_CUSTOMER_DATA: &str =
    "Keine spezifische Angabe für dieses Zielobjekt im Grundschutz-Check gefunden.";

/// All plan sections that may carry Baustein selections, across audit
/// types.
const BAUSTEIN_SECTIONS: [&str; 3] = [
    "auswahlBausteineErstRezertifizierung",
    "auswahlBausteine1Ueberwachungsaudit",
    "auswahlBausteine2Ueberwachungsaudit",
];

#[async_trait]
impl StageRunner for Chapter5Runner {
    fn name(&self) -> StageName {
        StageName::Chapter5
    }

    fn prerequisites(&self) -> Vec<StageName> {
        vec![StageName::GsCheckExtraction, StageName::Chapter4]
    }

    async fn run(&self, ctx: &StageContext, _force: bool) -> Result<Value, StageError> {
        let plan_key = ctx.config.stage_result_key(StageName::Chapter4.as_str());
        if !ctx.store.exists(&plan_key)? {
            return Err(StageError::MissingPrerequisite("Chapter-4.json".into()));
        }
        let plan: Value = ctx.store.read_json(&plan_key)?;

        // Missing extraction data degrades the checklist but does not
        // block it.
        let merged_key = ctx.config.output_key(paths::EXTRACTED_CHECK_MERGED);
        let requirements: Vec<Requirement> = if ctx.store.exists(&merged_key)? {
            let artifact: MergedArtifact = ctx.store.read_json(&merged_key)?;
            artifact.anforderungen
        } else {
            tracing::warn!(
                "merged check data missing, checklist will carry no customer explanations"
            );
            Vec::new()
        };
        let lookup: BTreeMap<(String, String), &Requirement> = requirements
            .iter()
            .map(|r| ((r.anforderung_id.clone(), r.zielobjekt_kuerzel.clone()), r))
            .collect();

        let baustein_pruefungen = self.build_checklist(ctx, &plan, &lookup);
        let massnahmen_pruefungen = build_risk_checklist(&plan);

        Ok(json!({
            "verifikationDesITGrundschutzChecks": {
                "einzelergebnisse": { "bausteinPruefungen": baustein_pruefungen }
            },
            "risikoanalyse": {
                "einzelergebnisseDerRisikoanalyse": { "massnahmenPruefungen": massnahmen_pruefungen }
            },
        }))
    }
}

impl Chapter5Runner {
    fn build_checklist(
        &self,
        ctx: &StageContext,
        plan: &Value,
        lookup: &BTreeMap<(String, String), &Requirement>,
    ) -> Vec<Value> {
        let mut selected_rows: Vec<&Value> = Vec::new();
        for section in BAUSTEIN_SECTIONS {
            if let Some(rows) = plan[section]["table"]["rows"].as_array() {
                selected_rows.extend(rows.iter());
            }
        }
        if selected_rows.is_empty() {
            tracing::warn!("no bausteine in chapter-4 plan, checklist will be empty");
            return Vec::new();
        }

        let mut checklist = Vec::new();
        for row in selected_rows {
            let baustein_id = row["baustein"].as_str().unwrap_or_default();
            if baustein_id.is_empty() {
                continue;
            }
            let kuerzel = row["zielobjekt_kuerzel"].as_str().unwrap_or_default();

            let anforderungen: Vec<Value> = ctx
                .catalog
                .controls_for(baustein_id)
                .iter()
                .map(|control| {
                    let extracted = lookup.get(&(control.id.clone(), kuerzel.to_string()));
                    json!({
                        "nummer": control.id,
                        "anforderung": control.title,
                        "bewertung": extracted
                            .and_then(|r| r.umsetzungsstatus)
                            .map(|s| s.as_str())
                            .unwrap_or("N/A"),
                        "dokuAntragsteller": extracted
                            .map(|r| r.umsetzungserlaeuterung.as_str())
                            .filter(|e| !e.is_empty())
                            .unwrap_or(NO_CUSTOMER_DATA),
                        "pruefmethode": { "D": false, "I": false, "C": false, "S": false, "A": false, "B": false },
                        "auditfeststellung": "",
                        "abweichungen": "",
                    })
                })
                .collect();
            if anforderungen.is_empty() {
                tracing::warn!(baustein = baustein_id, "no catalog controls for baustein");
            }

            let title = ctx
                .catalog
                .baustein_title(baustein_id)
                .map(|t| format!("{baustein_id} {t}"))
                .unwrap_or_else(|| baustein_id.to_string());
            checklist.push(json!({
                "baustein": title,
                "bezogenAufZielobjekt": kuerzel,
                "auditiertAm": "",
                "auditor": "",
                "befragtWurde": "",
                "anforderungen": anforderungen,
            }));
        }
        checklist
    }
}

fn build_risk_checklist(plan: &Value) -> Vec<Value> {
    plan["auswahlMassnahmenAusRisikoanalyse"]["table"]["rows"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|measure| {
            json!({
                "massnahme": measure["massnahme"].as_str().unwrap_or("N/A"),
                "zielobjekt": measure["zielobjekt"].as_str().unwrap_or("N/A"),
                "bewertung": "",
                "pruefmethode": { "D": false, "I": false, "C": false, "S": false, "A": false, "B": false },
                "auditfeststellung": "",
                "abweichungen": "",
            })
        })
        .collect()
}
