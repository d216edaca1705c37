//! Ground-truth mapper: builds the authoritative `SystemStructureMap`
//! from the Strukturanalyse and Modellierung documents.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use super::GsCheckError;
use crate::ai::{AiGateway, GenerateRequest};
use crate::catalog::ControlCatalog;
use crate::config::AppConfig;
use crate::finder::DocumentFinder;
use crate::models::{
    BausteinAssignment, DocumentCategory, SystemStructureMap, Zielobjekt, INFORMATIONSVERBUND,
};
use crate::prompts;
use crate::store::{paths, JsonStore, ObjectStore};

#[derive(Deserialize)]
struct ZielobjekteResponse {
    #[serde(default)]
    zielobjekte: Vec<Zielobjekt>,
}

#[derive(Deserialize)]
struct MappingsResponse {
    #[serde(default)]
    mappings: Vec<RawMapping>,
}

#[derive(Deserialize)]
struct RawMapping {
    baustein_id: String,
    zielobjekt_kuerzel: String,
}

pub struct GroundTruthMapper {
    config: Arc<AppConfig>,
    store: Arc<dyn ObjectStore>,
}

impl GroundTruthMapper {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn ObjectStore>) -> Self {
        Self { config, store }
    }

    /// Creates (or loads) the system structure map. Idempotent: an
    /// existing map is reused unless `force` is set.
    pub async fn build(
        &self,
        ai: &AiGateway,
        finder: &DocumentFinder,
        catalog: &ControlCatalog,
        force: bool,
    ) -> Result<SystemStructureMap, GsCheckError> {
        let map_key = self.config.output_key(paths::SYSTEM_STRUCTURE_MAP);
        if !force && self.store.exists(&map_key)? {
            tracing::info!(key = %map_key, "loading existing system structure map");
            let map: SystemStructureMap = self.store.read_json(&map_key)?;
            if map.zielobjekte.is_empty() {
                return Err(GsCheckError::InvalidData(
                    "stored system structure map has no Zielobjekte".into(),
                ));
            }
            return Ok(map);
        }

        tracing::info!("generating new system structure map");
        let zielobjekte = self.extract_zielobjekte(ai, finder).await?;
        let raw_mappings = self.extract_mappings(ai, finder).await?;
        let map = consolidate(zielobjekte, raw_mappings, catalog);

        self.store.write_json(&map_key, &map)?;
        tracing::info!(
            zielobjekte = map.zielobjekte.len(),
            assignments = map.baustein_assignments.len(),
            "saved system structure map"
        );
        Ok(map)
    }

    async fn extract_zielobjekte(
        &self,
        ai: &AiGateway,
        finder: &DocumentFinder,
    ) -> Result<Vec<Zielobjekt>, GsCheckError> {
        let documents = finder
            .documents_for_categories(&[DocumentCategory::Strukturanalyse])
            .await?;
        let mut merged: BTreeMap<String, String> = BTreeMap::new();

        for document in documents {
            let request = GenerateRequest::new(
                prompts::EXTRACT_ZIELOBJEKTE,
                prompts::zielobjekte_schema(),
                format!("GT: extract_zielobjekte ({document})"),
            )
            .with_attachments(vec![finder.document_key(&document)]);

            let value = ai.generate_structured(&request).await?;
            let parsed: ZielobjekteResponse = serde_json::from_value(value)
                .map_err(|e| GsCheckError::InvalidData(format!("zielobjekte response: {e}")))?;

            for z in parsed.zielobjekte {
                let kuerzel = z.kuerzel.trim().to_string();
                if kuerzel.is_empty() {
                    continue;
                }
                let name = z.name.trim().to_string();
                merged
                    .entry(kuerzel)
                    .and_modify(|existing| {
                        // Later occurrences refine: a longer non-empty name
                        // replaces a shorter one, never the other way around.
                        if name.len() > existing.len() {
                            *existing = name.clone();
                        }
                    })
                    .or_insert(name);
            }
        }

        Ok(merged
            .into_iter()
            .map(|(kuerzel, name)| Zielobjekt { kuerzel, name })
            .collect())
    }

    async fn extract_mappings(
        &self,
        ai: &AiGateway,
        finder: &DocumentFinder,
    ) -> Result<Vec<RawMapping>, GsCheckError> {
        let documents = finder
            .documents_for_categories(&[DocumentCategory::Modellierung])
            .await?;
        let mut mappings = Vec::new();

        for document in documents {
            let request = GenerateRequest::new(
                prompts::EXTRACT_BAUSTEIN_MAPPINGS,
                prompts::baustein_mappings_schema(),
                format!("GT: extract_baustein_mappings ({document})"),
            )
            .with_attachments(vec![finder.document_key(&document)]);

            let value = ai.generate_structured(&request).await?;
            let parsed: MappingsResponse = serde_json::from_value(value)
                .map_err(|e| GsCheckError::InvalidData(format!("mappings response: {e}")))?;
            mappings.extend(parsed.mappings);
        }
        Ok(mappings)
    }
}

/// Applies the deterministic rules and validates assignments against the
/// Zielobjekt set.
fn consolidate(
    mut zielobjekte: Vec<Zielobjekt>,
    raw_mappings: Vec<RawMapping>,
    catalog: &ControlCatalog,
) -> SystemStructureMap {
    if !zielobjekte.iter().any(|z| z.kuerzel == INFORMATIONSVERBUND) {
        zielobjekte.push(Zielobjekt {
            kuerzel: INFORMATIONSVERBUND.to_string(),
            name: "Gesamter Informationsverbund".to_string(),
        });
    }

    // Later Modellierung rows win for the same Baustein.
    let mut by_baustein: BTreeMap<String, String> = BTreeMap::new();
    for mapping in raw_mappings {
        by_baustein.insert(mapping.baustein_id, mapping.zielobjekt_kuerzel);
    }

    // Process-level bausteine are always modeled on the Informationsverbund,
    // whatever the Modellierung claims, and the catalog supplies them even
    // when the document omits them.
    for baustein_id in catalog.baustein_ids() {
        if SystemStructureMap::is_informationsverbund_baustein(baustein_id) {
            by_baustein.insert(baustein_id.to_string(), INFORMATIONSVERBUND.to_string());
        }
    }
    for (baustein_id, kuerzel) in by_baustein.iter_mut() {
        if SystemStructureMap::is_informationsverbund_baustein(baustein_id) {
            *kuerzel = INFORMATIONSVERBUND.to_string();
        }
    }

    let known: Vec<&str> = zielobjekte.iter().map(|z| z.kuerzel.as_str()).collect();
    let mut assignments = Vec::new();
    for (baustein_id, kuerzel) in by_baustein {
        if known.contains(&kuerzel.as_str()) {
            assignments.push(BausteinAssignment {
                baustein_id,
                kuerzel,
            });
        } else {
            tracing::warn!(
                baustein = %baustein_id,
                kuerzel = %kuerzel,
                "dropping baustein assignment to unknown Zielobjekt"
            );
        }
    }

    SystemStructureMap {
        zielobjekte,
        baustein_assignments: assignments,
    }
}
