//! BSI Grundschutz control catalog.
//!
//! Parses the embedded catalog extract (layers → bausteine → controls,
//! each control carrying a `level` property) into lookup maps. Level 1
//! controls are the MUSS requirements.

use std::collections::BTreeMap;

use serde::Deserialize;

const CATALOG_JSON: &str = include_str!("../assets/control_catalog.json");

#[derive(Debug, Deserialize)]
struct CatalogRoot {
    catalog: CatalogBody,
}

#[derive(Debug, Deserialize)]
struct CatalogBody {
    #[serde(default)]
    groups: Vec<LayerGroup>,
}

#[derive(Debug, Deserialize)]
struct LayerGroup {
    #[serde(default)]
    groups: Vec<BausteinGroup>,
}

#[derive(Debug, Deserialize)]
struct BausteinGroup {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    controls: Vec<CatalogControl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogControl {
    pub id: String,
    pub title: String,
    #[serde(default)]
    props: Vec<ControlProp>,
}

#[derive(Debug, Clone, Deserialize)]
struct ControlProp {
    name: String,
    value: String,
}

impl CatalogControl {
    /// The control level ('1' = MUSS, '2' = SOLLTE, '3' = erhöhter Schutzbedarf).
    pub fn level(&self) -> Option<&str> {
        self.props
            .iter()
            .find(|p| p.name == "level")
            .map(|p| p.value.as_str())
    }
}

pub struct ControlCatalog {
    bausteine: BTreeMap<String, (String, Vec<CatalogControl>)>,
}

impl ControlCatalog {
    /// Loads the embedded catalog. The asset ships with the binary, so a
    /// parse failure is a build defect, not a runtime condition.
    pub fn load() -> Result<Self, serde_json::Error> {
        let root: CatalogRoot = serde_json::from_str(CATALOG_JSON)?;
        let mut bausteine = BTreeMap::new();
        for layer in root.catalog.groups {
            for baustein in layer.groups {
                bausteine.insert(baustein.id.clone(), (baustein.title, baustein.controls));
            }
        }
        Ok(Self { bausteine })
    }

    pub fn baustein_ids(&self) -> impl Iterator<Item = &str> {
        self.bausteine.keys().map(String::as_str)
    }

    pub fn baustein_title(&self, baustein_id: &str) -> Option<&str> {
        self.bausteine.get(baustein_id).map(|(t, _)| t.as_str())
    }

    pub fn controls_for(&self, baustein_id: &str) -> &[CatalogControl] {
        self.bausteine
            .get(baustein_id)
            .map(|(_, c)| c.as_slice())
            .unwrap_or(&[])
    }

    /// IDs of all Level-1 (MUSS) requirements across the catalog.
    pub fn level_1_control_ids(&self) -> Vec<String> {
        self.bausteine
            .values()
            .flat_map(|(_, controls)| controls.iter())
            .filter(|c| c.level() == Some("1"))
            .map(|c| c.id.clone())
            .collect()
    }
}
