//! The authoritative system structure map: Zielobjekte and the
//! Baustein-to-Zielobjekt assignments extracted from Strukturanalyse
//! and Modellierung. Serves as ground truth for every later stage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Synthetic Zielobjekt representing the overall audit scope.
pub const INFORMATIONSVERBUND: &str = "Informationsverbund";

/// Baustein layers that are always modeled on the Informationsverbund,
/// regardless of what the Modellierung document claims.
pub const INFORMATIONSVERBUND_PREFIXES: [&str; 5] = ["ISMS", "ORP", "CON", "OPS", "DER"];

/// A target object in the customer's environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zielobjekt {
    pub kuerzel: String,
    pub name: String,
}

/// One Baustein modeled on one Zielobjekt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BausteinAssignment {
    pub baustein_id: String,
    pub kuerzel: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStructureMap {
    pub zielobjekte: Vec<Zielobjekt>,
    pub baustein_assignments: Vec<BausteinAssignment>,
}

impl SystemStructureMap {
    /// True when the Baustein layer is deterministically assigned to the
    /// Informationsverbund.
    pub fn is_informationsverbund_baustein(baustein_id: &str) -> bool {
        INFORMATIONSVERBUND_PREFIXES
            .iter()
            .any(|p| baustein_id.starts_with(p))
    }

    pub fn contains_kuerzel(&self, kuerzel: &str) -> bool {
        self.zielobjekte.iter().any(|z| z.kuerzel == kuerzel)
    }

    pub fn name_of(&self, kuerzel: &str) -> Option<&str> {
        self.zielobjekte
            .iter()
            .find(|z| z.kuerzel == kuerzel)
            .map(|z| z.name.as_str())
    }

    /// Lookup table kuerzel -> name.
    pub fn name_map(&self) -> BTreeMap<&str, &str> {
        self.zielobjekte
            .iter()
            .map(|z| (z.kuerzel.as_str(), z.name.as_str()))
            .collect()
    }

    pub fn assignment_for(&self, baustein_id: &str) -> Option<&str> {
        self.baustein_assignments
            .iter()
            .find(|a| a.baustein_id == baustein_id)
            .map(|a| a.kuerzel.as_str())
    }

    /// True when the (baustein, kuerzel) pair is part of the map.
    pub fn has_pair(&self, baustein_id: &str, kuerzel: &str) -> bool {
        self.baustein_assignments
            .iter()
            .any(|a| a.baustein_id == baustein_id && a.kuerzel == kuerzel)
    }
}
