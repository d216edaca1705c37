//! Document classification map: source documents keyed by BSI category.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The BSI reference document categories a source file can be classified into.
///
/// Unknown or unclassifiable documents always land in `Sonstiges`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentCategory {
    #[serde(rename = "Strukturanalyse")]
    Strukturanalyse,
    #[serde(rename = "Schutzbedarfsfeststellung")]
    Schutzbedarfsfeststellung,
    #[serde(rename = "Modellierung")]
    Modellierung,
    #[serde(rename = "Netzplan")]
    Netzplan,
    #[serde(rename = "Sicherheitsleitlinie")]
    Sicherheitsleitlinie,
    #[serde(rename = "Grundschutz-Check")]
    GrundschutzCheck,
    #[serde(rename = "Risikoanalyse")]
    Risikoanalyse,
    #[serde(rename = "Realisierungsplan")]
    Realisierungsplan,
    #[serde(rename = "Vorheriger-Auditbericht")]
    VorherigerAuditbericht,
    #[serde(rename = "Sonstiges")]
    Sonstiges,
}

impl DocumentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strukturanalyse => "Strukturanalyse",
            Self::Schutzbedarfsfeststellung => "Schutzbedarfsfeststellung",
            Self::Modellierung => "Modellierung",
            Self::Netzplan => "Netzplan",
            Self::Sicherheitsleitlinie => "Sicherheitsleitlinie",
            Self::GrundschutzCheck => "Grundschutz-Check",
            Self::Risikoanalyse => "Risikoanalyse",
            Self::Realisierungsplan => "Realisierungsplan",
            Self::VorherigerAuditbericht => "Vorheriger-Auditbericht",
            Self::Sonstiges => "Sonstiges",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Strukturanalyse" => Some(Self::Strukturanalyse),
            "Schutzbedarfsfeststellung" => Some(Self::Schutzbedarfsfeststellung),
            "Modellierung" => Some(Self::Modellierung),
            "Netzplan" => Some(Self::Netzplan),
            "Sicherheitsleitlinie" => Some(Self::Sicherheitsleitlinie),
            "Grundschutz-Check" => Some(Self::GrundschutzCheck),
            "Risikoanalyse" => Some(Self::Risikoanalyse),
            "Realisierungsplan" => Some(Self::Realisierungsplan),
            "Vorheriger-Auditbericht" => Some(Self::VorherigerAuditbericht),
            "Sonstiges" => Some(Self::Sonstiges),
            _ => None,
        }
    }

    pub fn all() -> &'static [DocumentCategory] {
        &[
            Self::Strukturanalyse,
            Self::Schutzbedarfsfeststellung,
            Self::Modellierung,
            Self::Netzplan,
            Self::Sicherheitsleitlinie,
            Self::GrundschutzCheck,
            Self::Risikoanalyse,
            Self::Realisierungsplan,
            Self::VorherigerAuditbericht,
            Self::Sonstiges,
        ]
    }
}

impl std::fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One classified source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMapEntry {
    pub filename: String,
    pub category: DocumentCategory,
}

/// The persisted classification of all source documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMap {
    pub documents: Vec<DocumentMapEntry>,
    pub version: u32,
}

impl DocumentMap {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(documents: Vec<DocumentMapEntry>) -> Self {
        Self {
            documents,
            version: Self::CURRENT_VERSION,
        }
    }

    /// A degenerate map with every document in `Sonstiges`.
    /// Used when classification fails; the pipeline continues with
    /// reduced precision.
    pub fn fallback(filenames: &[String]) -> Self {
        Self::new(
            filenames
                .iter()
                .map(|f| DocumentMapEntry {
                    filename: f.clone(),
                    category: DocumentCategory::Sonstiges,
                })
                .collect(),
        )
    }

    /// Groups filenames by category, each list sorted for deterministic order.
    pub fn by_category(&self) -> BTreeMap<DocumentCategory, Vec<String>> {
        let mut map: BTreeMap<DocumentCategory, Vec<String>> = BTreeMap::new();
        for entry in &self.documents {
            map.entry(entry.category)
                .or_default()
                .push(entry.filename.clone());
        }
        for files in map.values_mut() {
            files.sort();
        }
        map
    }

    /// True when every filename in `expected` appears exactly once.
    pub fn covers_exactly(&self, expected: &[String]) -> bool {
        if self.documents.len() != expected.len() {
            return false;
        }
        let mut seen: Vec<&str> = self.documents.iter().map(|d| d.filename.as_str()).collect();
        seen.sort_unstable();
        if seen.windows(2).any(|w| w[0] == w[1]) {
            return false;
        }
        expected
            .iter()
            .all(|f| seen.binary_search(&f.as_str()).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn category_roundtrip() {
        for cat in DocumentCategory::all() {
            assert_eq!(DocumentCategory::from_str(cat.as_str()), Some(*cat));
        }
    }

    #[test]
    fn category_serde_uses_bsi_names() {
        let json = serde_json::to_string(&DocumentCategory::GrundschutzCheck).unwrap();
        assert_eq!(json, "\"Grundschutz-Check\"");
        let parsed: DocumentCategory = serde_json::from_str("\"Vorheriger-Auditbericht\"").unwrap();
        assert_eq!(parsed, DocumentCategory::VorherigerAuditbericht);
    }

    #[test]
    fn fallback_maps_everything_to_sonstiges() {
        let map = DocumentMap::fallback(&names(&["a.pdf", "b.pdf"]));
        assert_eq!(map.documents.len(), 2);
        assert!(map
            .documents
            .iter()
            .all(|d| d.category == DocumentCategory::Sonstiges));
    }

    #[test]
    fn covers_exactly_detects_missing_and_duplicate() {
        let map = DocumentMap::new(vec![
            DocumentMapEntry {
                filename: "a.pdf".into(),
                category: DocumentCategory::Strukturanalyse,
            },
            DocumentMapEntry {
                filename: "b.pdf".into(),
                category: DocumentCategory::Sonstiges,
            },
        ]);
        assert!(map.covers_exactly(&names(&["a.pdf", "b.pdf"])));
        assert!(!map.covers_exactly(&names(&["a.pdf"])));
        assert!(!map.covers_exactly(&names(&["a.pdf", "c.pdf"])));

        let dup = DocumentMap::new(vec![
            DocumentMapEntry {
                filename: "a.pdf".into(),
                category: DocumentCategory::Strukturanalyse,
            },
            DocumentMapEntry {
                filename: "a.pdf".into(),
                category: DocumentCategory::Sonstiges,
            },
        ]);
        assert!(!dup.covers_exactly(&names(&["a.pdf", "b.pdf"])));
    }

    #[test]
    fn by_category_sorts_filenames() {
        let map = DocumentMap::new(vec![
            DocumentMapEntry {
                filename: "z.pdf".into(),
                category: DocumentCategory::Sonstiges,
            },
            DocumentMapEntry {
                filename: "a.pdf".into(),
                category: DocumentCategory::Sonstiges,
            },
        ]);
        let grouped = map.by_category();
        assert_eq!(
            grouped.get(&DocumentCategory::Sonstiges).unwrap(),
            &vec!["a.pdf".to_string(), "z.pdf".to_string()]
        );
    }
}
