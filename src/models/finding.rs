//! Audit findings: deviations and recommendations collected centrally
//! by the controller.

use serde::{Deserialize, Serialize};

/// BSI finding categories. `OK` marks "nothing to report" results and is
/// never persisted into the central findings list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FindingCategory {
    /// Geringfügige Abweichung (minor deviation).
    AG,
    /// Schwerwiegende Abweichung (major deviation).
    AS,
    /// Empfehlung (recommendation).
    E,
    /// Nothing to report.
    OK,
}

impl FindingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AG => "AG",
            Self::AS => "AS",
            Self::E => "E",
            Self::OK => "OK",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "AG" => Some(Self::AG),
            "AS" => Some(Self::AS),
            "E" => Some(Self::E),
            "OK" => Some(Self::OK),
            _ => None,
        }
    }
}

impl std::fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single finding. IDs (`AG-01`, `AS-02`, …) are assigned by the
/// controller after the originating stage completes; findings carried
/// over from a previous report keep their original IDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub category: FindingCategory,
    pub description: String,
    /// Originating stage, e.g. "3" or "Previous Audit (2023)".
    #[serde(default)]
    pub source_chapter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Finding {
    pub fn new(category: FindingCategory, description: impl Into<String>) -> Self {
        Self {
            id: None,
            category,
            description: description.into(),
            source_chapter: String::new(),
            status: None,
        }
    }

    /// Splits an ID like `AG-12` into its category and number.
    pub fn parse_id(id: &str) -> Option<(FindingCategory, u32)> {
        let (cat, num) = id.rsplit_once('-')?;
        let category = FindingCategory::from_str(cat)?;
        let number = num.parse::<u32>().ok()?;
        (number > 0).then_some((category, number))
    }

    /// Normalized description used for cross-stage de-duplication.
    pub fn normalized_description(&self) -> String {
        self.description
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}
