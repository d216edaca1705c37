//! Security requirements extracted from the Grundschutz-Check document.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// Implementation status of a requirement, as recorded by the customer.
///
/// Ordering for merge conflicts: the most severe status wins
/// (`Nein > Teilweise > Ja > Entbehrlich`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UmsetzungsStatus {
    #[serde(rename = "Ja")]
    Ja,
    #[serde(rename = "Teilweise", alias = "teilweise")]
    Teilweise,
    #[serde(rename = "Nein")]
    Nein,
    #[serde(rename = "Entbehrlich", alias = "entbehrlich")]
    Entbehrlich,
}

impl UmsetzungsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ja => "Ja",
            Self::Teilweise => "Teilweise",
            Self::Nein => "Nein",
            Self::Entbehrlich => "Entbehrlich",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "Ja" | "ja" => Some(Self::Ja),
            "Teilweise" | "teilweise" => Some(Self::Teilweise),
            "Nein" | "nein" => Some(Self::Nein),
            "Entbehrlich" | "entbehrlich" => Some(Self::Entbehrlich),
            _ => None,
        }
    }

    /// Merge priority: higher wins when duplicate extractions disagree.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Nein => 3,
            Self::Teilweise => 2,
            Self::Ja => 1,
            Self::Entbehrlich => 0,
        }
    }
}

impl std::fmt::Display for UmsetzungsStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One requirement for one Zielobjekt.
///
/// After the merge step the pair `(zielobjekt_kuerzel, anforderung_id)`
/// is unique across the whole artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub zielobjekt_kuerzel: String,
    pub anforderung_id: String,
    pub titel: String,
    /// Absent when the customer never recorded a status; flagged by the
    /// downstream analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub umsetzungsstatus: Option<UmsetzungsStatus>,
    #[serde(default)]
    pub umsetzungserlaeuterung: String,
    /// Date of the last review. Accepts ISO (`2024-03-01`) and German
    /// (`01.03.2024`) notation on input, serializes as ISO.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_flexible_date"
    )]
    pub datum_letzte_pruefung: Option<NaiveDate>,
}

/// Extraction models return dates in whatever notation the source table
/// used. Accept ISO and `DD.MM.YYYY`; anything else becomes `None`.
fn deserialize_flexible_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_flexible_date))
}

pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    // ISO timestamps occasionally leak in; keep the date part.
    let date_part = trimmed.split('T').next().unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%d.%m.%Y"))
        .ok()
}
