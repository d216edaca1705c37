//! Prompt template registry.
//!
//! Every structured-generation call site gets its template and schema from
//! here; no prompt text lives inside stage logic. Placeholders use
//! `{name}` and are substituted with `fill`.

use serde_json::Value;

use crate::ai::schema;
use crate::models::DocumentCategory;

// ═══════════════════════════════════════════════════════════
// Template substitution
// ═══════════════════════════════════════════════════════════

/// Replaces `{key}` placeholders. Unknown placeholders stay untouched so
/// a typo surfaces in the model input instead of panicking.
pub fn fill(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in substitutions {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Document classification
// ═══════════════════════════════════════════════════════════

pub const CLASSIFY_DOCUMENTS: &str = "\
Ordne jede der folgenden Dateien genau einer BSI-Dokumentenkategorie zu. \
Nutze den Dateinamen als einziges Indiz. Wähle 'Sonstiges', wenn keine \
Kategorie eindeutig passt. Jede Datei muss genau einmal vorkommen.\n\n\
Dateien:\n{filenames}";

pub fn classify_documents_schema() -> Value {
    let categories: Vec<&str> = DocumentCategory::all().iter().map(|c| c.as_str()).collect();
    schema::object(
        &[(
            "document_map",
            schema::array_of(schema::object(
                &[
                    ("filename", schema::string()),
                    ("category", schema::string_enum(&categories)),
                ],
                &[],
            )),
        )],
        &[],
    )
}

// ═══════════════════════════════════════════════════════════
// Ground truth extraction
// ═══════════════════════════════════════════════════════════

pub const EXTRACT_ZIELOBJEKTE: &str = "\
Extrahiere aus der angehängten Strukturanalyse (Referenzdokument A.1) die \
vollständige Liste aller Zielobjekte. Ein Zielobjekt besteht aus einem \
Kürzel (z.B. 'S-001') und einem Namen (z.B. 'Windows Server 2022'). \
Übernimm Kürzel und Namen exakt so, wie sie im Dokument stehen.";

pub fn zielobjekte_schema() -> Value {
    schema::object(
        &[(
            "zielobjekte",
            schema::array_of(schema::object(
                &[("kuerzel", schema::string()), ("name", schema::string())],
                &[],
            )),
        )],
        &[],
    )
}

pub const EXTRACT_BAUSTEIN_MAPPINGS: &str = "\
Extrahiere aus der angehängten Modellierung (Referenzdokument A.3) alle \
Zuordnungen von IT-Grundschutz-Bausteinen zu Zielobjekten. Eine Zuordnung \
besteht aus der Baustein-ID (z.B. 'SYS.1.1') und dem Kürzel des \
Zielobjekts, auf das der Baustein angewendet wird.";

pub fn baustein_mappings_schema() -> Value {
    schema::object(
        &[(
            "mappings",
            schema::array_of(schema::object(
                &[
                    ("baustein_id", schema::string()),
                    ("zielobjekt_kuerzel", schema::string()),
                ],
                &[],
            )),
        )],
        &[],
    )
}

// ═══════════════════════════════════════════════════════════
// Grundschutz-Check chunk extraction
// ═══════════════════════════════════════════════════════════

pub const GS_CHUNK_EXTRACTION: &str = "\
Der angehängte Ausschnitt des IT-Grundschutz-Checks enthält ausschließlich \
Anforderungen für das Zielobjekt '{kuerzel}' ({name}). Extrahiere jede \
Anforderung mit ihrer ID (Muster wie 'SYS.1.1.A3'), dem Titel, dem \
Umsetzungsstatus, der Umsetzungserläuterung und, falls angegeben, dem \
Datum der letzten Prüfung. Setze in jedem Eintrag \
zielobjekt_kuerzel = '{kuerzel}'. Erfinde keine Anforderungen; lasse \
Felder weg, die im Dokument fehlen.{chunk_note}";

pub const GS_CHUNK_OVERLAP_NOTE: &str = "\n\nHinweis: Dies ist Teil {part} von \
{total} für dieses Zielobjekt. Die Teile überlappen sich um wenige Seiten; \
extrahiere alle sichtbaren Anforderungen, Duplikate werden später bereinigt.";

pub fn gs_chunk_schema() -> Value {
    schema::object(
        &[(
            "anforderungen",
            schema::array_of(schema::object(
                &[
                    ("zielobjekt_kuerzel", schema::string()),
                    ("anforderung_id", schema::string()),
                    ("titel", schema::string()),
                    (
                        "umsetzungsstatus",
                        schema::string_enum(&["Ja", "Teilweise", "Nein", "Entbehrlich"]),
                    ),
                    ("umsetzungserlaeuterung", schema::string()),
                    ("datum_letzte_pruefung", schema::string()),
                ],
                &["umsetzungsstatus", "datum_letzte_pruefung", "umsetzungserlaeuterung"],
            )),
        )],
        &[],
    )
}

// ═══════════════════════════════════════════════════════════
// Targeted analysis questions (3.6.1)
// ═══════════════════════════════════════════════════════════

pub const TARGETED_QUESTION: &str = "\
Beantworte die folgende Prüffrage anhand der mitgelieferten Daten. \
Antworte mit einem Ja/Nein-Ergebnis pro Frage und genau einem Finding: \
Kategorie 'OK' wenn nichts zu beanstanden ist, 'AG' für geringfügige und \
'AS' für schwerwiegende Abweichungen, 'E' für Empfehlungen.\n\n\
Prüffrage: {question}\n\nDaten:\n{json_data}";

pub fn targeted_question_schema() -> Value {
    schema::object(
        &[
            ("answers", schema::bounded_array(schema::boolean(), 1, 1)),
            ("finding", finding_schema()),
        ],
        &[],
    )
}

pub fn finding_schema() -> Value {
    schema::object(
        &[
            ("category", schema::string_enum(&["AG", "AS", "E", "OK"])),
            ("description", schema::string()),
        ],
        &[],
    )
}

// ═══════════════════════════════════════════════════════════
// Chapter 1
// ═══════════════════════════════════════════════════════════

pub const CHAPTER_1: &str = "\
Erstelle die einleitenden Abschnitte des Auditberichts für ein Audit vom \
Typ '{audit_type}'. Beschreibe Auditgrundlage (BSI-Standard 200-1/2/3, \
ISO 27001 auf Basis von IT-Grundschutz), den Geltungsbereich und das \
Auditverfahren in jeweils zwei bis vier Sätzen.{language_note}";

pub fn chapter_1_schema() -> Value {
    schema::object(
        &[
            ("auditgrundlage", schema::string()),
            ("geltungsbereich", schema::string()),
            ("auditverfahren", schema::string()),
        ],
        &[],
    )
}

// ═══════════════════════════════════════════════════════════
// Chapter 3
// ═══════════════════════════════════════════════════════════

pub const CHAPTER_3_QUESTIONS: &str = "\
Prüfe die angehängten Referenzdokumente des Kunden und beantworte die \
folgenden Prüffragen. Gib je Frage eine Ja/Nein-Antwort. Erzeuge genau \
ein Finding für den gesamten Abschnitt: 'OK' wenn nichts zu beanstanden \
ist, sonst 'AG', 'AS' oder 'E' mit kurzer Begründung.\n\n\
Prüffragen:\n{questions}";

pub fn chapter_3_questions_schema(question_count: usize) -> Value {
    schema::object(
        &[
            (
                "answers",
                schema::bounded_array(schema::boolean(), question_count.max(1), question_count.max(1)),
            ),
            ("finding", finding_schema()),
        ],
        &[],
    )
}

pub const CHAPTER_3_SUMMARY: &str = "\
Formuliere ein kurzes Gesamturteil (zwei bis vier Sätze) zum Thema \
'{summary_topic}' auf Basis der bisher festgestellten Abweichungen. \
Bisherige Feststellungen:\n{previous_findings}";

pub fn chapter_3_summary_schema() -> Value {
    schema::object(&[("verdict", schema::string())], &[])
}

/// Critical reference document categories: if any is missing entirely,
/// the document review records a major deviation.
pub const CRITICAL_CATEGORIES: [DocumentCategory; 7] = [
    DocumentCategory::Sicherheitsleitlinie,
    DocumentCategory::Strukturanalyse,
    DocumentCategory::Schutzbedarfsfeststellung,
    DocumentCategory::Modellierung,
    DocumentCategory::GrundschutzCheck,
    DocumentCategory::Risikoanalyse,
    DocumentCategory::Realisierungsplan,
];

/// Chapter 3 subchapter task definitions: blueprint key, needed
/// document categories, and the questions asked of each section.
pub struct Chapter3Task {
    pub key: &'static str,
    pub categories: &'static [DocumentCategory],
    pub questions: &'static [&'static str],
}

pub fn chapter_3_tasks() -> Vec<Chapter3Task> {
    vec![
        Chapter3Task {
            key: "sicherheitsleitlinie",
            categories: &[DocumentCategory::Sicherheitsleitlinie],
            questions: &[
                "Ist die Sicherheitsleitlinie von der Leitung verabschiedet und im Unternehmen bekannt gegeben?",
                "Werden Sicherheitsziele und der Geltungsbereich klar benannt?",
            ],
        },
        Chapter3Task {
            key: "definitionDesInformationsverbundes",
            categories: &[DocumentCategory::Strukturanalyse, DocumentCategory::Netzplan],
            questions: &[
                "Ist der Informationsverbund eindeutig abgegrenzt?",
                "Sind alle wesentlichen Geschäftsprozesse, Anwendungen und IT-Systeme erfasst?",
                "Ist der Netzplan aktuell und konsistent zur Strukturanalyse?",
            ],
        },
        Chapter3Task {
            key: "schutzbedarfsfeststellung",
            categories: &[DocumentCategory::Schutzbedarfsfeststellung],
            questions: &[
                "Wurde der Schutzbedarf für alle Zielobjekte nachvollziehbar festgestellt?",
                "Sind die Vererbungsregeln (Maximumprinzip, Kumulationseffekt) berücksichtigt?",
            ],
        },
        Chapter3Task {
            key: "modellierung",
            categories: &[DocumentCategory::Modellierung],
            questions: &[
                "Wurden alle relevanten Bausteine auf die Zielobjekte angewendet?",
                "Ist die Modellierung vollständig und begründet?",
            ],
        },
        Chapter3Task {
            key: "risikoanalyse",
            categories: &[DocumentCategory::Risikoanalyse],
            questions: &[
                "Liegt für alle Zielobjekte mit erhöhtem Schutzbedarf eine Risikoanalyse nach BSI-Standard 200-3 vor?",
                "Sind die behandelten Risiken mit Maßnahmen hinterlegt?",
            ],
        },
    ]
}

// ═══════════════════════════════════════════════════════════
// Chapter 4
// ═══════════════════════════════════════════════════════════

pub const CHAPTER_4_CERT: &str = "\
Erstelle den Prüfplan für ein Erst- bzw. Re-Zertifizierungsaudit. Wähle \
mindestens 6 Bausteine aus der folgenden Systemstruktur aus. Jede Zeile \
besteht aus einem Baustein und dem Kürzel des Zielobjekts, auf dem er \
modelliert ist; verwende ausschließlich Paare, die in der Systemstruktur \
vorkommen. Begründe jede Auswahl kurz.\n\nSystemstruktur:\n{system_map}";

pub const CHAPTER_4_SURV_1: &str = "\
Erstelle den Prüfplan für das 1. Überwachungsaudit. Wähle den Baustein \
ISMS.1 sowie mindestens 2 weitere Bausteine aus der folgenden \
Systemstruktur, bevorzugt solche, die im vorherigen Audit nicht \
geprüft wurden. Verwende ausschließlich (Baustein, Zielobjekt-Kürzel)-\
Paare, die in der Systemstruktur vorkommen. Begründe jede Auswahl \
kurz.\n\nSystemstruktur:\n{system_map}\n\n\
Im vorherigen Audit geprüfte Bausteine:\n{previous_plan}";

pub const CHAPTER_4_SURV_2: &str = "\
Erstelle den Prüfplan für das 2. Überwachungsaudit. Wähle den Baustein \
ISMS.1 sowie mindestens 2 weitere Bausteine, bevorzugt solche, die im \
1. Überwachungsaudit nicht geprüft wurden. Verwende ausschließlich \
(Baustein, Zielobjekt-Kürzel)-Paare aus der folgenden Systemstruktur. \
Begründe jede Auswahl kurz.\n\nSystemstruktur:\n{system_map}\n\n\
Im 1. Überwachungsaudit geprüfte Bausteine:\n{previous_plan}";

pub fn chapter_4_bausteine_schema() -> Value {
    schema::object(
        &[(
            "rows",
            schema::bounded_array(
                schema::object(
                    &[
                        ("baustein", schema::string()),
                        ("zielobjekt_kuerzel", schema::string()),
                        ("begruendung", schema::string()),
                    ],
                    &[],
                ),
                1,
                40,
            ),
        )],
        &[],
    )
}

pub const CHAPTER_4_RISK_MEASURES: &str = "\
Wähle aus der angehängten Risikoanalyse drei bis fünf Maßnahmen aus, die \
im Vor-Ort-Audit stichprobenartig geprüft werden sollen. Gib je Maßnahme \
das betroffene Zielobjekt und eine kurze Begründung der Auswahl an.";

pub fn chapter_4_risk_measures_schema() -> Value {
    schema::object(
        &[(
            "rows",
            schema::bounded_array(
                schema::object(
                    &[
                        ("massnahme", schema::string()),
                        ("zielobjekt", schema::string()),
                        ("begruendung", schema::string()),
                    ],
                    &[],
                ),
                1,
                10,
            ),
        )],
        &[],
    )
}

// ═══════════════════════════════════════════════════════════
// Previous report scan
// ═══════════════════════════════════════════════════════════

pub const SCAN_CHAPTER_1: &str = "\
Extrahiere aus dem angehängten vorherigen Auditbericht die Stammdaten aus \
Kapitel 1: auditierte Institution, Auditzeitraum, Auditteam und den \
damaligen Audittyp.";

pub fn scan_chapter_1_schema() -> Value {
    schema::object(
        &[
            ("institution", schema::string()),
            ("auditzeitraum", schema::string()),
            ("auditteam", schema::string()),
            ("audittyp", schema::string()),
        ],
        &["auditteam", "auditzeitraum"],
    )
}

pub const SCAN_CHAPTER_4: &str = "\
Extrahiere aus dem angehängten vorherigen Auditbericht, welche Bausteine \
im damaligen Prüfplan (Kapitel 4) geprüft wurden, jeweils mit dem \
zugehörigen Zielobjekt.";

pub fn scan_chapter_4_schema() -> Value {
    schema::object(
        &[(
            "gepruefte_bausteine",
            schema::array_of(schema::object(
                &[
                    ("baustein", schema::string()),
                    ("zielobjekt", schema::string()),
                ],
                &[],
            )),
        )],
        &[],
    )
}

pub const SCAN_CHAPTER_7: &str = "\
Extrahiere aus dem angehängten vorherigen Auditbericht alle Abweichungen \
und Empfehlungen aus Kapitel 7.2 mit ihrer Nummer (z.B. 'AG-1'), der \
Kategorie (AG, AS oder E), der Beschreibung und, falls angegeben, dem \
Bearbeitungsstatus.";

pub fn scan_chapter_7_schema() -> Value {
    schema::object(
        &[(
            "all_findings",
            schema::array_of(schema::object(
                &[
                    ("nummer", schema::string()),
                    ("category", schema::string_enum(&["AG", "AS", "E"])),
                    ("beschreibung", schema::string()),
                    ("status", schema::string()),
                ],
                &["status"],
            )),
        )],
        &[],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::schema::validate;
    use serde_json::json;

    #[test]
    fn fill_replaces_known_placeholders_only() {
        let out = fill("a {x} b {y}", &[("x", "1")]);
        assert_eq!(out, "a 1 b {y}");
    }

    #[test]
    fn classification_schema_accepts_valid_map() {
        let value = json!({
            "document_map": [
                { "filename": "strukturanalyse.pdf", "category": "Strukturanalyse" },
                { "filename": "rest.pdf", "category": "Sonstiges" }
            ]
        });
        assert!(validate(&value, &classify_documents_schema()).is_ok());
    }

    #[test]
    fn classification_schema_rejects_unknown_category() {
        let value = json!({
            "document_map": [{ "filename": "x.pdf", "category": "Unbekannt" }]
        });
        assert!(validate(&value, &classify_documents_schema()).is_err());
    }

    #[test]
    fn gs_chunk_schema_allows_missing_status() {
        let value = json!({
            "anforderungen": [{
                "zielobjekt_kuerzel": "S-001",
                "anforderung_id": "SYS.1.1.A1",
                "titel": "Patch-Management"
            }]
        });
        assert!(validate(&value, &gs_chunk_schema()).is_ok());
    }

    #[test]
    fn chapter_3_question_schema_pins_answer_count() {
        let schema = chapter_3_questions_schema(2);
        let good = json!({
            "answers": [true, false],
            "finding": { "category": "OK", "description": "" }
        });
        assert!(validate(&good, &schema).is_ok());
        let bad = json!({
            "answers": [true],
            "finding": { "category": "OK", "description": "" }
        });
        assert!(validate(&bad, &schema).is_err());
    }

    #[test]
    fn chapter_3_tasks_cover_critical_documents() {
        let tasks = chapter_3_tasks();
        assert!(tasks.iter().any(|t| t.key == "modellierung"));
        assert!(tasks.iter().all(|t| !t.questions.is_empty()));
    }
}
