//! End-to-end pipeline runs against a scripted provider and a temp-dir
//! store: full run, resume, and single-stage force.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use pruefwerk::ai::provider::{AiProvider, GenerateRequest};
use pruefwerk::ai::{AiError, AiGateway};
use pruefwerk::catalog::ControlCatalog;
use pruefwerk::config::{AppConfig, AuditType, DEFAULT_MAX_CONCURRENT_AI_REQUESTS};
use pruefwerk::controller::{AuditController, ControllerError, StageStatus};
use pruefwerk::finder::DocumentFinder;
use pruefwerk::gscheck::merge::MergedArtifact;
use pruefwerk::models::{
    DocumentCategory, DocumentMap, DocumentMapEntry, SystemStructureMap, INFORMATIONSVERBUND,
};
use pruefwerk::report::ReportAssembler;
use pruefwerk::stages::{all_runners, StageContext};
use pruefwerk::store::{paths, JsonStore, LocalStore, ObjectStore};

// ── scripted provider ───────────────────────────────────────

/// Routes requests by log-context prefix. Unrouted contexts fail fatally
/// so a missing script line surfaces immediately instead of hanging in
/// retries.
struct RoutingProvider {
    routes: Vec<(&'static str, Value)>,
    calls: Mutex<Vec<String>>,
}

impl RoutingProvider {
    fn new(routes: Vec<(&'static str, Value)>) -> Self {
        Self {
            routes,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn calls_matching(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl AiProvider for RoutingProvider {
    async fn generate(&self, request: &GenerateRequest) -> Result<Value, AiError> {
        self.calls.lock().unwrap().push(request.context.clone());
        for (prefix, value) in &self.routes {
            if request.context.starts_with(prefix) {
                return Ok(value.clone());
            }
        }
        Err(AiError::Fatal(format!(
            "no scripted response for context '{}'",
            request.context
        )))
    }

    fn schema_guided(&self) -> bool {
        true
    }
}

// ── fixtures ────────────────────────────────────────────────

/// Minimal multi-page PDF, one entry per page.
fn make_pdf(pages: &[&str]) -> Vec<u8> {
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.4");
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let pages_id = doc.new_object_id();
    let mut page_ids = Vec::new();
    for text in pages {
        let mut content = String::from("BT /F1 12 Tf 50 750 Td 14 TL ");
        for line in text.lines() {
            let escaped = line.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)");
            content.push_str(&format!("({escaped}) Tj T* "));
        }
        content.push_str("ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        page_ids.push(page_id);
    }
    let kids: Vec<Object> = page_ids.iter().map(|id| (*id).into()).collect();
    let count = page_ids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn test_config(root: &str) -> AppConfig {
    AppConfig {
        store_root: root.to_string(),
        source_prefix: "source/".to_string(),
        output_prefix: "output/".to_string(),
        audit_type: AuditType::Zertifizierung,
        max_concurrent_ai_requests: DEFAULT_MAX_CONCURRENT_AI_REQUESTS,
        test_mode: false,
        output_language: None,
        ai_base_url: "http://localhost:11434".to_string(),
        ai_model: "test-model".to_string(),
    }
}

fn scripted_routes() -> Vec<(&'static str, Value)> {
    vec![
        (
            "GT: extract_zielobjekte",
            json!({
                "zielobjekte": [
                    { "kuerzel": "S-001", "name": "Windows Server" },
                    { "kuerzel": "A-001", "name": "Main App" }
                ]
            }),
        ),
        (
            "GT: extract_baustein_mappings",
            json!({
                "mappings": [
                    { "baustein_id": "SYS.1.1", "zielobjekt_kuerzel": "S-001" },
                    { "baustein_id": "APP.1.1", "zielobjekt_kuerzel": "A-001" },
                    { "baustein_id": "ISMS.1", "zielobjekt_kuerzel": "S-001" }
                ]
            }),
        ),
        (
            "GS-Check:",
            json!({
                "anforderungen": [{
                    "zielobjekt_kuerzel": "wird überschrieben",
                    "anforderung_id": "SYS.1.1.A3",
                    "titel": "Restriktive Rechtevergabe",
                    "umsetzungsstatus": "Ja",
                    "umsetzungserlaeuterung": "Umgesetzt über Gruppenrichtlinien.",
                    "datum_letzte_pruefung": "2026-05-01"
                }]
            }),
        ),
        (
            "Scan-Report: chapter_1_data",
            json!({
                "institution": "Beispiel GmbH",
                "audittyp": "Zertifizierungsaudit"
            }),
        ),
        (
            "Scan-Report: chapter_4_context",
            json!({
                "gepruefte_bausteine": [
                    { "baustein": "SYS.1.1", "zielobjekt": "Windows Server" }
                ]
            }),
        ),
        (
            "Scan-Report: chapter_7_findings",
            json!({
                "all_findings": [{
                    "nummer": "AG-2",
                    "category": "AG",
                    "beschreibung": "Alte Abweichung aus dem Vorbericht",
                    "status": "offen"
                }]
            }),
        ),
        (
            "Chapter-1",
            json!({
                "auditgrundlage": "BSI-Standards 200-1 bis 200-3.",
                "geltungsbereich": "Gesamter Informationsverbund.",
                "auditverfahren": "Dokumentenprüfung und Vor-Ort-Audit."
            }),
        ),
        (
            "Chapter-3 Summary",
            json!({ "verdict": "Die Dokumentation ist insgesamt tragfähig." }),
        ),
        (
            "Chapter-3: sicherheitsleitlinie",
            json!({ "answers": [true, true], "finding": { "category": "OK", "description": "" } }),
        ),
        (
            "Chapter-3: definitionDesInformationsverbundes",
            json!({ "answers": [true, true, true], "finding": { "category": "OK", "description": "" } }),
        ),
        (
            "Chapter-3: schutzbedarfsfeststellung",
            json!({ "answers": [true, true], "finding": { "category": "OK", "description": "" } }),
        ),
        (
            "Chapter-3: modellierung",
            json!({ "answers": [true, true], "finding": { "category": "OK", "description": "" } }),
        ),
        (
            "Chapter-3: risikoanalyse",
            json!({ "answers": [true, true], "finding": { "category": "OK", "description": "" } }),
        ),
        (
            "Chapter-4: auswahlBausteineErstRezertifizierung",
            json!({
                "rows": [
                    { "baustein": "SYS.1.1", "zielobjekt_kuerzel": "S-001", "begruendung": "Zentraler Server" },
                    { "baustein": "APP.1.1", "zielobjekt_kuerzel": "A-001", "begruendung": "Kernanwendung" },
                    { "baustein": "ISMS.1", "zielobjekt_kuerzel": "Informationsverbund", "begruendung": "Pflichtbaustein" },
                    { "baustein": "ORP.1", "zielobjekt_kuerzel": "Informationsverbund", "begruendung": "Organisation" },
                    { "baustein": "CON.1", "zielobjekt_kuerzel": "Informationsverbund", "begruendung": "Kryptokonzept" },
                    { "baustein": "DER.1", "zielobjekt_kuerzel": "Informationsverbund", "begruendung": "Detektion" }
                ]
            }),
        ),
    ]
}

struct Pipeline {
    _dir: tempfile::TempDir,
    config: Arc<AppConfig>,
    store: Arc<LocalStore>,
    provider: Arc<RoutingProvider>,
    controller: AuditController,
}

async fn build_pipeline() -> Pipeline {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(dir.path().to_str().unwrap()));
    let store = Arc::new(LocalStore::new(dir.path()));

    // Source documents: the check PDF is real, the rest are stand-ins the
    // scripted provider never reads.
    let check_pdf = make_pdf(&[
        "IT-Grundschutz-Check\nDeckblatt",
        "S-001 Windows Server\nSYS.1.1.A3 Restriktive Rechtevergabe",
        "A-001 Main App\nAPP.1.1.A2 Aktive Inhalte",
    ]);
    store.write_bytes("source/gscheck.pdf", &check_pdf).unwrap();
    store.write_bytes("source/strukturanalyse.pdf", b"pdf").unwrap();
    store.write_bytes("source/modellierung.pdf", b"pdf").unwrap();
    store.write_bytes("source/vorbericht.pdf", b"pdf").unwrap();

    // Pre-seeded classification map: classification itself is covered by
    // the finder's unit tests.
    let map = DocumentMap::new(vec![
        DocumentMapEntry {
            filename: "gscheck.pdf".into(),
            category: DocumentCategory::GrundschutzCheck,
        },
        DocumentMapEntry {
            filename: "strukturanalyse.pdf".into(),
            category: DocumentCategory::Strukturanalyse,
        },
        DocumentMapEntry {
            filename: "modellierung.pdf".into(),
            category: DocumentCategory::Modellierung,
        },
        DocumentMapEntry {
            filename: "vorbericht.pdf".into(),
            category: DocumentCategory::VorherigerAuditbericht,
        },
    ]);
    store
        .write_json(&config.output_key(paths::DOCUMENT_MAP), &map)
        .unwrap();

    let provider = Arc::new(RoutingProvider::new(scripted_routes()));
    let ai = Arc::new(AiGateway::new(provider.clone(), 4));
    let finder = Arc::new(DocumentFinder::new(config.clone(), store.clone()));
    finder.ensure_initialized(&ai).await.unwrap();

    let ctx = StageContext {
        config: config.clone(),
        store: store.clone(),
        ai,
        finder,
        catalog: Arc::new(ControlCatalog::load().unwrap()),
        run_date: chrono::NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
    };
    Pipeline {
        _dir: dir,
        config: config.clone(),
        store,
        provider,
        controller: AuditController::new(ctx, all_runners()),
    }
}

// ── scenarios ───────────────────────────────────────────────

#[tokio::test]
async fn full_run_produces_all_artifacts() {
    let pipeline = build_pipeline().await;
    let summary = pipeline.controller.run_all(false).await.unwrap();
    assert!(!summary.any_failed(), "summary: {summary:?}");

    // System structure map: ISMS.1 overridden to the Informationsverbund.
    let map: SystemStructureMap = pipeline
        .store
        .read_json(&pipeline.config.output_key(paths::SYSTEM_STRUCTURE_MAP))
        .unwrap();
    assert_eq!(map.assignment_for("ISMS.1"), Some(INFORMATIONSVERBUND));
    assert_eq!(map.assignment_for("SYS.1.1"), Some("S-001"));

    // Merged requirements: one per Zielobjekt section, unique pairs.
    let artifact: MergedArtifact = pipeline
        .store
        .read_json(&pipeline.config.output_key(paths::EXTRACTED_CHECK_MERGED))
        .unwrap();
    assert_eq!(artifact.anforderungen.len(), 2);
    let kuerzel: Vec<&str> = artifact
        .anforderungen
        .iter()
        .map(|r| r.zielobjekt_kuerzel.as_str())
        .collect();
    assert!(kuerzel.contains(&"S-001"));
    assert!(kuerzel.contains(&"A-001"));

    // Chapter 5 checklist covers every planned Baustein.
    let chapter_5: Value = pipeline
        .store
        .read_json(&pipeline.config.stage_result_key("Chapter-5"))
        .unwrap();
    let pruefungen = chapter_5["verifikationDesITGrundschutzChecks"]["einzelergebnisse"]
        ["bausteinPruefungen"]
        .as_array()
        .unwrap();
    for expected in ["SYS.1.1", "APP.1.1", "ISMS.1"] {
        assert!(
            pruefungen
                .iter()
                .any(|p| p["baustein"].as_str().unwrap_or_default().starts_with(expected)),
            "checklist misses {expected}"
        );
    }

    // Findings: the previous report's AG-2 is preserved; the coverage
    // check (missing Sicherheitsleitlinie etc.) produced a major
    // deviation with a fresh ID.
    let findings: Vec<Value> = pipeline
        .store
        .read_json(&pipeline.config.output_key(paths::ALL_FINDINGS))
        .unwrap();
    assert!(findings.iter().any(|f| f["id"] == "AG-2"));
    assert!(findings.iter().any(|f| f["category"] == "AS"));

    // Final report assembles and carries the findings tables.
    let report = ReportAssembler::new(&pipeline.config, pipeline.store.as_ref())
        .assemble()
        .unwrap();
    let ag_rows = report["bsiAuditReport"]["anhang"]["abweichungenUndEmpfehlungen"]
        ["geringfuegigeAbweichungen"]["table"]["rows"]
        .as_array()
        .unwrap();
    assert!(ag_rows.iter().any(|r| r["nr"] == "AG-2"));
}

#[tokio::test]
async fn second_run_skips_all_stages_and_keeps_artifacts_identical() {
    let pipeline = build_pipeline().await;
    pipeline.controller.run_all(false).await.unwrap();
    let calls_after_first = pipeline.provider.call_count();
    let chapter_3_before = pipeline
        .store
        .read_bytes(&pipeline.config.stage_result_key("Chapter-3"))
        .unwrap();
    let findings_before = pipeline
        .store
        .read_bytes(&pipeline.config.output_key(paths::ALL_FINDINGS))
        .unwrap();

    let summary = pipeline.controller.run_all(false).await.unwrap();
    assert!(summary
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Skipped), "summary: {summary:?}");
    assert_eq!(
        pipeline.provider.call_count(),
        calls_after_first,
        "resume must not call the model"
    );

    let chapter_3_after = pipeline
        .store
        .read_bytes(&pipeline.config.stage_result_key("Chapter-3"))
        .unwrap();
    assert_eq!(chapter_3_before, chapter_3_after);
    let findings_after = pipeline
        .store
        .read_bytes(&pipeline.config.output_key(paths::ALL_FINDINGS))
        .unwrap();
    assert_eq!(findings_before, findings_after);
}

#[tokio::test]
async fn forcing_one_stage_rewrites_only_that_stage() {
    let pipeline = build_pipeline().await;
    pipeline.controller.run_all(false).await.unwrap();
    let chapter_3_before = pipeline
        .store
        .read_bytes(&pipeline.config.stage_result_key("Chapter-3"))
        .unwrap();
    let chapter_4_calls_before = pipeline
        .provider
        .calls_matching("Chapter-4: auswahlBausteine");

    pipeline.controller.run_stage("Chapter-4").await.unwrap();

    assert_eq!(
        pipeline
            .provider
            .calls_matching("Chapter-4: auswahlBausteine"),
        chapter_4_calls_before + 1,
        "forced stage must re-run its generation"
    );
    let chapter_3_after = pipeline
        .store
        .read_bytes(&pipeline.config.stage_result_key("Chapter-3"))
        .unwrap();
    assert_eq!(chapter_3_before, chapter_3_after, "other stages untouched");
}

#[tokio::test]
async fn single_stage_with_missing_prerequisites_is_rejected() {
    let pipeline = build_pipeline().await;
    // Nothing has run: Chapter-5 requires the extraction and Chapter-4.
    let err = pipeline.controller.run_stage("Chapter-5").await.unwrap_err();
    assert!(matches!(err, ControllerError::MissingPrerequisite { .. }));

    let err = pipeline.controller.run_stage("Chapter-9").await.unwrap_err();
    assert!(matches!(err, ControllerError::UnknownStage(_)));
}

#[tokio::test]
async fn failed_chapter_4_blocks_chapter_5_but_not_others() {
    let pipeline = build_pipeline().await;
    // Remove the Chapter-4 route: its generation fails fatally.
    let routes: Vec<(&'static str, Value)> = scripted_routes()
        .into_iter()
        .filter(|(prefix, _)| !prefix.starts_with("Chapter-4"))
        .collect();
    let provider = Arc::new(RoutingProvider::new(routes));
    let ai = Arc::new(AiGateway::new(provider, 4));
    let finder = Arc::new(DocumentFinder::new(
        pipeline.config.clone(),
        pipeline.store.clone(),
    ));
    finder.ensure_initialized(&ai).await.unwrap();
    let ctx = StageContext {
        config: pipeline.config.clone(),
        store: pipeline.store.clone(),
        ai,
        finder,
        catalog: Arc::new(ControlCatalog::load().unwrap()),
        run_date: chrono::NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
    };
    let controller = AuditController::new(ctx, all_runners());

    let summary = controller.run_all(false).await.unwrap();
    let status_of = |name: &str| {
        summary
            .stages
            .iter()
            .find(|s| s.stage == name)
            .map(|s| s.status)
            .unwrap()
    };
    assert_eq!(status_of("Chapter-4"), StageStatus::Failed);
    assert_eq!(status_of("Chapter-5"), StageStatus::Blocked);
    assert_eq!(status_of("Chapter-1"), StageStatus::Completed);
    assert_eq!(status_of("Chapter-7"), StageStatus::Completed);
    assert!(summary.any_failed());
}
