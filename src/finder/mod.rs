//! Document finder: maps BSI categories to source documents.
//!
//! The classification map is built lazily on first use via one
//! schema-constrained AI call over the source filenames, persisted to the
//! store, and reused on every later run. When classification fails the
//! finder falls back to a degenerate all-`Sonstiges` map so the pipeline
//! keeps running with reduced precision.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::ai::{AiGateway, GenerateRequest};
use crate::config::{AppConfig, TEST_MODE_MAX_DOCUMENTS};
use crate::models::{DocumentCategory, DocumentMap};
use crate::prompts;
use crate::store::{paths, JsonStore, ObjectStore, StoreError};

#[derive(Debug, Error)]
pub enum FinderError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("document finder not initialized")]
    NotInitialized,
}

pub struct DocumentFinder {
    config: Arc<AppConfig>,
    store: Arc<dyn ObjectStore>,
    /// Built once per run; guarded so concurrent initializers do not
    /// re-run classification.
    state: Mutex<Option<DocumentMap>>,
}

impl DocumentFinder {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config,
            store,
            state: Mutex::new(None),
        }
    }

    /// Basenames of all source documents (the document identifiers).
    fn list_source_documents(&self) -> Result<Vec<String>, StoreError> {
        let keys = self.store.list(&self.config.source_prefix)?;
        Ok(keys
            .iter()
            // Skip directory placeholders the way the store layer lists them.
            .filter(|k| k.rsplit('/').next().is_some_and(|n| n.contains('.')))
            .map(|k| {
                k.strip_prefix(&self.config.source_prefix)
                    .unwrap_or(k)
                    .to_string()
            })
            .collect())
    }

    /// Blocks until the document map is built or loaded.
    pub async fn ensure_initialized(&self, ai: &AiGateway) -> Result<(), FinderError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }

        let map_key = self.config.output_key(paths::DOCUMENT_MAP);
        if self.store.exists(&map_key)? {
            tracing::info!(key = %map_key, "loading existing document map");
            *state = Some(self.store.read_json(&map_key)?);
            return Ok(());
        }

        let filenames = self.list_source_documents()?;
        let map = self.classify(ai, &filenames).await;

        // First writer wins: another process may have produced the map
        // while classification was running.
        if self.store.exists(&map_key)? {
            tracing::info!(key = %map_key, "document map appeared concurrently, loading it");
            *state = Some(self.store.read_json(&map_key)?);
            return Ok(());
        }

        self.store.write_json(&map_key, &map)?;
        tracing::info!(key = %map_key, documents = map.documents.len(), "saved document map");
        *state = Some(map);
        Ok(())
    }

    /// Classifies all source filenames; any failure yields the fallback map.
    async fn classify(&self, ai: &AiGateway, filenames: &[String]) -> DocumentMap {
        if filenames.is_empty() {
            tracing::warn!("no source documents found to classify");
            return DocumentMap::new(Vec::new());
        }

        let filename_list = filenames
            .iter()
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = prompts::fill(prompts::CLASSIFY_DOCUMENTS, &[("filenames", &filename_list)]);
        let request = GenerateRequest::new(
            prompt,
            prompts::classify_documents_schema(),
            "Document Classification",
        );

        match ai.generate_structured(&request).await {
            Ok(value) => {
                let parsed: Result<DocumentMap, _> =
                    serde_json::from_value(json!({
                        "documents": value["document_map"],
                        "version": DocumentMap::CURRENT_VERSION,
                    }));
                match parsed {
                    Ok(map) if map.covers_exactly(filenames) => {
                        tracing::info!(documents = map.documents.len(), "document classification complete");
                        map
                    }
                    Ok(_) => {
                        tracing::error!(
                            "classification result does not cover every source document exactly once; \
                             falling back to 'Sonstiges' for all documents. Document selection will be impaired."
                        );
                        DocumentMap::fallback(filenames)
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "classification result unparseable; falling back to 'Sonstiges' for all documents"
                        );
                        DocumentMap::fallback(filenames)
                    }
                }
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "AI-driven document classification failed; falling back to 'Sonstiges' for all \
                     documents. Document selection will be impaired."
                );
                DocumentMap::fallback(filenames)
            }
        }
    }

    /// Union of document identifiers in the given categories, in
    /// deterministic order. An empty match for a non-empty category list
    /// falls back to all source documents.
    pub async fn documents_for_categories(
        &self,
        categories: &[DocumentCategory],
    ) -> Result<Vec<String>, FinderError> {
        let state = self.state.lock().await;
        let map = state.as_ref().ok_or(FinderError::NotInitialized)?;

        let grouped = map.by_category();
        let mut selected: Vec<String> = categories
            .iter()
            .flat_map(|c| grouped.get(c).cloned().unwrap_or_default())
            .collect();
        selected.sort();
        selected.dedup();

        if selected.is_empty() && !categories.is_empty() {
            tracing::warn!(
                categories = ?categories.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
                "no documents found for categories, falling back to all source documents"
            );
            selected = map.documents.iter().map(|d| d.filename.clone()).collect();
            selected.sort();
        }

        if self.config.test_mode && selected.len() > TEST_MODE_MAX_DOCUMENTS {
            tracing::warn!(
                from = selected.len(),
                to = TEST_MODE_MAX_DOCUMENTS,
                "test mode: limiting context documents"
            );
            selected.truncate(TEST_MODE_MAX_DOCUMENTS);
        }
        Ok(selected)
    }

    /// Documents classified into exactly this category, sorted. Unlike
    /// `documents_for_categories` this never falls back to the full
    /// document set: an empty result means the category is absent, which
    /// callers selecting a single authoritative document must surface as
    /// an error instead of extracting from an unrelated file.
    pub async fn documents_in_category(
        &self,
        category: DocumentCategory,
    ) -> Result<Vec<String>, FinderError> {
        let state = self.state.lock().await;
        let map = state.as_ref().ok_or(FinderError::NotInitialized)?;
        let mut selected: Vec<String> = map
            .documents
            .iter()
            .filter(|d| d.category == category)
            .map(|d| d.filename.clone())
            .collect();
        selected.sort();
        Ok(selected)
    }

    /// True when at least one document of the category is classified.
    pub async fn has_category(&self, category: DocumentCategory) -> Result<bool, FinderError> {
        let state = self.state.lock().await;
        let map = state.as_ref().ok_or(FinderError::NotInitialized)?;
        Ok(map.documents.iter().any(|d| d.category == category))
    }

    /// All categories that have at least one classified document.
    pub async fn present_categories(&self) -> Result<Vec<DocumentCategory>, FinderError> {
        let state = self.state.lock().await;
        let map = state.as_ref().ok_or(FinderError::NotInitialized)?;
        let mut categories: Vec<DocumentCategory> =
            map.documents.iter().map(|d| d.category).collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    /// Store key for a document identifier.
    pub fn document_key(&self, document_id: &str) -> String {
        self.config.source_key(document_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::mock::MockProvider;
    use crate::ai::AiError;
    use crate::config::test_support::test_config;
    use crate::store::LocalStore;

    fn setup(
        responses: Vec<Result<serde_json::Value, AiError>>,
    ) -> (tempfile::TempDir, Arc<AppConfig>, Arc<LocalStore>, AiGateway, DocumentFinder) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(dir.path().to_str().unwrap()));
        let store = Arc::new(LocalStore::new(dir.path()));
        let gateway = AiGateway::new(Arc::new(MockProvider::new(responses)), 2);
        let finder = DocumentFinder::new(config.clone(), store.clone());
        (dir, config, store, gateway, finder)
    }

    fn seed_sources(store: &LocalStore) {
        store.write_bytes("source/strukturanalyse.pdf", b"pdf").unwrap();
        store.write_bytes("source/modellierung.pdf", b"pdf").unwrap();
        store.write_bytes("source/notizen.pdf", b"pdf").unwrap();
    }

    fn classification_response() -> serde_json::Value {
        json!({
            "document_map": [
                { "filename": "strukturanalyse.pdf", "category": "Strukturanalyse" },
                { "filename": "modellierung.pdf", "category": "Modellierung" },
                { "filename": "notizen.pdf", "category": "Sonstiges" }
            ]
        })
    }

    #[tokio::test]
    async fn classification_builds_and_persists_map() {
        let (_dir, config, store, gateway, finder) = setup(vec![Ok(classification_response())]);
        seed_sources(&store);

        finder.ensure_initialized(&gateway).await.unwrap();

        let map: DocumentMap = store
            .read_json(&config.output_key(paths::DOCUMENT_MAP))
            .unwrap();
        assert_eq!(map.documents.len(), 3);

        let docs = finder
            .documents_for_categories(&[DocumentCategory::Strukturanalyse])
            .await
            .unwrap();
        assert_eq!(docs, vec!["strukturanalyse.pdf".to_string()]);
    }

    #[tokio::test]
    async fn failed_classification_falls_back_to_sonstiges() {
        let (_dir, config, store, gateway, finder) =
            setup(vec![Err(AiError::Fatal("model offline".into()))]);
        seed_sources(&store);

        finder.ensure_initialized(&gateway).await.unwrap();

        let map: DocumentMap = store
            .read_json(&config.output_key(paths::DOCUMENT_MAP))
            .unwrap();
        assert_eq!(map.documents.len(), 3);
        assert!(map
            .documents
            .iter()
            .all(|d| d.category == DocumentCategory::Sonstiges));
    }

    #[tokio::test]
    async fn incomplete_classification_falls_back() {
        // Response covers only one of three files.
        let partial = json!({
            "document_map": [
                { "filename": "strukturanalyse.pdf", "category": "Strukturanalyse" }
            ]
        });
        let (_dir, config, store, gateway, finder) = setup(vec![Ok(partial)]);
        seed_sources(&store);

        finder.ensure_initialized(&gateway).await.unwrap();

        let map: DocumentMap = store
            .read_json(&config.output_key(paths::DOCUMENT_MAP))
            .unwrap();
        assert!(map
            .documents
            .iter()
            .all(|d| d.category == DocumentCategory::Sonstiges));
    }

    #[tokio::test]
    async fn existing_map_is_loaded_without_classification() {
        let (_dir, config, store, gateway, finder) =
            setup(vec![Err(AiError::Fatal("must not be called".into()))]);
        seed_sources(&store);

        let existing = DocumentMap::new(vec![crate::models::DocumentMapEntry {
            filename: "strukturanalyse.pdf".into(),
            category: DocumentCategory::Strukturanalyse,
        }]);
        store
            .write_json(&config.output_key(paths::DOCUMENT_MAP), &existing)
            .unwrap();

        finder.ensure_initialized(&gateway).await.unwrap();
        assert!(finder
            .has_category(DocumentCategory::Strukturanalyse)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn empty_category_match_falls_back_to_all_documents() {
        let (_dir, _config, store, gateway, finder) = setup(vec![Ok(classification_response())]);
        seed_sources(&store);
        finder.ensure_initialized(&gateway).await.unwrap();

        let docs = finder
            .documents_for_categories(&[DocumentCategory::Risikoanalyse])
            .await
            .unwrap();
        assert_eq!(docs.len(), 3);
    }

    #[tokio::test]
    async fn exact_category_lookup_never_falls_back() {
        // All-'Sonstiges' fallback map: the union lookup widens to every
        // document, the exact lookup must stay empty.
        let (_dir, _config, store, gateway, finder) =
            setup(vec![Err(AiError::Fatal("model offline".into()))]);
        seed_sources(&store);
        finder.ensure_initialized(&gateway).await.unwrap();

        let widened = finder
            .documents_for_categories(&[DocumentCategory::GrundschutzCheck])
            .await
            .unwrap();
        assert_eq!(widened.len(), 3);

        let exact = finder
            .documents_in_category(DocumentCategory::GrundschutzCheck)
            .await
            .unwrap();
        assert!(exact.is_empty());

        let sonstiges = finder
            .documents_in_category(DocumentCategory::Sonstiges)
            .await
            .unwrap();
        assert_eq!(sonstiges.len(), 3);
    }

    #[tokio::test]
    async fn uninitialized_lookup_is_an_error() {
        let (_dir, _config, _store, _gateway, finder) = setup(vec![]);
        let err = finder
            .documents_for_categories(&[DocumentCategory::Sonstiges])
            .await
            .unwrap_err();
        assert!(matches!(err, FinderError::NotInitialized));
    }
}
