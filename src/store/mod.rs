//! Blob store abstraction.
//!
//! The pipeline reads source PDFs and writes every artifact through this
//! trait. Keys are `/`-separated paths relative to the store root; the
//! store makes no schema decisions. Transient failures are retried inside
//! the JSON helpers so call sites stay linear.

pub mod local;
pub mod paths;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use local::LocalStore;

/// Error classification the rest of the pipeline acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    NotFound,
    PermissionDenied,
    /// Worth retrying.
    Transient,
    Fatal,
}

#[derive(Debug, Error)]
#[error("store error ({kind:?}) for '{key}': {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub key: String,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, key, "blob does not exist")
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }
}

/// Capability contract over a blob store.
pub trait ObjectStore: Send + Sync {
    /// Lists all keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    fn read_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Writes atomically: readers never observe a partial blob.
    fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError>;

    /// Moves a blob to a new key (archive semantics).
    fn move_blob(&self, from: &str, to: &str) -> Result<(), StoreError>;
}

const TRANSIENT_ATTEMPTS: u32 = 3;

fn with_transient_retry<T>(
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.kind == StoreErrorKind::Transient && attempt + 1 < TRANSIENT_ATTEMPTS => {
                attempt += 1;
                tracing::warn!(key = %e.key, attempt, "transient store error, retrying");
            }
            other => return other,
        }
    }
}

/// JSON convenience layer over any `ObjectStore`.
pub trait JsonStore {
    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError>;
    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError>;
}

impl<S: ObjectStore + ?Sized> JsonStore for S {
    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        let bytes = with_transient_retry(|| self.read_bytes(key))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::new(StoreErrorKind::Fatal, key, format!("invalid JSON: {e}")))
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| {
            StoreError::new(StoreErrorKind::Fatal, key, format!("serialization failed: {e}"))
        })?;
        with_transient_retry(|| self.write_bytes(key, &bytes))
    }
}
