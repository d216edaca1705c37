//! Filesystem-backed blob store.
//!
//! Keys map 1:1 to paths under the root directory. Writes go through a
//! temp file + rename so a crash never leaves a half-written artifact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{ObjectStore, StoreError, StoreErrorKind};

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        // Keys are store-internal; path traversal is a caller bug.
        if key.split('/').any(|seg| seg == "..") || key.starts_with('/') {
            return Err(StoreError::new(
                StoreErrorKind::Fatal,
                key,
                "key must be a relative path without '..'",
            ));
        }
        Ok(self.root.join(key))
    }

    fn map_io(key: &str, err: std::io::Error) -> StoreError {
        let kind = match err.kind() {
            ErrorKind::NotFound => StoreErrorKind::NotFound,
            ErrorKind::PermissionDenied => StoreErrorKind::PermissionDenied,
            ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                StoreErrorKind::Transient
            }
            _ => StoreErrorKind::Fatal,
        };
        StoreError::new(kind, key, err.to_string())
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.collect_keys(&path, out)?;
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        if self.root.exists() {
            self.collect_keys(&self.root.clone(), &mut keys)
                .map_err(|e| Self::map_io(prefix, e))?;
        }
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn read_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|e| Self::map_io(key, e))
    }

    fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::map_io(key, e))?;
        }
        let tmp = path.with_extension("tmp-write");
        fs::write(&tmp, bytes).map_err(|e| Self::map_io(key, e))?;
        fs::rename(&tmp, &path).map_err(|e| Self::map_io(key, e))
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.path_for(key)?.is_file())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        for key in self.list(prefix)? {
            let path = self.path_for(&key)?;
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Self::map_io(&key, e)),
            }
        }
        Ok(())
    }

    fn move_blob(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let src = self.path_for(from)?;
        let dst = self.path_for(to)?;
        if !src.is_file() {
            return Err(StoreError::not_found(from));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::map_io(to, e))?;
        }
        fs::rename(&src, &dst).map_err(|e| Self::map_io(from, e))
    }
}
