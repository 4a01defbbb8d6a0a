//! Raw scan file storage.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::ImportError;

/// Write-once storage for uploaded scan files. Keys are relative,
/// `/`-separated paths produced by the orchestrator.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, content: &[u8]) -> Result<(), ImportError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, ImportError>;
}

fn storage_error(operation: &str, message: impl std::fmt::Display) -> ImportError {
    ImportError::Storage {
        operation: operation.to_string(),
        message: message.to_string(),
    }
}

/// Filesystem-backed blob store rooted at a configured directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key under the root, rejecting traversal components.
    fn resolve(&self, path: &str) -> Result<PathBuf, ImportError> {
        let relative = Path::new(path);
        let traversal = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if path.is_empty() || traversal {
            return Err(storage_error("resolve", format!("invalid storage path '{path}'")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, content: &[u8]) -> Result<(), ImportError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("put", e))?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| storage_error("put", e))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ImportError> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target)
            .await
            .map_err(|e| storage_error("get", e))
    }
}

/// In-memory blob store for tests.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, content: &[u8]) -> Result<(), ImportError> {
        self.blobs
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ImportError> {
        self.blobs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| storage_error("get", format!("no blob at '{path}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        store
            .put("ws1/scans/20241220_abcd_scan.nessus", b"content")
            .await
            .unwrap();
        let back = store.get("ws1/scans/20241220_abcd_scan.nessus").await.unwrap();
        assert_eq!(back, b"content");
    }

    #[tokio::test]
    async fn fs_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let err = store.put("../outside", b"x").await.unwrap_err();
        assert_eq!(err.kind(), "STORAGE_ERROR");
        assert!(store.get("").await.is_err());
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryBlobStore::new();
        store.put("a/b", b"bytes").await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), b"bytes");
        assert_eq!(store.len(), 1);
        assert!(store.get("missing").await.is_err());
    }
}
