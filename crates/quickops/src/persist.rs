//! Byte-level storage behind the anchor and settings files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use eyre::{Result, WrapErr};

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Contents of `path`, or `None` if it does not exist.
    async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()>;
}

/// The real filesystem. Writes go through a sibling temp file and a rename.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPersistence;

#[async_trait]
impl Persistence for FsPersistence {
    async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).wrap_err_with(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .wrap_err_with(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .wrap_err_with(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

/// In-memory storage with a write counter and a failure switch, for tests
/// and dry runs.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), bytes.into());
    }

    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(self.get(path))
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            eyre::bail!("write to {} refused", path.display());
        }
        self.insert(path, bytes);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_read_missing_is_none() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("nope.json");
        assert!(FsPersistence.read(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_write_creates_parents() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(".quickops/anchors.json");
        FsPersistence.write(&path, b"{}").await.unwrap();
        assert_eq!(FsPersistence.read(&path).await.unwrap().unwrap(), b"{}");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_memory_failure_switch() {
        let mem = MemoryPersistence::new();
        let path = Path::new("/x.json");
        mem.write(path, b"1").await.unwrap();
        mem.set_fail_writes(true);
        assert!(mem.write(path, b"2").await.is_err());
        assert_eq!(mem.get(path).unwrap(), b"1");
        assert_eq!(mem.write_count(), 1);
    }
}
