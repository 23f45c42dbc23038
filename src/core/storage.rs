/// Backup storage backend
///
/// Backups are stored as blobs under namespaced key paths
/// (`backups/{type}/{filename}`). The orchestrator is agnostic to where the
/// blobs live; `LocalStorage` keeps them under a root directory, and
/// `MemoryStorage` backs the test suite.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub trait BackupStorage {
    fn put(&self, path: &str, content: &[u8]) -> Result<()>;
    fn get(&self, path: &str) -> Result<Vec<u8>>;
    fn exists(&self, path: &str) -> bool;
    fn delete(&self, path: &str) -> Result<()>;
    fn size(&self, path: &str) -> Result<u64>;
    /// Unix timestamp of the last modification
    fn last_modified(&self, path: &str) -> Result<i64>;
    /// List file paths directly under a prefix
    fn files(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Storage rooted at a local directory
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl BackupStorage for LocalStorage {
    fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&full, content)
            .with_context(|| format!("Failed to write {}", full.display()))
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        fs::read(&full).with_context(|| format!("Failed to read {}", full.display()))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        fs::remove_file(&full).with_context(|| format!("Failed to delete {}", full.display()))
    }

    fn size(&self, path: &str) -> Result<u64> {
        let full = self.resolve(path);
        let metadata = fs::metadata(&full)
            .with_context(|| format!("Failed to stat {}", full.display()))?;
        Ok(metadata.len())
    }

    fn last_modified(&self, path: &str) -> Result<i64> {
        let full = self.resolve(path);
        let metadata = fs::metadata(&full)
            .with_context(|| format!("Failed to stat {}", full.display()))?;
        let modified = metadata.modified().context("Modification time unavailable")?;
        let ts = modified
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(ts)
    }

    fn files(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve(prefix);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
        {
            let entry = entry?;
            if entry.path().is_file() {
                paths.push(format!("{}/{}", prefix, entry.file_name().to_string_lossy()));
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// In-memory storage for tests, with controllable modification times
#[derive(Default)]
pub struct MemoryStorage {
    entries: std::sync::Mutex<std::collections::HashMap<String, (Vec<u8>, i64)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the recorded modification time of an entry
    pub fn set_last_modified(&self, path: &str, timestamp: i64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(path) {
            entry.1 = timestamp;
        }
    }
}

impl BackupStorage for MemoryStorage {
    fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.entries
            .lock()
            .unwrap()
            .insert(path.to_string(), (content.to_vec(), now));
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .map(|(content, _)| content.clone())
            .ok_or_else(|| anyhow!("Not found: {}", path))
    }

    fn exists(&self, path: &str) -> bool {
        self.entries.lock().unwrap().contains_key(path)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| anyhow!("Not found: {}", path))
    }

    fn size(&self, path: &str) -> Result<u64> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .map(|(content, _)| content.len() as u64)
            .ok_or_else(|| anyhow!("Not found: {}", path))
    }

    fn last_modified(&self, path: &str) -> Result<i64> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .map(|(_, ts)| *ts)
            .ok_or_else(|| anyhow!("Not found: {}", path))
    }

    fn files(&self, prefix: &str) -> Result<Vec<String>> {
        let needle = format!("{}/", prefix);
        let mut paths: Vec<String> = self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(&needle))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_storage_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage.put("backups/database/a.sql.gz", b"dump").unwrap();
        assert!(storage.exists("backups/database/a.sql.gz"));
        assert_eq!(storage.get("backups/database/a.sql.gz").unwrap(), b"dump");
        assert_eq!(storage.size("backups/database/a.sql.gz").unwrap(), 4);
        assert!(storage.last_modified("backups/database/a.sql.gz").unwrap() > 0);

        storage.delete("backups/database/a.sql.gz").unwrap();
        assert!(!storage.exists("backups/database/a.sql.gz"));
    }

    #[test]
    fn test_local_storage_listing() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage.put("backups/files/b.zip", b"b").unwrap();
        storage.put("backups/files/a.tar.gz", b"a").unwrap();
        storage.put("backups/config/c.json", b"c").unwrap();

        let files = storage.files("backups/files").unwrap();
        assert_eq!(files, vec!["backups/files/a.tar.gz", "backups/files/b.zip"]);
        assert!(storage.files("backups/missing").unwrap().is_empty());
    }

    #[test]
    fn test_memory_storage_listing_and_mtime() {
        let storage = MemoryStorage::new();
        storage.put("backups/database/a", b"x").unwrap();
        storage.put("backups/database/b", b"y").unwrap();

        storage.set_last_modified("backups/database/a", 100);
        assert_eq!(storage.last_modified("backups/database/a").unwrap(), 100);
        assert_eq!(
            storage.files("backups/database").unwrap(),
            vec!["backups/database/a", "backups/database/b"]
        );
    }
}
