/// Application cache store
///
/// The health cache probe, the performance metrics window, and the restore
/// flow's cache flush all go through this seam. `FileCache` matches the
/// file-driver deployments this tool targets; `MemoryCache` backs tests.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub trait CacheStore {
    /// Get a value, honoring expiry
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    fn forget(&self, key: &str) -> Result<()>;
    /// Remove every entry
    fn flush(&self) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    value: String,
    expires_at: i64,
}

/// File-backed cache, one JSON entry per key
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        // Keys are namespaced identifiers; anything unexpected is flattened
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.cache", safe))
    }
}

impl CacheStore for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.entry_path(key);
        let content = fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = serde_json::from_str(&content).ok()?;

        if entry.expires_at < Utc::now().timestamp() {
            let _ = fs::remove_file(&path);
            return None;
        }
        Some(entry.value)
    }

    fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache dir {}", self.dir.display()))?;

        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: Utc::now().timestamp() + ttl_secs as i64,
        };
        let path = self.entry_path(key);
        fs::write(&path, serde_json::to_string(&entry)?)
            .with_context(|| format!("Failed to write cache entry {}", path.display()))
    }

    fn forget(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove cache entry {}", path.display()))?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if !self.dir.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "cache").unwrap_or(false) {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// In-memory cache for tests and ephemeral use
#[derive(Default)]
pub struct MemoryCache {
    entries: std::sync::Mutex<std::collections::HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at >= Utc::now().timestamp() => {
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: Utc::now().timestamp() + ttl_secs as i64,
            },
        );
        Ok(())
    }

    fn forget(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }
}
