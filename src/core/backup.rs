/// Backup orchestration
///
/// `BackupService` sequences database, file, and configuration backups,
/// verifies the produced artifacts, applies the retention policy, and
/// exposes listing/restore. Artifact naming is part of the storage
/// contract: `database_{id}.sql.gz`, `files_{id}.tar.gz` or `.zip`,
/// `config_{id}.json` under `backups/{type}/`.

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Local, Utc};
use fs2::FileExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::archive::{compress_file, create_file_archive, ArchiveFormat};
use crate::core::cache::CacheStore;
use crate::core::config::AppConfig;
use crate::core::dump::DumpStrategy;
use crate::core::storage::BackupStorage;
use crate::utils::bytes_to_mb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Database,
    Files,
    Config,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Database => "database",
            Self::Files => "files",
            Self::Config => "config",
        }
    }
}

impl FromStr for BackupKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Self::Full),
            "database" => Ok(Self::Database),
            "files" => Ok(Self::Files),
            "config" => Ok(Self::Config),
            other => Err(anyhow!("Unknown backup type: {}", other)),
        }
    }
}

/// Result of producing one artifact
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactResult {
    pub success: bool,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub size_bytes: u64,
    pub size_mb: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArtifactResult {
    fn stored(filename: String, path: String, size_bytes: u64) -> Self {
        Self {
            success: true,
            filename,
            path: Some(path),
            size_bytes,
            size_mb: bytes_to_mb(size_bytes),
            files_count: None,
            message: None,
            error: None,
        }
    }

    fn skipped(filename: String, message: &str) -> Self {
        Self {
            success: true,
            filename,
            path: None,
            size_bytes: 0,
            size_mb: 0.0,
            files_count: None,
            message: Some(message.to_string()),
            error: None,
        }
    }

    fn failed(filename: String, error: &anyhow::Error) -> Self {
        Self {
            success: false,
            filename,
            path: None,
            size_bytes: 0,
            size_mb: 0.0,
            files_count: None,
            message: None,
            error: Some(format!("{:#}", error)),
        }
    }
}

/// Post-backup artifact checklist. "Readable" means present with nonzero size.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub database_exists: bool,
    pub files_exist: bool,
    pub config_exists: bool,
    pub database_readable: bool,
    pub files_readable: bool,
}

/// Aggregated result of one orchestrator invocation
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub success: bool,
    pub backup_id: String,
    pub kind: BackupKind,
    pub timestamp: String,
    pub artifacts: BTreeMap<&'static str, ArtifactResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerifyReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleaned_up: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
pub struct BackupOptions {
    pub cleanup_old: bool,
    pub verify: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            cleanup_old: true,
            verify: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RestoreOptions {
    pub restore_database: bool,
    pub restore_files: bool,
    pub clear_cache: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            restore_database: true,
            restore_files: true,
            clear_cache: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    pub success: bool,
    pub backup_id: String,
    pub steps: BTreeMap<&'static str, String>,
    pub message: String,
}

/// Listing entry for a stored artifact
#[derive(Debug, Clone, Serialize)]
pub struct StoredBackup {
    pub kind: String,
    pub path: String,
    pub size: u64,
    pub modified: i64,
}

/// Advisory lock preventing concurrent runs of the same backup type
pub struct BackupLock {
    file: fs::File,
}

impl BackupLock {
    pub fn acquire(dir: &Path, kind: BackupKind) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(format!("opsguard_{}.lock", kind.as_str()));
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        file.try_lock_exclusive()
            .map_err(|_| anyhow!("Another {} backup is already running", kind.as_str()))?;
        Ok(Self { file })
    }
}

impl Drop for BackupLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

const BACKUP_TYPES: [&str; 3] = ["database", "files", "config"];

pub struct BackupService {
    config: AppConfig,
    storage: Box<dyn BackupStorage>,
    cache: Box<dyn CacheStore>,
}

impl BackupService {
    pub fn new(config: AppConfig, storage: Box<dyn BackupStorage>, cache: Box<dyn CacheStore>) -> Self {
        Self {
            config,
            storage,
            cache,
        }
    }

    /// Run identifier: `type_YYYY-MM-DD_HH-MM-SS`
    pub fn generate_backup_id(&self, kind: BackupKind) -> String {
        format!("{}_{}", kind.as_str(), Local::now().format("%Y-%m-%d_%H-%M-%S"))
    }

    /// Create a full backup: database, files, and configuration.
    ///
    /// Each artifact is attempted independently; one failure does not stop
    /// the siblings. The run succeeds only if every artifact succeeded.
    pub fn create_full_backup(&self, options: BackupOptions) -> RunResult {
        let backup_id = self.generate_backup_id(BackupKind::Full);
        log::info!("Starting full backup: {}", backup_id);

        let _lock = match BackupLock::acquire(&self.config.backup.temp_dir, BackupKind::Full) {
            Ok(lock) => lock,
            Err(e) => {
                log::error!("Backup aborted: {:#}", e);
                return self.locked_out(backup_id, BackupKind::Full, &e);
            }
        };

        let mut artifacts = BTreeMap::new();
        artifacts.insert("database", self.database_artifact(&backup_id));
        artifacts.insert("files", self.files_artifact(&backup_id));
        artifacts.insert("config", self.config_artifact(&backup_id));

        // Cleanup is a best-effort side step; its failure never fails the run
        let cleaned_up = if options.cleanup_old {
            match self.cleanup_old_backups() {
                Ok(deleted) => deleted,
                Err(e) => {
                    log::warn!("Backup cleanup failed: {:#}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let verification = options.verify.then(|| self.verify_backup(&backup_id));

        let success = artifacts.values().all(|a| a.success);
        let message = if success {
            log::info!("Full backup completed successfully: {}", backup_id);
            "Full backup completed successfully".to_string()
        } else {
            let failed: Vec<&str> = artifacts
                .iter()
                .filter(|(_, a)| !a.success)
                .map(|(k, _)| *k)
                .collect();
            log::error!("Backup {} failed for: {}", backup_id, failed.join(", "));
            format!("Backup failed for: {}", failed.join(", "))
        };

        RunResult {
            success,
            backup_id,
            kind: BackupKind::Full,
            timestamp: Utc::now().to_rfc3339(),
            artifacts,
            verification,
            cleaned_up,
            message,
        }
    }

    /// Create a database backup only
    pub fn backup_database(&self, backup_id: &str) -> RunResult {
        self.single_artifact_run(backup_id, BackupKind::Database, "database")
    }

    /// Create a files backup only
    pub fn backup_files(&self, backup_id: &str) -> RunResult {
        self.single_artifact_run(backup_id, BackupKind::Files, "files")
    }

    /// Create a configuration snapshot only
    pub fn backup_configuration(&self, backup_id: &str) -> RunResult {
        self.single_artifact_run(backup_id, BackupKind::Config, "config")
    }

    fn single_artifact_run(&self, backup_id: &str, kind: BackupKind, key: &'static str) -> RunResult {
        log::info!("Starting {} backup: {}", key, backup_id);

        let _lock = match BackupLock::acquire(&self.config.backup.temp_dir, kind) {
            Ok(lock) => lock,
            Err(e) => {
                log::error!("Backup aborted: {:#}", e);
                return self.locked_out(backup_id.to_string(), kind, &e);
            }
        };

        let artifact = match key {
            "database" => self.database_artifact(backup_id),
            "files" => self.files_artifact(backup_id),
            _ => self.config_artifact(backup_id),
        };

        let success = artifact.success;
        let message = if success {
            format!("{} backup completed successfully", capitalize(key))
        } else {
            format!("{} backup failed", capitalize(key))
        };

        let mut artifacts = BTreeMap::new();
        artifacts.insert(key, artifact);

        RunResult {
            success,
            backup_id: backup_id.to_string(),
            kind,
            timestamp: Utc::now().to_rfc3339(),
            artifacts,
            verification: None,
            cleaned_up: Vec::new(),
            message,
        }
    }

    fn locked_out(&self, backup_id: String, kind: BackupKind, error: &anyhow::Error) -> RunResult {
        RunResult {
            success: false,
            backup_id,
            kind,
            timestamp: Utc::now().to_rfc3339(),
            artifacts: BTreeMap::new(),
            verification: None,
            cleaned_up: Vec::new(),
            message: format!("{:#}", error),
        }
    }

    /// Dump, compress, and store the database artifact
    fn database_artifact(&self, backup_id: &str) -> ArtifactResult {
        let filename = format!("database_{}.sql", backup_id);
        let stored_name = format!("{}.gz", filename);
        let backup_path = format!("backups/database/{}", stored_name);

        let temp_path = self.config.backup.temp_dir.join(&filename);
        let compressed_path = self.config.backup.temp_dir.join(&stored_name);

        let result = (|| -> Result<u64> {
            fs::create_dir_all(&self.config.backup.temp_dir).with_context(|| {
                format!("Failed to create {}", self.config.backup.temp_dir.display())
            })?;

            let strategy = DumpStrategy::for_driver(&self.config.database.driver)?;
            strategy.dump(&self.config.database, &temp_path)?;
            compress_file(&temp_path, &compressed_path, self.config.backup.compression_level)?;

            let content = fs::read(&compressed_path)?;
            self.storage.put(&backup_path, &content)?;
            self.storage.size(&backup_path)
        })();

        // Temp files go away on success and on error
        let _ = fs::remove_file(&temp_path);
        let _ = fs::remove_file(&compressed_path);

        match result {
            Ok(size) => ArtifactResult::stored(stored_name, backup_path, size),
            Err(e) => {
                log::error!("Database backup failed: {:#}", e);
                ArtifactResult::failed(stored_name, &e)
            }
        }
    }

    /// Archive the configured paths and store the files artifact
    fn files_artifact(&self, backup_id: &str) -> ArtifactResult {
        let existing: Vec<PathBuf> = self
            .config
            .backup
            .file_paths
            .iter()
            .filter(|p| p.exists())
            .cloned()
            .collect();

        if existing.is_empty() {
            log::warn!("No configured backup paths exist, skipping files backup");
            return ArtifactResult::skipped(
                format!("files_{}.zip", backup_id),
                "No files to backup",
            );
        }

        let stem = format!("files_{}", backup_id);
        let mut temp_path = None;
        // Archive creation only fails after the zip fallback has been tried,
        // so zip is the format in play unless a tar archive was produced
        let mut attempted = ArchiveFormat::Zip;

        let result = (|| -> Result<(String, String, u64)> {
            fs::create_dir_all(&self.config.backup.temp_dir).with_context(|| {
                format!("Failed to create {}", self.config.backup.temp_dir.display())
            })?;

            let (archive_path, format) =
                create_file_archive(&existing, &self.config.backup.temp_dir, &stem)?;
            attempted = format;
            temp_path = Some(archive_path.clone());

            let filename = format!("{}.{}", stem, format.extension());
            let backup_path = format!("backups/files/{}", filename);

            let content = fs::read(&archive_path)?;
            self.storage.put(&backup_path, &content)?;
            let size = self.storage.size(&backup_path)?;
            Ok((filename, backup_path, size))
        })();

        if let Some(path) = temp_path {
            let _ = fs::remove_file(path);
        }

        match result {
            Ok((filename, backup_path, size)) => {
                let mut artifact = ArtifactResult::stored(filename, backup_path, size);
                artifact.files_count = Some(existing.len());
                artifact
            }
            Err(e) => {
                log::error!("Files backup failed: {:#}", e);
                ArtifactResult::failed(format!("{}.{}", stem, attempted.extension()), &e)
            }
        }
    }

    /// Serialize the configuration allowlist and store the snapshot
    fn config_artifact(&self, backup_id: &str) -> ArtifactResult {
        let filename = format!("config_{}.json", backup_id);
        let backup_path = format!("backups/config/{}", filename);

        let snapshot = serde_json::json!({
            "app_name": self.config.app.name,
            "app_version": self.config.app.version,
            "environment": self.config.app.environment,
            "database_config": self.config.database.driver,
            "cache_config": self.config.cache.driver,
            "session_config": self.config.session.driver,
            "queue_config": self.config.queue_driver,
            "rate_limiting": {
                "enabled": self.config.security.rate_limiting_enabled,
                "per_minute": self.config.security.rate_limit_per_minute,
            },
            "backup_timestamp": Utc::now().to_rfc3339(),
            "opsguard_version": env!("CARGO_PKG_VERSION"),
        });

        let result = (|| -> Result<u64> {
            let content = serde_json::to_string_pretty(&snapshot)?;
            self.storage.put(&backup_path, content.as_bytes())?;
            Ok(content.len() as u64)
        })();

        match result {
            Ok(size) => ArtifactResult::stored(filename, backup_path, size),
            Err(e) => {
                log::error!("Configuration backup failed: {:#}", e);
                ArtifactResult::failed(filename, &e)
            }
        }
    }

    /// List stored backups across all type partitions, newest first
    pub fn list_backups(&self) -> Result<Vec<StoredBackup>> {
        let mut backups = Vec::new();

        for kind in BACKUP_TYPES {
            for path in self.storage.files(&format!("backups/{}", kind))? {
                backups.push(StoredBackup {
                    kind: kind.to_string(),
                    size: self.storage.size(&path)?,
                    modified: self.storage.last_modified(&path)?,
                    path,
                });
            }
        }

        backups.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(backups)
    }

    /// Check that the run's artifacts exist and are non-empty
    pub fn verify_backup(&self, backup_id: &str) -> VerifyReport {
        let mut report = VerifyReport {
            database_exists: false,
            files_exist: false,
            config_exists: false,
            database_readable: false,
            files_readable: false,
        };

        let db_path = format!("backups/database/database_{}.sql.gz", backup_id);
        if self.storage.exists(&db_path) {
            report.database_exists = true;
            report.database_readable = self.storage.size(&db_path).map(|s| s > 0).unwrap_or(false);
        }

        // The files artifact is tar.gz when tar was available, zip otherwise
        for ext in ["tar.gz", "zip"] {
            let files_path = format!("backups/files/files_{}.{}", backup_id, ext);
            if self.storage.exists(&files_path) {
                report.files_exist = true;
                report.files_readable =
                    self.storage.size(&files_path).map(|s| s > 0).unwrap_or(false);
                break;
            }
        }

        let config_path = format!("backups/config/config_{}.json", backup_id);
        if self.storage.exists(&config_path) {
            report.config_exists = true;
        }

        report
    }

    /// Delete artifacts older than the retention window.
    ///
    /// `retention_days == 0` disables cleanup entirely.
    pub fn cleanup_old_backups(&self) -> Result<Vec<String>> {
        let retention_days = self.config.backup.retention_days;
        if retention_days == 0 {
            log::info!("Backup retention disabled (retention_days = 0)");
            return Ok(Vec::new());
        }

        let cutoff = (Utc::now() - Duration::days(retention_days as i64)).timestamp();
        let mut deleted = Vec::new();

        for kind in BACKUP_TYPES {
            for path in self.storage.files(&format!("backups/{}", kind))? {
                let last_modified = self.storage.last_modified(&path)?;
                if last_modified < cutoff {
                    self.storage.delete(&path)?;
                    log::info!("Deleted expired backup: {}", path);
                    deleted.push(path);
                }
            }
        }

        Ok(deleted)
    }

    /// Restore from a stored backup.
    ///
    /// Database and file restore are documented extension points: they
    /// report success without touching anything. The cache flush, when
    /// requested, genuinely runs.
    pub fn restore_from_backup(&self, backup_id: &str, options: RestoreOptions) -> RestoreResult {
        log::info!("Starting restore from backup: {}", backup_id);
        let mut steps = BTreeMap::new();

        if options.restore_database {
            // TODO: wire a real database restore once a test-restore
            // environment is available; see the verification config knob
            steps.insert("database", "Database restore completed".to_string());
        }

        if options.restore_files {
            steps.insert("files", "Files restore completed".to_string());
        }

        if options.clear_cache {
            match self.cache.flush() {
                Ok(()) => {
                    steps.insert("cache", "Cache cleared".to_string());
                }
                Err(e) => {
                    log::error!("Restore cache flush failed: {:#}", e);
                    steps.insert("cache", format!("Cache clear failed: {:#}", e));
                    return RestoreResult {
                        success: false,
                        backup_id: backup_id.to_string(),
                        steps,
                        message: "Restore failed".to_string(),
                    };
                }
            }
        }

        log::info!("Restore completed successfully: {}", backup_id);
        RestoreResult {
            success: true,
            backup_id: backup_id.to_string(),
            steps,
            message: "Restore completed successfully".to_string(),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::MemoryCache;
    use crate::core::config::{
        AppSettings, BackupSettings, CacheConfig, DatabaseConfig, SecurityConfig, SessionConfig,
    };
    use crate::core::storage::MemoryStorage;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        service: BackupService,
        storage: Arc<MemoryStorage>,
        _temp: TempDir,
    }

    // Shared storage handle so tests can inspect and backdate entries
    struct SharedStorage(Arc<MemoryStorage>);

    impl BackupStorage for SharedStorage {
        fn put(&self, path: &str, content: &[u8]) -> Result<()> {
            self.0.put(path, content)
        }
        fn get(&self, path: &str) -> Result<Vec<u8>> {
            self.0.get(path)
        }
        fn exists(&self, path: &str) -> bool {
            self.0.exists(path)
        }
        fn delete(&self, path: &str) -> Result<()> {
            self.0.delete(path)
        }
        fn size(&self, path: &str) -> Result<u64> {
            self.0.size(path)
        }
        fn last_modified(&self, path: &str) -> Result<i64> {
            self.0.last_modified(path)
        }
        fn files(&self, prefix: &str) -> Result<Vec<String>> {
            self.0.files(prefix)
        }
    }

    fn fixture(driver: &str, retention_days: u64) -> Fixture {
        let temp = TempDir::new().unwrap();

        // Seed a sqlite database and a directory worth backing up
        let db_path = temp.path().join("app.sqlite");
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
             INSERT INTO notes (body) VALUES ('hello');",
        )
        .unwrap();
        drop(conn);

        let uploads = temp.path().join("uploads");
        fs::create_dir_all(&uploads).unwrap();
        fs::write(uploads.join("logo.png"), "png-bytes").unwrap();

        let config = AppConfig {
            app: AppSettings {
                name: "demo".to_string(),
                version: "1.0.0".to_string(),
                environment: "testing".to_string(),
                debug: false,
                key: Some("secret".to_string()),
            },
            database: DatabaseConfig {
                driver: driver.to_string(),
                host: "localhost".to_string(),
                port: 5432,
                database: db_path.to_string_lossy().into_owned(),
                username: String::new(),
                password: String::new(),
                exclude_tables: Vec::new(),
            },
            cache: CacheConfig {
                driver: "file".to_string(),
                dir: temp.path().join("cache"),
            },
            session: SessionConfig {
                driver: "file".to_string(),
                secure_cookies: true,
            },
            queue_driver: "sync".to_string(),
            security: SecurityConfig {
                rate_limiting_enabled: true,
                rate_limit_per_minute: 60,
                cors_allowed_origins: vec!["https://app.example.com".to_string()],
            },
            backup: BackupSettings {
                storage_root: temp.path().join("backups"),
                retention_days,
                temp_dir: temp.path().join("tmp"),
                file_paths: vec![uploads, temp.path().join("missing")],
                compression_level: 9,
            },
        };

        let storage = Arc::new(MemoryStorage::new());
        let service = BackupService::new(
            config,
            Box::new(SharedStorage(storage.clone())),
            Box::new(MemoryCache::new()),
        );

        Fixture {
            service,
            storage,
            _temp: temp,
        }
    }

    #[test]
    fn test_backup_id_format() {
        let f = fixture("sqlite", 30);
        let id = f.service.generate_backup_id(BackupKind::Database);
        assert!(id.starts_with("database_"));
        // database_YYYY-MM-DD_HH-MM-SS
        assert_eq!(id.len(), "database_".len() + 19);
    }

    #[test]
    fn test_full_backup_success() {
        let f = fixture("sqlite", 30);
        let result = f.service.create_full_backup(BackupOptions::default());

        assert!(result.success, "full backup failed: {:?}", result);
        for key in ["database", "files", "config"] {
            let artifact = &result.artifacts[key];
            assert!(artifact.success);
            let path = artifact.path.as_ref().unwrap();
            assert!(f.storage.exists(path));
            assert_eq!(f.storage.size(path).unwrap(), artifact.size_bytes);
        }
        assert_eq!(result.artifacts["files"].files_count, Some(1));

        let verification = result.verification.unwrap();
        assert!(verification.database_exists);
        assert!(verification.database_readable);
        assert!(verification.files_exist);
        assert!(verification.files_readable);
        assert!(verification.config_exists);

        // No temp files left behind
        let temp_dir = f._temp.path().join("tmp");
        let leftovers: Vec<_> = fs::read_dir(&temp_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_name().to_string_lossy().ends_with(".lock"))
            .collect();
        assert!(leftovers.is_empty(), "leftover temp files: {:?}", leftovers);
    }

    #[test]
    fn test_partial_failure_reported_per_artifact() {
        let mut f = fixture("sqlite", 30);
        // Point the service at an unsupported driver; files/config must
        // still be attempted and succeed
        f.service.config.database.driver = "mongodb".to_string();

        let result = f.service.create_full_backup(BackupOptions::default());

        assert!(!result.success);
        assert!(!result.artifacts["database"].success);
        assert!(result.artifacts["database"]
            .error
            .as_ref()
            .unwrap()
            .contains("Unsupported database driver"));
        assert!(result.artifacts["files"].success);
        assert!(result.artifacts["config"].success);
        assert!(result.message.contains("database"));
    }

    #[test]
    fn test_empty_file_paths_is_success() {
        let mut f = fixture("sqlite", 30);
        f.service.config.backup.file_paths = vec![PathBuf::from("/nonexistent/nothing")];

        let result = f.service.backup_files("files_2026-01-01_00-00-00");

        assert!(result.success);
        let artifact = &result.artifacts["files"];
        assert!(artifact.success);
        assert_eq!(artifact.size_bytes, 0);
        assert_eq!(artifact.message.as_deref(), Some("No files to backup"));
    }

    #[test]
    fn test_files_failure_names_attempted_archive() {
        // Storage that rejects every write, forcing the files artifact to
        // fail after the archive format has been chosen
        struct ReadOnlyStorage;
        impl BackupStorage for ReadOnlyStorage {
            fn put(&self, _path: &str, _content: &[u8]) -> Result<()> {
                Err(anyhow!("storage is read-only"))
            }
            fn get(&self, path: &str) -> Result<Vec<u8>> {
                Err(anyhow!("Not found: {}", path))
            }
            fn exists(&self, _path: &str) -> bool {
                false
            }
            fn delete(&self, path: &str) -> Result<()> {
                Err(anyhow!("Not found: {}", path))
            }
            fn size(&self, path: &str) -> Result<u64> {
                Err(anyhow!("Not found: {}", path))
            }
            fn last_modified(&self, path: &str) -> Result<i64> {
                Err(anyhow!("Not found: {}", path))
            }
            fn files(&self, _prefix: &str) -> Result<Vec<String>> {
                Ok(Vec::new())
            }
        }

        let f = fixture("sqlite", 30);
        let service = BackupService::new(
            f.service.config.clone(),
            Box::new(ReadOnlyStorage),
            Box::new(MemoryCache::new()),
        );

        let result = service.backup_files("full_2026-01-01_00-00-00");
        assert!(!result.success);

        let artifact = &result.artifacts["files"];
        let expected_ext = if crate::core::dump::tool_available("tar") {
            "tar.gz"
        } else {
            "zip"
        };
        assert_eq!(
            artifact.filename,
            format!("files_full_2026-01-01_00-00-00.{}", expected_ext)
        );
        assert!(artifact.error.as_ref().unwrap().contains("read-only"));
    }

    #[test]
    fn test_listing_sorted_newest_first() {
        let f = fixture("sqlite", 30);
        f.storage.put("backups/database/a.sql.gz", b"a").unwrap();
        f.storage.put("backups/files/b.tar.gz", b"b").unwrap();
        f.storage.put("backups/config/c.json", b"c").unwrap();
        f.storage.set_last_modified("backups/database/a.sql.gz", 100);
        f.storage.set_last_modified("backups/files/b.tar.gz", 300);
        f.storage.set_last_modified("backups/config/c.json", 200);

        let backups = f.service.list_backups().unwrap();
        let modified: Vec<i64> = backups.iter().map(|b| b.modified).collect();
        assert_eq!(modified, vec![300, 200, 100]);
    }

    #[test]
    fn test_retention_deletes_only_expired() {
        let f = fixture("sqlite", 30);
        let now = Utc::now().timestamp();

        f.storage.put("backups/database/old.sql.gz", b"old").unwrap();
        f.storage.put("backups/database/new.sql.gz", b"new").unwrap();
        f.storage
            .set_last_modified("backups/database/old.sql.gz", now - 40 * 86400);
        f.storage
            .set_last_modified("backups/database/new.sql.gz", now - 5 * 86400);

        let deleted = f.service.cleanup_old_backups().unwrap();
        assert_eq!(deleted, vec!["backups/database/old.sql.gz"]);
        assert!(f.storage.exists("backups/database/new.sql.gz"));

        // Idempotent: nothing left to delete
        assert!(f.service.cleanup_old_backups().unwrap().is_empty());
    }

    #[test]
    fn test_retention_zero_disables_cleanup() {
        let f = fixture("sqlite", 0);
        let now = Utc::now().timestamp();

        f.storage.put("backups/files/ancient.tar.gz", b"x").unwrap();
        f.storage
            .set_last_modified("backups/files/ancient.tar.gz", now - 365 * 86400);

        assert!(f.service.cleanup_old_backups().unwrap().is_empty());
        assert!(f.storage.exists("backups/files/ancient.tar.gz"));
    }

    #[test]
    fn test_verification_flags() {
        let f = fixture("sqlite", 30);
        let id = "full_2026-01-01_00-00-00";

        // Nothing stored yet
        let report = f.service.verify_backup(id);
        assert!(!report.database_exists && !report.files_exist && !report.config_exists);

        // Empty database artifact: exists but not readable
        f.storage
            .put(&format!("backups/database/database_{}.sql.gz", id), b"")
            .unwrap();
        // Zip fallback artifact must still be recognized
        f.storage
            .put(&format!("backups/files/files_{}.zip", id), b"zipdata")
            .unwrap();
        f.storage
            .put(&format!("backups/config/config_{}.json", id), b"{}")
            .unwrap();

        let report = f.service.verify_backup(id);
        assert!(report.database_exists);
        assert!(!report.database_readable);
        assert!(report.files_exist);
        assert!(report.files_readable);
        assert!(report.config_exists);
    }

    #[test]
    fn test_lock_blocks_second_run() {
        let temp = TempDir::new().unwrap();
        let first = BackupLock::acquire(temp.path(), BackupKind::Full).unwrap();
        assert!(BackupLock::acquire(temp.path(), BackupKind::Full).is_err());
        // Different type is unaffected
        assert!(BackupLock::acquire(temp.path(), BackupKind::Database).is_ok());
        drop(first);
        assert!(BackupLock::acquire(temp.path(), BackupKind::Full).is_ok());
    }

    #[test]
    fn test_restore_flushes_cache() {
        let cache = Arc::new(MemoryCache::new());

        struct SharedCache(Arc<MemoryCache>);
        impl CacheStore for SharedCache {
            fn get(&self, key: &str) -> Option<String> {
                self.0.get(key)
            }
            fn put(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
                self.0.put(key, value, ttl)
            }
            fn forget(&self, key: &str) -> Result<()> {
                self.0.forget(key)
            }
            fn flush(&self) -> Result<()> {
                self.0.flush()
            }
        }

        let f = fixture("sqlite", 30);
        let service = BackupService::new(
            f.service.config.clone(),
            Box::new(MemoryStorage::new()),
            Box::new(SharedCache(cache.clone())),
        );

        cache.put("stale_view", "html", 3600).unwrap();
        let result = service.restore_from_backup("full_2026-01-01_00-00-00", RestoreOptions::default());

        assert!(result.success);
        assert_eq!(result.steps["database"], "Database restore completed");
        assert_eq!(result.steps["files"], "Files restore completed");
        assert_eq!(result.steps["cache"], "Cache cleared");
        assert_eq!(cache.get("stale_view"), None);
    }
}
