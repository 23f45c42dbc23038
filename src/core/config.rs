/// Configuration management for .env files
///
/// Reads the deployment's .env file once and folds it into an immutable
/// `AppConfig` that is passed explicitly to every component.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigValue {
    pub key: String,
    pub value: String,
    pub comment: Option<String>,
}

/// Raw key/value view over a .env file
pub struct EnvFile {
    path: PathBuf,
    values: HashMap<String, ConfigValue>,
}

impl EnvFile {
    /// Load configuration from .env file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(anyhow!(".env file not found at {}", path.display()));
        }

        let content = fs::read_to_string(&path)
            .context("Failed to read .env file")?;

        let mut values = HashMap::new();
        let mut current_comment = None;

        for line in content.lines() {
            let line = line.trim();

            // Handle comments
            if line.starts_with('#') {
                current_comment = Some(line.trim_start_matches('#').trim().to_string());
                continue;
            }

            // Skip empty lines
            if line.is_empty() {
                current_comment = None;
                continue;
            }

            // Parse key=value
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_string();
                let value = value.trim().trim_matches('"').to_string();

                values.insert(
                    key.clone(),
                    ConfigValue {
                        key: key.clone(),
                        value,
                        comment: current_comment.take(),
                    },
                );
            }
        }

        Ok(Self { path, values })
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.value.as_str())
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
            None => default,
        }
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get all configuration keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub name: String,
    pub version: String,
    pub environment: String,
    pub debug: bool,
    pub key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub exclude_tables: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub driver: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub driver: String,
    pub secure_cookies: bool,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub rate_limiting_enabled: bool,
    pub rate_limit_per_minute: u64,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BackupSettings {
    /// Root directory of the backup storage backend
    pub storage_root: PathBuf,
    /// Days to keep backups. 0 disables automatic cleanup.
    pub retention_days: u64,
    /// Scratch directory for dump/archive staging
    pub temp_dir: PathBuf,
    /// Paths included in file backups; missing entries are skipped
    pub file_paths: Vec<PathBuf>,
    /// Gzip level for database dumps, 1-9
    pub compression_level: u32,
}

/// Immutable runtime configuration, constructed once at entry
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app: AppSettings,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub queue_driver: String,
    pub security: SecurityConfig,
    pub backup: BackupSettings,
}

impl AppConfig {
    /// Load and resolve configuration from a .env file
    pub fn load<P: AsRef<Path>>(env_path: P) -> Result<Self> {
        let env = EnvFile::load(env_path)?;
        Ok(Self::from_env_file(&env))
    }

    pub fn from_env_file(env: &EnvFile) -> Self {
        let exclude_tables = env
            .get("BACKUP_EXCLUDE_TABLES")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_else(|| vec!["cache".to_string(), "sessions".to_string(), "failed_jobs".to_string()]);

        let file_paths = env
            .get("BACKUP_PATHS")
            .map(|v| v.split(':').map(PathBuf::from).collect())
            .unwrap_or_else(|| {
                vec![
                    PathBuf::from("storage/app"),
                    PathBuf::from("public/uploads"),
                    PathBuf::from(".env"),
                ]
            });

        let cors_allowed_origins = env
            .get("CORS_ALLOWED_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_else(|| vec!["*".to_string()]);

        Self {
            app: AppSettings {
                name: env.get_or("APP_NAME", "webapp"),
                version: env.get_or("APP_VERSION", env!("CARGO_PKG_VERSION")),
                environment: env.get_or("APP_ENV", "production"),
                debug: env.get_bool("APP_DEBUG", false),
                key: env.get("APP_KEY").filter(|v| !v.is_empty()).map(|v| v.to_string()),
            },
            database: DatabaseConfig {
                driver: env.get_or("DB_CONNECTION", "sqlite"),
                host: env.get_or("DB_HOST", "127.0.0.1"),
                port: env.get_u64("DB_PORT", 5432) as u16,
                database: env.get_or("DB_DATABASE", "database.sqlite"),
                username: env.get_or("DB_USERNAME", ""),
                password: env.get_or("DB_PASSWORD", ""),
                exclude_tables,
            },
            cache: CacheConfig {
                driver: env.get_or("CACHE_DRIVER", "file"),
                dir: PathBuf::from(env.get_or("CACHE_DIR", "storage/cache")),
            },
            session: SessionConfig {
                driver: env.get_or("SESSION_DRIVER", "file"),
                secure_cookies: env.get_bool("SESSION_SECURE_COOKIE", false),
            },
            queue_driver: env.get_or("QUEUE_CONNECTION", "sync"),
            security: SecurityConfig {
                rate_limiting_enabled: env.get_bool("RATE_LIMITING_ENABLED", true),
                rate_limit_per_minute: env.get_u64("RATE_LIMIT_PER_MINUTE", 60),
                cors_allowed_origins,
            },
            backup: BackupSettings {
                storage_root: PathBuf::from(env.get_or("BACKUP_DISK", "storage/backups")),
                retention_days: env.get_u64("BACKUP_RETENTION_DAYS", 30),
                temp_dir: PathBuf::from(env.get_or("BACKUP_TEMP_DIR", "storage/app/temp")),
                file_paths,
                compression_level: env.get_u64("BACKUP_COMPRESSION_LEVEL", 9).clamp(1, 9) as u32,
            },
        }
    }

    pub fn is_production(&self) -> bool {
        self.app.environment == "production"
    }

    /// Validate configuration, returning a list of problems
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.database.driver.as_str() {
            "mysql" | "pgsql" | "sqlite" => {}
            other => errors.push(format!("Unsupported database driver: {}", other)),
        }

        if self.database.database.is_empty() {
            errors.push("DB_DATABASE is not set".to_string());
        }

        if self.is_production() && self.app.key.is_none() {
            errors.push("APP_KEY is not set".to_string());
        }

        if self.backup.file_paths.is_empty() {
            errors.push("No backup file paths configured".to_string());
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample_env() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# Application").unwrap();
        writeln!(file, "APP_NAME=demo").unwrap();
        writeln!(file, "APP_ENV=production").unwrap();
        writeln!(file, "APP_DEBUG=false").unwrap();
        writeln!(file, "APP_KEY=base64:deadbeef").unwrap();
        writeln!(file, "DB_CONNECTION=pgsql").unwrap();
        writeln!(file, "DB_PORT=5433").unwrap();
        writeln!(file, "DB_DATABASE=demo_db").unwrap();
        writeln!(file, "BACKUP_RETENTION_DAYS=7").unwrap();
        file
    }

    #[test]
    fn test_env_file_parsing() {
        let file = sample_env();
        let env = EnvFile::load(file.path()).unwrap();

        assert_eq!(env.get("APP_NAME"), Some("demo"));
        assert_eq!(env.get("DB_CONNECTION"), Some("pgsql"));
        assert_eq!(env.get("MISSING"), None);
        assert!(!env.get_bool("APP_DEBUG", true));
        assert_eq!(env.get_u64("DB_PORT", 0), 5433);
    }

    #[test]
    fn test_app_config_resolution() {
        let file = sample_env();
        let config = AppConfig::load(file.path()).unwrap();

        assert_eq!(config.app.name, "demo");
        assert!(config.is_production());
        assert_eq!(config.database.driver, "pgsql");
        assert_eq!(config.database.port, 5433);
        assert_eq!(config.backup.retention_days, 7);
        assert_eq!(config.backup.compression_level, 9);
        // defaults mirror the original exclude list
        assert!(config.database.exclude_tables.contains(&"sessions".to_string()));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_validate_flags_unknown_driver() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "DB_CONNECTION=mongodb").unwrap();
        writeln!(file, "DB_DATABASE=x").unwrap();
        writeln!(file, "APP_ENV=local").unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("Unsupported database driver")));
    }

    #[test]
    fn test_missing_env_file_errors() {
        assert!(EnvFile::load("/nonexistent/.env").is_err());
    }
}
