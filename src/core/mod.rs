pub mod archive;
pub mod backup;
pub mod cache;
pub mod config;
pub mod dump;
pub mod health;
pub mod metrics;
pub mod sql;
pub mod storage;

pub use backup::{BackupKind, BackupOptions, BackupService, RestoreOptions};
pub use cache::{CacheStore, FileCache, MemoryCache};
pub use config::{AppConfig, EnvFile};
pub use health::{HealthChecker, HealthStatus};
pub use metrics::PerformanceMonitor;
pub use storage::{BackupStorage, LocalStorage, MemoryStorage};
