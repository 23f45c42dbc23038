/// Operation timing and system metrics
///
/// `PerformanceMonitor` brackets named operations, keeps a rolling window
/// of recent measurements in the cache, and samples host-level metrics
/// through sysinfo. Slow operations are logged at escalating levels.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use sysinfo::{Disks, System};

use crate::core::cache::CacheStore;
use crate::core::config::DatabaseConfig;
use crate::core::sql;
use crate::utils::bytes_to_mb;

/// Entries kept per hourly metrics bucket
const METRICS_WINDOW_CAP: usize = 100;
/// Bucket TTL; buckets expire one hour after their last write
const METRICS_TTL_SECS: u64 = 3600;
const SLOW_OPERATION_MS: u64 = 1000;
const VERY_SLOW_OPERATION_MS: u64 = 5000;

/// Placeholder until the cache backend reports real hit/miss counters
const CACHE_HIT_RATIO_ESTIMATE: f64 = 0.85;

/// One timed operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub operation: String,
    pub duration_ms: u64,
    pub memory_used_mb: f64,
    pub peak_memory_mb: f64,
    pub timestamp: String,
}

/// In-flight measurement returned by `start_monitoring`
pub struct MonitorHandle {
    operation: String,
    started: Instant,
    start_memory_mb: f64,
}

/// Host-level snapshot used by the health probes and the monitor view
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub memory_usage_percent: f64,
    pub cpu_usage_percent: f32,
    pub disk_total_gb: f64,
    pub disk_available_gb: f64,
    pub disk_usage_percent: f64,
    pub uptime_secs: u64,
    pub active_connections: u64,
    pub cache_hit_ratio: f64,
    pub timestamp: String,
}

pub struct PerformanceMonitor {
    cache: Box<dyn CacheStore>,
}

impl PerformanceMonitor {
    pub fn new(cache: Box<dyn CacheStore>) -> Self {
        Self { cache }
    }

    pub fn start_monitoring(&self, operation: &str) -> MonitorHandle {
        MonitorHandle {
            operation: operation.to_string(),
            started: Instant::now(),
            start_memory_mb: process_memory_mb(),
        }
    }

    /// Finish a measurement, log it, and fold it into the rolling window
    pub fn stop_monitoring(&self, handle: MonitorHandle) -> OperationMetrics {
        let duration_ms = handle.started.elapsed().as_millis() as u64;
        let end_memory_mb = process_memory_mb();

        let metrics = OperationMetrics {
            operation: handle.operation,
            duration_ms,
            memory_used_mb: ((end_memory_mb - handle.start_memory_mb) * 100.0).round() / 100.0,
            peak_memory_mb: end_memory_mb.max(handle.start_memory_mb),
            timestamp: Utc::now().to_rfc3339(),
        };

        if duration_ms > VERY_SLOW_OPERATION_MS {
            log::error!(
                "Very slow operation: {} took {}ms",
                metrics.operation,
                duration_ms
            );
        } else if duration_ms > SLOW_OPERATION_MS {
            log::warn!("Slow operation: {} took {}ms", metrics.operation, duration_ms);
        } else {
            log::info!("Operation {} completed in {}ms", metrics.operation, duration_ms);
        }

        self.record(&metrics);
        metrics
    }

    /// Recorded operations for the current hour bucket, oldest first
    pub fn recent_metrics(&self) -> Vec<OperationMetrics> {
        self.cache
            .get(&Self::bucket_key())
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn bucket_key() -> String {
        format!("performance_metrics_{}", Utc::now().format("%Y-%m-%d-%H"))
    }

    fn record(&self, metrics: &OperationMetrics) {
        let key = Self::bucket_key();
        let mut window: Vec<OperationMetrics> = self
            .cache
            .get(&key)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        window.push(metrics.clone());
        if window.len() > METRICS_WINDOW_CAP {
            let excess = window.len() - METRICS_WINDOW_CAP;
            window.drain(..excess);
        }

        match serde_json::to_string(&window) {
            Ok(json) => {
                if let Err(e) = self.cache.put(&key, &json, METRICS_TTL_SECS) {
                    log::warn!("Failed to store performance metrics: {:#}", e);
                }
            }
            Err(e) => log::warn!("Failed to serialize performance metrics: {}", e),
        }
    }
}

/// Sample host metrics. Never fails; unavailable readings come back zero.
pub fn system_metrics(db: &DatabaseConfig) -> SystemMetrics {
    let mut sys = System::new_all();
    sys.refresh_all();

    let memory_total_mb = bytes_to_mb(sys.total_memory());
    let memory_used_mb = bytes_to_mb(sys.used_memory());
    let memory_usage_percent = if memory_total_mb > 0.0 {
        (memory_used_mb / memory_total_mb * 1000.0).round() / 10.0
    } else {
        0.0
    };

    let (disk_total, disk_available) = disk_space();
    let disk_usage_percent = if disk_total > 0 {
        ((disk_total - disk_available) as f64 / disk_total as f64 * 1000.0).round() / 10.0
    } else {
        0.0
    };

    SystemMetrics {
        memory_used_mb,
        memory_total_mb,
        memory_usage_percent,
        cpu_usage_percent: sys.global_cpu_info().cpu_usage(),
        disk_total_gb: (disk_total as f64 / 1_073_741_824.0 * 100.0).round() / 100.0,
        disk_available_gb: (disk_available as f64 / 1_073_741_824.0 * 100.0).round() / 100.0,
        disk_usage_percent,
        uptime_secs: System::uptime(),
        active_connections: active_connections(db),
        cache_hit_ratio: CACHE_HIT_RATIO_ESTIMATE,
        timestamp: Utc::now().to_rfc3339(),
    }
}

/// Total and available bytes summed across mounted disks
pub fn disk_space() -> (u64, u64) {
    let disks = Disks::new_with_refreshed_list();
    let mut total: u64 = 0;
    let mut available: u64 = 0;
    for disk in &disks {
        total += disk.total_space();
        available += disk.available_space();
    }
    (total, available)
}

/// Best-effort connection count; 0 when the engine cannot report one
pub fn active_connections(db: &DatabaseConfig) -> u64 {
    let result: Result<u64> = (|| {
        let mut client = sql::connect(db)?;
        let value = match db.driver.as_str() {
            "pgsql" => client.query_scalar("SELECT count(*) FROM pg_stat_activity")?,
            "mysql" => {
                // SHOW STATUS rows are (Variable_name, Value)
                client
                    .query_rows("SHOW STATUS LIKE 'Threads_connected'")?
                    .into_iter()
                    .next()
                    .and_then(|row| row.into_iter().nth(1))
                    .flatten()
            }
            // File database: the only connection is ours
            "sqlite" => Some("1".to_string()),
            _ => None,
        };
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    })();

    match result {
        Ok(count) => count,
        Err(e) => {
            log::warn!("Could not determine active connections: {:#}", e);
            0
        }
    }
}

fn process_memory_mb() -> f64 {
    let mut sys = System::new();
    if let Ok(pid) = sysinfo::get_current_pid() {
        sys.refresh_process(pid);
        if let Some(process) = sys.process(pid) {
            return bytes_to_mb(process.memory());
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::MemoryCache;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_monitoring_roundtrip() {
        let monitor = PerformanceMonitor::new(Box::new(MemoryCache::new()));

        let handle = monitor.start_monitoring("test_op");
        thread::sleep(Duration::from_millis(15));
        let metrics = monitor.stop_monitoring(handle);

        assert_eq!(metrics.operation, "test_op");
        assert!(metrics.duration_ms >= 15);

        let recent = monitor.recent_metrics();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].operation, "test_op");
    }

    #[test]
    fn test_metrics_window_capped() {
        let monitor = PerformanceMonitor::new(Box::new(MemoryCache::new()));

        for i in 0..105 {
            let metrics = OperationMetrics {
                operation: format!("op_{}", i),
                duration_ms: i,
                memory_used_mb: 0.0,
                peak_memory_mb: 0.0,
                timestamp: Utc::now().to_rfc3339(),
            };
            monitor.record(&metrics);
        }

        let window = monitor.recent_metrics();
        assert_eq!(window.len(), METRICS_WINDOW_CAP);
        // Oldest entries were dropped
        assert_eq!(window[0].operation, "op_5");
        assert_eq!(window.last().unwrap().operation, "op_104");
    }

    #[test]
    fn test_sqlite_connection_count() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("app.sqlite");
        rusqlite::Connection::open(&path).unwrap();

        let db = DatabaseConfig {
            driver: "sqlite".to_string(),
            host: String::new(),
            port: 0,
            database: path.to_string_lossy().into_owned(),
            username: String::new(),
            password: String::new(),
            exclude_tables: Vec::new(),
        };
        assert_eq!(active_connections(&db), 1);
    }

    #[test]
    fn test_system_metrics_sane() {
        let db = DatabaseConfig {
            driver: "none".to_string(),
            host: String::new(),
            port: 0,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            exclude_tables: Vec::new(),
        };
        let metrics = system_metrics(&db);

        assert!(metrics.memory_total_mb > 0.0);
        assert!(metrics.memory_used_mb <= metrics.memory_total_mb);
        assert!((0.0..=100.0).contains(&metrics.disk_usage_percent));
        assert_eq!(metrics.active_connections, 0);
    }
}
