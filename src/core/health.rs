/// System health diagnostics
///
/// Five probes: database, cache, storage, security, performance. Every
/// probe is caught, so one failing subsystem never hides the report for
/// the others. Overall status is the worst probe status.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::time::Instant;

use crate::core::cache::CacheStore;
use crate::core::config::AppConfig;
use crate::core::metrics;
use crate::core::sql;
use crate::core::storage::BackupStorage;
use crate::utils::{bytes_to_mb, generate_hex_string};

const DB_LATENCY_WARN_MS: u64 = 100;
const DB_CONNECTIONS_WARN: u64 = 80;
const CACHE_LATENCY_WARN_MS: u64 = 50;
const STORAGE_LATENCY_WARN_MS: u64 = 100;
const DISK_USAGE_LIMIT_PERCENT: f64 = 85.0;
const MEMORY_USAGE_WARN_PERCENT: f64 = 80.0;
const CPU_USAGE_WARN_PERCENT: f32 = 80.0;
const CACHE_HIT_RATIO_WARN: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    fn severity(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Warning => 1,
            Self::Error => 2,
            Self::Critical => 3,
        }
    }

    /// The worse of two statuses
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub status: HealthStatus,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    pub duration_ms: u64,
}

impl ProbeResult {
    fn new(status: HealthStatus, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            status,
            message: message.into(),
            details,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub environment: String,
    pub timestamp: String,
    pub checks: BTreeMap<&'static str, ProbeResult>,
}

pub const PROBE_NAMES: [&str; 5] = ["database", "cache", "storage", "security", "performance"];

pub struct HealthChecker {
    config: AppConfig,
    cache: Box<dyn CacheStore>,
    storage: Box<dyn BackupStorage>,
}

impl HealthChecker {
    pub fn new(
        config: AppConfig,
        cache: Box<dyn CacheStore>,
        storage: Box<dyn BackupStorage>,
    ) -> Self {
        Self {
            config,
            cache,
            storage,
        }
    }

    /// Run all probes, or only the named subset
    pub fn check_system_health(&self, only: Option<&[String]>) -> HealthReport {
        let selected = |name: &str| match only {
            Some(names) => names.iter().any(|n| n == name),
            None => true,
        };

        let mut checks = BTreeMap::new();
        for name in PROBE_NAMES {
            if !selected(name) {
                continue;
            }
            checks.insert(name, self.run_probe(name));
        }

        // A probe that errored could not verify its subsystem; the overall
        // status treats that as critical
        let status = checks.values().fold(HealthStatus::Healthy, |acc, probe| {
            let effective = if probe.status == HealthStatus::Error {
                HealthStatus::Critical
            } else {
                probe.status
            };
            acc.worst(effective)
        });

        HealthReport {
            status,
            environment: self.config.app.environment.clone(),
            timestamp: Utc::now().to_rfc3339(),
            checks,
        }
    }

    fn run_probe(&self, name: &str) -> ProbeResult {
        let started = Instant::now();
        let result = match name {
            "database" => self.check_database(),
            "cache" => self.check_cache(),
            "storage" => self.check_storage(),
            "security" => self.check_security(),
            _ => self.check_performance(),
        };

        let mut probe = match result {
            Ok(probe) => probe,
            Err(e) => {
                log::error!("Health probe {} failed: {:#}", name, e);
                ProbeResult::new(
                    HealthStatus::Error,
                    format!("Check failed: {:#}", e),
                    serde_json::Value::Null,
                )
            }
        };
        probe.duration_ms = started.elapsed().as_millis() as u64;

        if probe.status != HealthStatus::Healthy {
            log::warn!("Health probe {}: {} - {}", name, probe.status.as_str(), probe.message);
        }
        probe
    }

    fn check_database(&self) -> Result<ProbeResult> {
        let db = &self.config.database;
        let started = Instant::now();

        let mut client = match sql::connect(db) {
            Ok(client) => client,
            Err(e) => {
                return Ok(ProbeResult::new(
                    HealthStatus::Critical,
                    format!("Database connection failed: {:#}", e),
                    json!({ "driver": db.driver }),
                ));
            }
        };

        if let Err(e) = client.query_scalar("SELECT 1") {
            return Ok(ProbeResult::new(
                HealthStatus::Critical,
                format!("Database query failed: {:#}", e),
                json!({ "driver": db.driver }),
            ));
        }
        let latency_ms = started.elapsed().as_millis() as u64;

        let connections = metrics::active_connections(db);
        let size_mb = self.database_size_mb(&mut *client);

        let details = json!({
            "driver": db.driver,
            "latency_ms": latency_ms,
            "active_connections": connections,
            "database_size_mb": size_mb,
        });

        let probe = if latency_ms > DB_LATENCY_WARN_MS {
            ProbeResult::new(HealthStatus::Warning, "Database responding slowly", details)
        } else if connections > DB_CONNECTIONS_WARN {
            ProbeResult::new(HealthStatus::Warning, "High connection count", details)
        } else {
            ProbeResult::new(HealthStatus::Healthy, "Database connection successful", details)
        };
        Ok(probe)
    }

    fn database_size_mb(&self, client: &mut dyn sql::SqlClient) -> f64 {
        let db = &self.config.database;
        let size_bytes: Option<u64> = match db.driver.as_str() {
            "pgsql" => client
                .query_scalar("SELECT pg_database_size(current_database())::text")
                .ok()
                .flatten()
                .and_then(|v| v.parse().ok()),
            "mysql" => client
                .query_scalar(
                    "SELECT COALESCE(SUM(data_length + index_length), 0) \
                     FROM information_schema.tables WHERE table_schema = DATABASE()",
                )
                .ok()
                .flatten()
                .and_then(|v| v.parse().ok()),
            "sqlite" => fs::metadata(&db.database).map(|m| m.len()).ok(),
            _ => None,
        };
        size_bytes.map(bytes_to_mb).unwrap_or(0.0)
    }

    fn check_cache(&self) -> Result<ProbeResult> {
        let key = format!("health_check_{}", generate_hex_string(8));
        let value = generate_hex_string(16);
        let started = Instant::now();

        self.cache.put(&key, &value, 60)?;
        let read_back = self.cache.get(&key);
        self.cache.forget(&key)?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let details = json!({
            "driver": self.config.cache.driver,
            "latency_ms": latency_ms,
        });

        let probe = if read_back.as_deref() != Some(value.as_str()) {
            ProbeResult::new(
                HealthStatus::Critical,
                "Cache write/read verification failed",
                details,
            )
        } else if latency_ms > CACHE_LATENCY_WARN_MS {
            ProbeResult::new(HealthStatus::Warning, "Cache responding slowly", details)
        } else {
            ProbeResult::new(HealthStatus::Healthy, "Cache working correctly", details)
        };
        Ok(probe)
    }

    fn check_storage(&self) -> Result<ProbeResult> {
        let path = format!("health/health_check_{}.txt", generate_hex_string(8));
        let content = generate_hex_string(16);
        let started = Instant::now();

        self.storage.put(&path, content.as_bytes())?;
        let read_back = self.storage.get(&path)?;
        self.storage.delete(&path)?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (disk_total, disk_available) = metrics::disk_space();
        let disk_usage_percent = if disk_total > 0 {
            ((disk_total - disk_available) as f64 / disk_total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        let details = json!({
            "latency_ms": latency_ms,
            "disk_usage_percent": disk_usage_percent,
        });

        let probe = if read_back != content.as_bytes() {
            ProbeResult::new(
                HealthStatus::Critical,
                "Storage write/read verification failed",
                details,
            )
        } else if disk_usage_percent > DISK_USAGE_LIMIT_PERCENT {
            ProbeResult::new(HealthStatus::Warning, "Disk space running low", details)
        } else if latency_ms > STORAGE_LATENCY_WARN_MS {
            ProbeResult::new(HealthStatus::Warning, "Storage responding slowly", details)
        } else {
            ProbeResult::new(HealthStatus::Healthy, "Storage working correctly", details)
        };
        Ok(probe)
    }

    fn check_security(&self) -> Result<ProbeResult> {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        if self.config.app.debug && self.config.is_production() {
            issues.push("Debug mode is enabled in production".to_string());
        }
        // A missing key breaks encryption everywhere, not just in production
        if self.config.app.key.is_none() {
            issues.push("Application key is not set".to_string());
        }

        if self.config.is_production() {
            if !self.config.session.secure_cookies {
                warnings.push("Session cookies are not marked secure".to_string());
            }
            if self
                .config
                .security
                .cors_allowed_origins
                .iter()
                .any(|o| o == "*")
            {
                warnings.push("CORS allows all origins".to_string());
            }
        }
        if !self.config.security.rate_limiting_enabled {
            warnings.push("Rate limiting is disabled".to_string());
        }

        let details = json!({
            "issues": issues,
            "warnings": warnings,
        });

        let probe = if !issues.is_empty() {
            ProbeResult::new(HealthStatus::Critical, issues.join("; "), details)
        } else if !warnings.is_empty() {
            ProbeResult::new(HealthStatus::Warning, warnings.join("; "), details)
        } else {
            ProbeResult::new(HealthStatus::Healthy, "Security configuration looks good", details)
        };
        Ok(probe)
    }

    fn check_performance(&self) -> Result<ProbeResult> {
        let metrics = metrics::system_metrics(&self.config.database);
        let (status, findings) = evaluate_performance(&metrics);

        let details = serde_json::to_value(&metrics)?;
        let probe = if findings.is_empty() {
            ProbeResult::new(HealthStatus::Healthy, "Performance within limits", details)
        } else {
            ProbeResult::new(status, findings.join("; "), details)
        };
        Ok(probe)
    }
}

/// Compare a metrics snapshot against the performance thresholds.
/// Disk exhaustion dominates; the other findings warn.
fn evaluate_performance(metrics: &metrics::SystemMetrics) -> (HealthStatus, Vec<String>) {
    let mut status = HealthStatus::Healthy;
    let mut findings = Vec::new();

    if metrics.memory_usage_percent > MEMORY_USAGE_WARN_PERCENT {
        status = status.worst(HealthStatus::Warning);
        findings.push(format!(
            "High memory usage: {:.1}%",
            metrics.memory_usage_percent
        ));
    }
    if metrics.cpu_usage_percent > CPU_USAGE_WARN_PERCENT {
        status = status.worst(HealthStatus::Warning);
        findings.push(format!("High CPU usage: {:.1}%", metrics.cpu_usage_percent));
    }
    if metrics.disk_usage_percent > DISK_USAGE_LIMIT_PERCENT {
        status = status.worst(HealthStatus::Critical);
        findings.push(format!(
            "Disk usage critical: {:.1}%",
            metrics.disk_usage_percent
        ));
    }
    if metrics.active_connections > DB_CONNECTIONS_WARN {
        status = status.worst(HealthStatus::Warning);
        findings.push(format!(
            "High connection count: {}",
            metrics.active_connections
        ));
    }
    if metrics.cache_hit_ratio < CACHE_HIT_RATIO_WARN {
        status = status.worst(HealthStatus::Warning);
        findings.push(format!("Low cache hit ratio: {:.2}", metrics.cache_hit_ratio));
    }

    (status, findings)
}
