use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use opsguard::cli::{BackupCommands, Cli, Commands, ConfigCommands};
use opsguard::core::backup::{BackupKind, BackupOptions, BackupService, RestoreOptions, RunResult};
use opsguard::core::cache::FileCache;
use opsguard::core::config::{AppConfig, EnvFile};
use opsguard::core::health::{HealthChecker, HealthStatus, PROBE_NAMES};
use opsguard::core::metrics::{self, PerformanceMonitor};
use opsguard::core::storage::LocalStorage;
use opsguard::utils::{format_bytes, format_duration, format_timestamp};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<bool> {
    let config = AppConfig::load(&cli.env_file)
        .with_context(|| format!("Failed to load configuration from {}", cli.env_file))?;

    match cli.command {
        Commands::Backup { command } => handle_backup(&config, command),
        Commands::Health {
            detailed,
            json,
            check,
        } => handle_health(&config, detailed, json, &check),
        Commands::Monitor => handle_monitor(&config),
        Commands::Config { command } => handle_config(&cli.env_file, &config, command),
    }
}

fn build_service(config: &AppConfig) -> BackupService {
    BackupService::new(
        config.clone(),
        Box::new(LocalStorage::new(&config.backup.storage_root)),
        Box::new(FileCache::new(&config.cache.dir)),
    )
}

fn handle_backup(config: &AppConfig, command: BackupCommands) -> Result<bool> {
    let service = build_service(config);

    match command {
        BackupCommands::Run {
            backup_type,
            verify,
            cleanup,
            monitor,
        } => {
            let kind: BackupKind = backup_type.parse()?;
            let perf = monitor
                .then(|| PerformanceMonitor::new(Box::new(FileCache::new(&config.cache.dir))));
            let handle = perf
                .as_ref()
                .map(|p| p.start_monitoring(&format!("backup_{}", kind.as_str())));

            let result = match kind {
                BackupKind::Full => {
                    let spinner = ProgressBar::new_spinner();
                    spinner.set_style(
                        ProgressStyle::with_template("{spinner} {msg}")
                            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                    );
                    spinner.set_message("Running full backup...");
                    spinner.enable_steady_tick(Duration::from_millis(120));

                    let result = service.create_full_backup(BackupOptions {
                        cleanup_old: cleanup,
                        verify: true,
                    });
                    spinner.finish_and_clear();
                    result
                }
                BackupKind::Database => {
                    service.backup_database(&service.generate_backup_id(kind))
                }
                BackupKind::Files => service.backup_files(&service.generate_backup_id(kind)),
                BackupKind::Config => {
                    service.backup_configuration(&service.generate_backup_id(kind))
                }
            };

            print_run_result(&result);

            if verify && kind != BackupKind::Full {
                let report = service.verify_backup(&result.backup_id);
                println!("\nVerification:");
                println!("  database exists:   {}", mark(report.database_exists));
                println!("  database readable: {}", mark(report.database_readable));
                println!("  files exist:       {}", mark(report.files_exist));
                println!("  files readable:    {}", mark(report.files_readable));
                println!("  config exists:     {}", mark(report.config_exists));
            }

            if let (Some(perf), Some(handle)) = (perf, handle) {
                let metrics = perf.stop_monitoring(handle);
                println!(
                    "\nOperation {} took {}ms (memory delta {:.2} MB)",
                    metrics.operation, metrics.duration_ms, metrics.memory_used_mb
                );
            }

            Ok(result.success)
        }
        BackupCommands::List => {
            let backups = service.list_backups()?;
            if backups.is_empty() {
                println!("No backups found");
                return Ok(true);
            }

            println!("{:<10} {:<55} {:>10} {:<20}", "Type", "Path", "Size", "Modified");
            println!("{}", "-".repeat(97));
            for backup in backups {
                println!(
                    "{:<10} {:<55} {:>10} {:<20}",
                    backup.kind,
                    backup.path,
                    format_bytes(backup.size),
                    format_timestamp(backup.modified)
                );
            }
            Ok(true)
        }
        BackupCommands::Cleanup => {
            let deleted = service.cleanup_old_backups()?;
            if deleted.is_empty() {
                println!("Nothing to clean up");
            } else {
                println!("Deleted {} expired backup(s):", deleted.len());
                for path in deleted {
                    println!("  {}", path);
                }
            }
            Ok(true)
        }
        BackupCommands::Restore {
            backup_id,
            skip_database,
            skip_files,
            no_clear_cache,
        } => {
            let result = service.restore_from_backup(
                &backup_id,
                RestoreOptions {
                    restore_database: !skip_database,
                    restore_files: !skip_files,
                    clear_cache: !no_clear_cache,
                },
            );

            for (step, outcome) in &result.steps {
                println!("{:<10} {}", step, outcome);
            }
            if result.success {
                println!("{}", result.message.green());
            } else {
                println!("{}", result.message.red());
            }
            Ok(result.success)
        }
    }
}

fn print_run_result(result: &RunResult) {
    if result.success {
        println!("{} {}", "✓".green(), result.message);
    } else {
        println!("{} {}", "✗".red(), result.message);
    }
    println!("Backup id: {}\n", result.backup_id);

    for (name, artifact) in &result.artifacts {
        let mark = if artifact.success {
            "✓".green()
        } else {
            "✗".red()
        };
        let detail = if let Some(error) = &artifact.error {
            error.clone()
        } else if let Some(message) = &artifact.message {
            message.clone()
        } else {
            let mut detail = format_bytes(artifact.size_bytes);
            if let Some(count) = artifact.files_count {
                detail.push_str(&format!(", {} path(s)", count));
            }
            detail
        };
        println!("  {} {:<10} {:<40} {}", mark, name, artifact.filename, detail);
    }

    if let Some(report) = &result.verification {
        let ok = report.database_exists
            && report.database_readable
            && report.files_exist
            && report.files_readable
            && report.config_exists;
        if ok {
            println!("\n{} All artifacts verified", "✓".green());
        } else {
            println!("\n{} Artifact verification incomplete", "!".yellow());
        }
    }

    if !result.cleaned_up.is_empty() {
        println!("\nCleaned up {} expired backup(s)", result.cleaned_up.len());
    }
}

fn handle_health(
    config: &AppConfig,
    detailed: bool,
    json: bool,
    checks: &[String],
) -> Result<bool> {
    for name in checks {
        if !PROBE_NAMES.contains(&name.as_str()) {
            anyhow::bail!(
                "Unknown health check: {} (expected one of {})",
                name,
                PROBE_NAMES.join(", ")
            );
        }
    }

    let checker = HealthChecker::new(
        config.clone(),
        Box::new(FileCache::new(&config.cache.dir)),
        Box::new(LocalStorage::new(&config.backup.storage_root)),
    );
    let only = (!checks.is_empty()).then_some(checks);
    let report = checker.check_system_health(only);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "System health: {} ({} environment)\n",
            paint_status(report.status),
            report.environment
        );
        for (name, probe) in &report.checks {
            println!(
                "  {:<13} {:<10} {} ({}ms)",
                name,
                paint_status(probe.status),
                probe.message,
                probe.duration_ms
            );
            if detailed && !probe.details.is_null() {
                if let Ok(pretty) = serde_json::to_string_pretty(&probe.details) {
                    for line in pretty.lines() {
                        println!("      {}", line);
                    }
                }
            }
        }
    }

    Ok(health_exit_ok(report.status))
}

// Exit 0 is reserved for a fully healthy report
fn health_exit_ok(status: HealthStatus) -> bool {
    status == HealthStatus::Healthy
}

fn paint_status(status: HealthStatus) -> colored::ColoredString {
    match status {
        HealthStatus::Healthy => status.as_str().green(),
        HealthStatus::Warning => status.as_str().yellow(),
        HealthStatus::Error | HealthStatus::Critical => status.as_str().red(),
    }
}

fn handle_monitor(config: &AppConfig) -> Result<bool> {
    let metrics = metrics::system_metrics(&config.database);

    println!("System metrics\n");
    println!(
        "  Memory:  {:.0} / {:.0} MB ({:.1}%)",
        metrics.memory_used_mb, metrics.memory_total_mb, metrics.memory_usage_percent
    );
    println!("  CPU:     {:.1}%", metrics.cpu_usage_percent);
    println!(
        "  Disk:    {:.2} GB free of {:.2} GB ({:.1}% used)",
        metrics.disk_available_gb, metrics.disk_total_gb, metrics.disk_usage_percent
    );
    println!("  Uptime:  {}", format_duration(metrics.uptime_secs));
    println!("  Active database connections: {}", metrics.active_connections);

    let monitor = PerformanceMonitor::new(Box::new(FileCache::new(&config.cache.dir)));
    let recent = monitor.recent_metrics();
    if recent.is_empty() {
        println!("\nNo recorded operations in the current window");
    } else {
        println!("\nRecent operations\n");
        println!("{:<30} {:>12} {:>12}", "Operation", "Duration", "Memory");
        println!("{}", "-".repeat(56));
        for op in recent.iter().rev() {
            println!(
                "{:<30} {:>10}ms {:>10.2}MB",
                op.operation, op.duration_ms, op.memory_used_mb
            );
        }
    }

    Ok(true)
}

fn handle_config(env_path: &str, config: &AppConfig, command: ConfigCommands) -> Result<bool> {
    match command {
        ConfigCommands::View => {
            let env = EnvFile::load(env_path)?;
            println!("Configuration ({}):\n", env.path().display());
            for key in env.keys() {
                if let Some(value) = env.get(&key) {
                    // Mask sensitive values
                    let display_value = if key.contains("PASSWORD")
                        || key.contains("SECRET")
                        || key.contains("KEY")
                    {
                        "****"
                    } else {
                        value
                    };
                    println!("{}: {}", key, display_value);
                }
            }
            Ok(true)
        }
        ConfigCommands::Validate => {
            let errors = config.validate();
            if errors.is_empty() {
                println!("{} Configuration is valid", "✓".green());
                Ok(true)
            } else {
                println!("{} Configuration errors:", "✗".red());
                for error in errors {
                    println!("  - {}", error);
                }
                Ok(false)
            }
        }
    }
}

fn mark(ok: bool) -> colored::ColoredString {
    if ok {
        "✓".green()
    } else {
        "✗".red()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_exit_code_contract() {
        assert!(health_exit_ok(HealthStatus::Healthy));
        assert!(!health_exit_ok(HealthStatus::Warning));
        assert!(!health_exit_ok(HealthStatus::Error));
        assert!(!health_exit_ok(HealthStatus::Critical));
    }
}
