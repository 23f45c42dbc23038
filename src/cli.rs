/// CLI argument parsing and command handling

use clap::{Parser, Subcommand};

// Build timestamp injected at compile time
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser)]
#[command(name = "opsguard")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Path to the .env file
    #[arg(long, default_value = ".env", global = true)]
    pub env_file: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Backup operations
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// System health report
    Health {
        /// Show per-check details
        #[arg(short, long)]
        detailed: bool,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,

        /// Run only the named checks (database, cache, storage, security, performance)
        #[arg(short, long)]
        check: Vec<String>,
    },

    /// Show system metrics and recent operation timings
    Monitor,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create a backup
    Run {
        /// What to back up (full, database, files, config)
        #[arg(short = 't', long = "type", default_value = "full")]
        backup_type: String,

        /// Verify artifacts after a partial backup
        #[arg(long)]
        verify: bool,

        /// Run the retention cleanup after a full backup
        #[arg(long)]
        cleanup: bool,

        /// Record timing for the run
        #[arg(long)]
        monitor: bool,
    },

    /// List stored backups
    List,

    /// Delete backups past the retention window
    Cleanup,

    /// Restore from a backup
    Restore {
        /// Backup run id, e.g. full_2026-01-15_03-00-00
        backup_id: String,

        /// Skip the database restore step
        #[arg(long)]
        skip_database: bool,

        /// Skip the files restore step
        #[arg(long)]
        skip_files: bool,

        /// Keep the application cache
        #[arg(long)]
        no_clear_cache: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// View configuration with secrets masked
    View,

    /// Validate configuration
    Validate,
}
