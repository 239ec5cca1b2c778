//! Concord command-line tool.
//!
//! Provides subcommands for building and combining patches, diffing
//! structured documents, resolving divergent versions, reviewing queued
//! conflicts, querying bitemporal version history, and generating /
//! validating configuration files.

mod commands;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use concord_core::config::AppConfig;
use concord_core::db::Database;

use commands::conflicts::ConflictsAction;
use commands::patch::PatchAction;
use commands::versions::VersionsAction;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Concord command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "concord",
    version,
    about = "Patches, merges and bitemporal history for converging replicas"
)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// Defaults to `<config dir>/concord/config.toml`; built-in defaults are
    /// used when that file does not exist.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides the config.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./concord.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Structurally diff two JSON documents.
    Diff {
        /// Old document (`@file`, `-` for stdin, or literal JSON).
        old: String,
        /// New document (`@file`, `-` for stdin, or literal JSON).
        new: String,
        /// Include unchanged leaves in the output.
        #[arg(long)]
        emit_equal: bool,
    },

    /// Create, combine and apply patches.
    Patch {
        #[command(subcommand)]
        action: PatchAction,
    },

    /// Run the resolution chain over two divergent versions.
    Resolve {
        /// First version (`@file`, `-` for stdin, or literal text).
        v1: String,
        /// Second version (`@file`, `-` for stdin, or literal text).
        v2: String,
        /// Common ancestor, if known.
        #[arg(long)]
        base: Option<String>,
        /// What is being merged (a document path, a key).
        #[arg(long, default_value = "")]
        context: String,
    },

    /// Review conflicts queued for manual resolution.
    Conflicts {
        #[command(subcommand)]
        action: ConflictsAction,
    },

    /// Record and query bitemporal version history.
    Versions {
        /// Store name. Defaults to `versions.default_store`.
        #[arg(short, long, global = true)]
        store: Option<String>,

        #[command(subcommand)]
        action: VersionsAction,
    },

    /// Show recent audit log entries.
    Audit {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,

        /// Only show entries for this action (e.g. `patch.create`).
        #[arg(short, long)]
        action: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Init { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"))?;
            cmd_init(&output)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"))?;
            cmd_validate(&config_path)
        }
        command => {
            let config = load_config(&config_path, cli.config.is_some())?;
            init_logging(
                cli.log_level
                    .as_deref()
                    .unwrap_or(config.store.log_level.as_str()),
            )?;
            debug!(path = %config_path.display(), "configuration ready");

            match command {
                Commands::Diff {
                    old,
                    new,
                    emit_equal,
                } => commands::cmd_diff(&config, &old, &new, emit_equal),
                Commands::Patch { action } => {
                    commands::patch::run(open_database(&config)?, action)
                }
                Commands::Resolve {
                    v1,
                    v2,
                    base,
                    context,
                } => commands::conflicts::cmd_resolve(
                    open_database(&config)?,
                    &config,
                    &v1,
                    &v2,
                    base.as_deref(),
                    &context,
                ),
                Commands::Conflicts { action } => {
                    commands::conflicts::run(open_database(&config)?, &config, action)
                }
                Commands::Versions { store, action } => {
                    let store = store.unwrap_or_else(|| config.versions.default_store.clone());
                    commands::versions::run(open_database(&config)?, &store, action)
                }
                Commands::Audit { limit, action } => {
                    commands::cmd_audit(&*open_database(&config)?, limit, action.as_deref())
                }
                Commands::Init { .. } | Commands::Validate => unreachable!(),
            }
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .with_context(|| format!("invalid log level '{}'", level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("concord").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("./concord.toml"))
}

/// Load the config file. A missing default file means built-in defaults; a
/// missing file that was asked for explicitly is an error.
fn load_config(path: &Path, explicit: bool) -> Result<AppConfig> {
    let mut config = if explicit || path.exists() {
        AppConfig::load_from_file(path).context("failed to load configuration file")?
    } else {
        AppConfig::default()
    };
    config
        .apply_env_overrides()
        .context("failed to apply environment overrides")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn open_database(config: &AppConfig) -> Result<Arc<Database>> {
    let db_path = config.store.database_path();
    let db = Database::new(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    db.initialize().context("failed to initialize database")?;
    Ok(Arc::new(db))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# Concord Configuration
# Every section is optional; the values below are the defaults.

[store]
data_dir = ".concord"
log_level = "info"
database_file = "concord.db"

[resolution]
# Tried in priority order; "manual" is always last.
providers = ["lww", "add-wins"]
cache_resolutions = true

[versions]
default_store = "main"

[diff]
emit_equal = false
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Adjust data_dir and the provider list");
    println!(
        "  2. Validate with: concord validate --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .apply_env_overrides()
        .context("failed to apply environment overrides")?;
    println!("  [OK] Environment overrides processed");

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All fields are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Database      : {}", config.store.database_path().display());
    println!("  Log level     : {}", config.store.log_level);
    println!(
        "  Providers     : {} (+ manual)",
        config.resolution.providers.join(", ")
    );
    println!(
        "  Cache results : {}",
        if config.resolution.cache_resolutions {
            "yes"
        } else {
            "no"
        }
    );
    println!("  Default store : {}", config.versions.default_store);
    println!();
    println!("Configuration is valid.");

    Ok(())
}
