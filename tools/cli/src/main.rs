//! notemirror CLI - Mirror remote notebooks into a local directory tree.
//!
//! This tool runs incremental syncs, lists the remote notebook catalog and
//! purges files the mirror no longer references.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use notemirror_common::AccessToken;
use notemirror_sync::{purge, SyncConfig, SyncEngine};

/// Environment variable holding the bearer token.
const TOKEN_ENV: &str = "NOTEMIRROR_TOKEN";

#[derive(Parser)]
#[command(name = "notemirror")]
#[command(about = "notemirror - Incremental local mirror of remote notebooks")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror notebooks into a directory.
    Sync {
        /// Mirror root directory.
        #[arg(short, long)]
        output: PathBuf,

        /// Only notebooks whose name matches this glob.
        #[arg(short, long)]
        notebook: Option<String>,

        /// Only sections whose name matches this glob.
        #[arg(short, long)]
        section: Option<String>,

        /// Only pages whose title matches this glob.
        #[arg(short, long)]
        page: Option<String>,

        /// Ignore freshness and rebuild everything selected.
        #[arg(short, long)]
        force: bool,

        /// Drop absolute positioning from page content.
        #[arg(long)]
        flatten_layout: bool,

        /// Bearer token (default: $NOTEMIRROR_TOKEN).
        #[arg(short, long)]
        token: Option<String>,

        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List the remote notebooks.
    Notebooks {
        /// Bearer token (default: $NOTEMIRROR_TOKEN).
        #[arg(short, long)]
        token: Option<String>,

        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Remove files no metadata entry references.
    Purge {
        /// Mirror root directory.
        #[arg(short, long)]
        output: PathBuf,

        /// Only report what would be removed.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Sync {
            output,
            notebook,
            section,
            page,
            force,
            flatten_layout,
            token,
            config,
        } => {
            let mut sync_config = load_config(config.as_deref())?
                .with_output_root(output)
                .with_force(force)
                .with_flatten_layout(flatten_layout);
            if let Some(pattern) = notebook {
                sync_config = sync_config.with_notebook_filter(pattern);
            }
            if let Some(pattern) = section {
                sync_config = sync_config.with_section_filter(pattern);
            }
            if let Some(pattern) = page {
                sync_config = sync_config.with_page_filter(pattern);
            }
            cmd_sync(token, sync_config).await
        }

        Commands::Notebooks { token, config } => {
            cmd_notebooks(token, load_config(config.as_deref())?).await
        }

        Commands::Purge { output, dry_run } => cmd_purge(&output, dry_run),
    }
}

/// Default configuration file location.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("notemirror").join("config.json"))
}

/// Load the configuration file; a missing default file means defaults.
fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => path,
            None => return Ok(SyncConfig::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config = serde_json::from_str(&content)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Token from the command line, else from the environment.
fn resolve_token(token: Option<String>) -> Result<AccessToken> {
    let raw = match token {
        Some(token) => token,
        None => std::env::var(TOKEN_ENV)
            .with_context(|| format!("No token given; pass --token or set {}", TOKEN_ENV))?,
    };
    AccessToken::new(raw).context("Invalid access token")
}

/// Run a sync until done or interrupted.
async fn cmd_sync(token: Option<String>, config: SyncConfig) -> Result<ExitCode> {
    let token = resolve_token(token)?;
    let engine = SyncEngine::connect(token, config).context("Failed to set up sync")?;

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight work");
            cancel.cancel();
        }
    });

    let report = engine.sync_all().await.context("Sync failed")?;

    println!("{}", report.summary());
    for failure in &report.failures {
        println!("  {}", failure);
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print the remote notebook catalog.
async fn cmd_notebooks(token: Option<String>, config: SyncConfig) -> Result<ExitCode> {
    let token = resolve_token(token)?;
    let engine = SyncEngine::connect(token, config).context("Failed to set up client")?;

    let catalog = engine
        .catalog()
        .await
        .context("Failed to list notebooks")?;

    if catalog.items.is_empty() {
        println!("No notebooks.");
    }
    for notebook in &catalog.items {
        let modified = notebook
            .modified_at()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {}  {}  ({})", modified, notebook.name(), notebook.id);
    }
    if !catalog.complete {
        println!("(listing incomplete, the service was unavailable)");
    }

    Ok(ExitCode::SUCCESS)
}

/// Purge unreferenced files from a mirror.
fn cmd_purge(output: &Path, dry_run: bool) -> Result<ExitCode> {
    let report = purge(output, dry_run)
        .with_context(|| format!("Failed to purge {}", output.display()))?;

    let verb = if dry_run { "Would remove" } else { "Removed" };
    for file in &report.files {
        println!("  {}", file.display());
    }
    println!(
        "{} {} files ({} bytes) and {} directories",
        verb,
        report.files.len(),
        report.bytes,
        report.dirs.len()
    );

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "notebook_filter": "Work*", "max_in_flight": 2 }"#,
        )
        .unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.notebook_filter.as_deref(), Some("Work*"));
        assert_eq!(config.max_in_flight, 2);
        assert!(!config.force);
    }

    #[test]
    fn test_load_config_missing_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(load_config(Some(dir.path().join("absent.json").as_path())).is_err());
    }
}
