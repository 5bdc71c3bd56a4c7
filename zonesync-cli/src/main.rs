use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use zonesync_core::core_zone::diff;
use zonesync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use zonesync_core::shutdown::{install_signal_handlers, ShutdownCoordinator};
use zonesync_core::{Config, SyncState, TcpConnector, ZoneDelta, ZoneSnapshot, ZoneSyncManager};

#[derive(Parser, Debug)]
#[command(name = "zonesync")]
#[command(author, version, about = "Synchronize hex-cell zones with a game authority", long_about = None)]
struct Args {
    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file; ZONESYNC_* variables are applied on top
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the delta that turns one cell set into another
    Diff {
        /// Cells before, comma separated, or @file
        before: String,
        /// Cells after, comma separated, or @file
        after: String,
    },
    /// Connect to the authority and keep a zone in sync until interrupted
    Sync {
        /// Zone identifier
        #[arg(long, default_value = "default")]
        zone: String,
        /// Initial confirmed cells, comma separated, or @file
        #[arg(long, default_value = "")]
        cells: String,
        /// Cells to add once started
        #[arg(long, default_value = "")]
        add: String,
        /// Cells to remove once started
        #[arg(long, default_value = "")]
        remove: String,
        /// Authority address, overriding the configuration
        #[arg(long)]
        url: Option<String>,
    },
    /// Write the default configuration to a file
    InitConfig {
        #[arg(default_value = "zonesync.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let mut log_config = LogConfig::try_from(&config.logging)?;
    if let Some(level) = &args.log_level {
        log_config.level = level.parse::<LogLevel>()?;
    }
    if args.json_logs {
        log_config = log_config.json_format(true);
    }
    init_logging_with_config(log_config)?;

    match args.command {
        Command::Diff { before, after } => {
            let before = ZoneSnapshot::default().with_cells(read_cells(&before)?);
            let after = ZoneSnapshot::default().with_cells(read_cells(&after)?);
            println!("{}", serde_json::to_string_pretty(&diff(&before, &after))?);
        }
        Command::Sync { zone, cells, add, remove, url } => {
            let mut config = config;
            if let Some(url) = url {
                config.transport.url = url;
            }
            config.validate()?;
            let edit = read_cells(&add)?
                .into_iter()
                .fold(ZoneDelta::local(), |delta, cell| delta.add(cell));
            let edit = read_cells(&remove)?
                .into_iter()
                .fold(edit, |delta, cell| delta.remove(cell));
            let initial = ZoneSnapshot::default().with_cells(read_cells(&cells)?);
            run_sync(config, zone, initial, edit).await?;
        }
        Command::InitConfig { path, force } => {
            if path.exists() && !force {
                bail!("{} already exists, pass --force to overwrite", path.display());
            }
            Config::default().save_to_file(&path)?;
            info!(path = %path.display(), "Wrote default configuration");
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env()?;
    Ok(config)
}

/// Parse a cell list: `a,b,c`, or `@path` to a JSON array or whitespace separated file
fn read_cells(arg: &str) -> Result<Vec<String>> {
    let Some(path) = arg.strip_prefix('@') else {
        return Ok(split_cells(arg));
    };
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading cells from {}", path))?;
    if contents.trim_start().starts_with('[') {
        return serde_json::from_str(&contents)
            .with_context(|| format!("{} is not a JSON array of cell ids", path));
    }
    Ok(split_cells(&contents))
}

fn split_cells(text: &str) -> Vec<String> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|cell| !cell.is_empty())
        .map(str::to_string)
        .collect()
}

async fn run_sync(config: Config, zone: String, initial: ZoneSnapshot, edit: ZoneDelta) -> Result<()> {
    let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(5)));
    install_signal_handlers(coordinator.clone());

    let (manager, task) =
        ZoneSyncManager::spawn(zone, initial, &config, Arc::new(TcpConnector::new()));
    manager.subscribe(|state| println!("{}", summarize(state))).await?;

    if !edit.is_empty() {
        if let Err(err) = manager.submit_local_change(edit).await {
            warn!(error = %err, "Initial edit rejected");
        }
    }

    coordinator.wait_for_shutdown().await;
    coordinator
        .drain(async {
            if manager.shutdown().await.is_err() {
                warn!("Manager already stopped");
            }
            let _ = task.await;
        })
        .await;

    Ok(())
}

fn summarize(state: &SyncState) -> String {
    json!({
        "zoneId": state.zone_id,
        "status": state.sync_status.as_str(),
        "version": state.version,
        "cells": state.current_zone.cells(),
        "pending": state.pending_changes.len(),
        "conflicts": state.conflict_count,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_cells_accepts_commas_and_whitespace() {
        assert_eq!(split_cells("a, b,,c\nd"), vec!["a", "b", "c", "d"]);
        assert!(split_cells("").is_empty());
    }

    #[test]
    fn test_read_cells_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.json");
        std::fs::write(&path, r#"["h1", "h2"]"#).unwrap();

        let cells = read_cells(&format!("@{}", path.display())).unwrap();
        assert_eq!(cells, vec!["h1", "h2"]);
    }

    #[test]
    fn test_read_cells_missing_file() {
        assert!(read_cells("@/nonexistent/cells.txt").is_err());
    }

    #[test]
    fn test_args_parse_sync() {
        let args = Args::try_parse_from(["zonesync", "sync", "--zone", "z1", "--add", "h1,h2"]).unwrap();
        match args.command {
            Command::Sync { zone, add, url, .. } => {
                assert_eq!(zone, "z1");
                assert_eq!(add, "h1,h2");
                assert!(url.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
