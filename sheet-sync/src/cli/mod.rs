//! Command-line interface

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{AppConfig, RemoteKind};
use crate::sync::{DriveStore, LocalStore, RemoteStore, SyncOrchestrator, SyncTarget};

#[derive(Parser, Debug)]
#[command(name = "sheet-sync")]
#[command(about = "Locate rows by key in an xlsx workbook, patch them and publish the result")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Configuration file (default: <config dir>/sheet-sync/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Work on a local xlsx file in place instead of the remote store
    #[arg(long, global = true, value_name = "FILE")]
    pub local: Option<PathBuf>,

    /// Apply edits in memory and report, but publish nothing
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Require every updated field to be present in the header row
    #[arg(long, global = true)]
    pub strict: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

impl GlobalArgs {
    pub fn output_format(&self) -> OutputFormat {
        if self.json { OutputFormat::Json } else { self.format }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable
    Text,
    /// Pretty JSON
    Json,
    /// Single-line JSON
    JsonCompact,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Locate the header row of a sheet and list its columns
    Headers(commands::inspect::HeadersArgs),
    /// Show the top-left block of a sheet's raw values
    Preview(commands::inspect::PreviewArgs),
    /// Update one row identified by its key
    Update(commands::update::UpdateArgs),
    /// Apply a JSON update plan across one or more sheets
    Batch(commands::update::BatchArgs),
}

/// Dispatch a parsed command line. Returns false when some record or sheet
/// could not be updated.
pub async fn run(cli: Cli) -> Result<bool> {
    if cli.global.no_color {
        colored::control::set_override(false);
    }
    let mut config = AppConfig::load(cli.global.config.as_deref())?;
    if cli.global.strict {
        config.header.strict = true;
    }
    let session = Session::new(config, &cli.global)?;

    match cli.command {
        Commands::Headers(args) => commands::inspect::handle_headers(&session, args).await,
        Commands::Preview(args) => commands::inspect::handle_preview(&session, args).await,
        Commands::Update(args) => commands::update::handle_update(&session, args).await,
        Commands::Batch(args) => commands::update::handle_batch(&session, args).await,
    }
}

/// Everything a command needs: configuration, the store and what to sync
pub struct Session {
    pub config: AppConfig,
    pub orchestrator: SyncOrchestrator<Box<dyn RemoteStore>>,
    pub target: SyncTarget,
    pub dry_run: bool,
    pub format: OutputFormat,
}

impl Session {
    pub fn new(config: AppConfig, global: &GlobalArgs) -> Result<Self> {
        let (store, target) = select_store(&config, global.local.as_deref())?;
        log::debug!("Using {}", store.describe());
        Ok(Self {
            orchestrator: SyncOrchestrator::new(store, config.retry_config()),
            target,
            dry_run: global.dry_run,
            format: global.output_format(),
            config,
        })
    }
}

fn select_store(config: &AppConfig, local: Option<&std::path::Path>) -> Result<(Box<dyn RemoteStore>, SyncTarget)> {
    if let Some(file) = local {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid local file path: {}", file.display()))?
            .to_string();
        let dir = match file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let target = SyncTarget {
            file_id: Some(name.clone()),
            remote_name: name,
            local_copy: None,
        };
        return Ok((Box::new(LocalStore::new(dir)), target));
    }

    let target = config.sync_target();
    let store: Box<dyn RemoteStore> = match config.remote.kind {
        RemoteKind::Drive => Box::new(DriveStore::new(
            config.remote.access_token.clone(),
            config.drive_endpoints(),
        )?),
        RemoteKind::Directory => {
            let dir = config
                .remote
                .directory
                .clone()
                .ok_or_else(|| anyhow::anyhow!("remote.kind = \"directory\" requires remote.directory"))?;
            Box::new(LocalStore::new(dir))
        }
    };
    Ok((store, target))
}
