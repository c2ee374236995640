//! reposync - keep a set of local git clones in step with their remotes
//!
//! ## Commands
//!
//! - `sync`: fetch, then pull and/or push every discovered repository
//! - `list`: show which repositories discovery would pick up
//!
//! Exit codes: `0` success, `1` error, `3` merge conflicts need manual
//! resolution.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn, Level};

use reposync_core::{
    CancelSignal, GitCliOpener, ReportBuilder, RepositoryLocator, RunOptions, SyncConfig,
    SyncOrchestrator,
};

#[derive(Parser)]
#[command(name = "reposync")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Synchronise many local git repositories with their remotes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Project root used for discovery and relative config paths
    #[arg(long, global = true, env = "REPOSYNC_PROJECT_ROOT")]
    project_root: Option<PathBuf>,

    /// Config file (default: <project-root>/config/reposync.json when present)
    #[arg(long, global = true, env = "REPOSYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, pull and push every discovered repository
    Sync(SyncArgs),

    /// List the repositories discovery finds
    List {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(clap::Args)]
struct SyncArgs {
    /// Report planned actions without pulling, pushing or committing
    #[arg(long)]
    dry_run: bool,

    /// Only process this repository
    #[arg(long)]
    repo: Option<String>,

    /// Commit uncommitted changes before syncing
    #[arg(long)]
    auto_commit: bool,

    /// Skip fetching; plan against the last fetched state
    #[arg(long)]
    offline: bool,

    /// Override the number of repositories processed at once
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Override the per git command timeout, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Must run before parsing so `env = ...` arguments see `.env` values.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    reposync_core::init_tracing(cli.json, level);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(error = %format!("{err:#}"), "reposync failed");
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let root = match cli.project_root {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let config = load_config(&root, cli.config.as_deref())?;

    match cli.command {
        Commands::Sync(args) => cmd_sync(config, args).await,
        Commands::List { format } => cmd_list(&config, format),
    }
}

fn load_config(root: &Path, config: Option<&Path>) -> Result<SyncConfig> {
    SyncConfig::load(root, config).with_context(|| {
        format!(
            "Failed to load configuration for project root {}",
            root.display()
        )
    })
}

async fn cmd_sync(mut config: SyncConfig, args: SyncArgs) -> Result<u8> {
    if let Some(max_parallel) = args.max_parallel {
        if max_parallel == 0 {
            bail!("--max-parallel must be at least 1");
        }
        config.max_parallel = max_parallel;
    }
    if let Some(secs) = args.timeout_secs {
        if secs == 0 {
            bail!("--timeout-secs must be at least 1");
        }
        config.command_timeout = Duration::from_secs(secs);
    }

    let discovery = RepositoryLocator::from_config(&config).discover();
    if let Some(target) = &args.repo {
        if !discovery.repositories.iter().any(|r| &r.name == target) {
            bail!("Repository '{target}' was not found by discovery");
        }
    }
    info!(
        repositories = discovery.repositories.len(),
        warnings = discovery.warnings.len(),
        "discovery complete"
    );

    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing repositories already in progress");
            on_interrupt.cancel();
        }
    });

    let options = RunOptions {
        dry_run: args.dry_run,
        target_repo: args.repo,
        auto_commit: args.auto_commit,
        fetch: !args.offline,
    };
    let opener = Arc::new(GitCliOpener::new(config.command_timeout));
    let orchestrator =
        SyncOrchestrator::new(Arc::new(config), opener).with_cancel_signal(cancel);
    let results = orchestrator.run(&discovery.repositories, &options).await;

    let report = ReportBuilder::new()
        .dry_run(options.dry_run)
        .with_warnings(discovery.warnings)
        .build(results);

    match args.format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text => print!("{}", report.render_text()),
    }
    Ok(report.exit_code())
}

fn cmd_list(config: &SyncConfig, format: OutputFormat) -> Result<u8> {
    let discovery = RepositoryLocator::from_config(config).discover();
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "repositories": discovery.repositories,
                "warnings": discovery.warnings,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            if discovery.repositories.is_empty() {
                println!("No repositories found under {}", config.project_root.display());
            }
            for repo in &discovery.repositories {
                println!("{}\t{}", repo.name, repo.path.display());
            }
            for warning in &discovery.warnings {
                println!("excluded: {}", warning.reason);
            }
        }
    }
    Ok(0)
}
