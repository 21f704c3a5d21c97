//! mcp-pm - hook producer, live viewer and board commands for the mcp-pm
//! control plane.

mod hook;
mod tasks;
mod watch;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hook::HookKind;
use pm_config_and_utils::{init_logging, parse_level, Config, Paths};
use query_sync_bridge::TaskStatus;
use tokio::io::AsyncReadExt;
use tracing::warn;

/// mcp-pm command-line interface.
#[derive(Parser)]
#[command(name = "mcp-pm")]
#[command(about = "Event delivery and live sync for the mcp-pm control plane")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config and logs. Defaults to ~/.mcp-pm
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one workflow hook invocation read from stdin
    Hook {
        #[arg(value_enum)]
        kind: HookKind,
    },
    /// Follow control-plane changes until Ctrl-C
    Watch,
    /// Move a task to another board column
    MoveTask {
        /// Project owning the task
        #[arg(long)]
        project: i64,
        /// Task to move
        #[arg(long)]
        task: i64,
        /// Target column (todo, in_progress, done, archived)
        #[arg(long, value_parser = parse_status)]
        status: TaskStatus,
    },
}

fn parse_status(value: &str) -> Result<TaskStatus, String> {
    value.parse().map_err(|e| format!("{}", e))
}

fn load(base_dir: Option<PathBuf>) -> anyhow::Result<(Paths, Config)> {
    let paths = match base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new().context("resolving home directory")?,
    };
    let config = Config::load(&paths)
        .with_context(|| format!("loading {}", paths.config_file().display()))?;
    Ok((paths, config))
}

fn start_logging(service: &str, level: &str, paths: Option<&Paths>, also_stderr: bool) {
    let level = parse_level(level).to_string().to_lowercase();
    init_logging(service, &level, paths.map(Paths::log_file), also_stderr);
}

/// Hooks must always answer and exit 0, whatever happens to delivery.
async fn run_hook(kind: HookKind, base_dir: Option<PathBuf>, log_level: Option<String>) {
    let (paths, config, load_error) = match load(base_dir) {
        Ok((paths, config)) => (Some(paths), config, None),
        Err(e) => (None, Config::new(), Some(e)),
    };
    let level = log_level.unwrap_or_else(|| config.log_level.clone());
    start_logging("hook", &level, paths.as_ref(), false);
    if let Some(e) = load_error {
        warn!(error = %format!("{:#}", e), "Using default configuration");
    }

    let mut input = String::new();
    if let Err(e) = tokio::io::stdin().read_to_string(&mut input).await {
        warn!(error = %e, "Cannot read hook input");
    }

    hook::run(kind, &config, &input).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Hook { kind } = cli.command {
        run_hook(kind, cli.base_dir, cli.log_level).await;
        println!("{}", hook::response());
        return Ok(());
    }

    let (paths, config) = load(cli.base_dir)?;
    paths.ensure_dirs()?;
    let level = cli.log_level.unwrap_or_else(|| config.log_level.clone());

    match cli.command {
        Commands::Watch => {
            start_logging("watch", &level, Some(&paths), true);
            watch::run(&config).await?;
        }
        Commands::MoveTask {
            project,
            task,
            status,
        } => {
            start_logging("move-task", &level, Some(&paths), true);
            tasks::move_task(&config, project, task, status).await?;
        }
        Commands::Hook { .. } => {}
    }

    Ok(())
}
