//! relforge CLI
//!
//! Entry point for the `relforge` command-line tool.

use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use relforge::cache::sync::{self, DEFAULT_SIZE_LIMIT_MB};
use relforge::layout::{Layout, LayoutError};
use relforge::pipeline::{plan_rows, Pipeline, PipelineError};
use relforge::task::GraphError;

#[derive(Parser)]
#[command(name = "relforge")]
#[command(about = "Multi-stage native build driver with install caching", version)]
struct Cli {
    /// Increase log verbosity (repeat for debug output)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Top directory of the working tree (default: current directory)
    #[arg(long, global = true)]
    top_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the dependency-ordered task plan with freshness status
    Plan {
        /// Directory holding *.config.json component configs
        #[arg(long)]
        configs_dir: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove build/install directories for the named components
    Clean {
        /// Component names (a group, group:member, or single step)
        #[arg(required = true)]
        components: Vec<String>,

        /// Directory holding *.config.json component configs
        #[arg(long)]
        configs_dir: Option<PathBuf>,
    },

    /// Synchronize a snapshot directory with a shared cache directory
    Sync {
        #[command(flatten)]
        mode: SyncMode,

        /// Size limit in megabytes of the shared cache (negative
        /// disables pruning)
        #[arg(long, allow_negative_numbers = true)]
        size_limit_mb: Option<i64>,

        /// Snapshot directory that is being pushed from or pulled to
        snapshot_dir: PathBuf,

        /// Shared cache directory
        shared_cache_dir: PathBuf,
    },

    /// Print the resolved build/install/cache locations
    Envinfo,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SyncMode {
    /// Pushes local snapshot to a shared cache
    #[arg(long)]
    push: bool,

    /// Pulls changes from a shared cache to a local snapshot
    #[arg(long)]
    pull: bool,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::new("relforge=info"),
        _ => EnvFilter::new("relforge=debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let top_dir = match cli.top_dir {
        Some(dir) => dir,
        None => env::current_dir()?,
    };
    let mut layout = Layout::resolve(top_dir)?;

    match cli.command {
        Commands::Plan { configs_dir, json } => {
            if let Some(dir) = configs_dir {
                layout.configs_dir = dir;
            }
            let pipeline = Pipeline::new(layout);
            let graph = pipeline.assemble()?;
            let rows = plan_rows(&graph)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows).expect("plan is serializable"));
            } else {
                for row in rows {
                    let status = if row.up_to_date { "fresh" } else { "stale" };
                    if row.task_deps.is_empty() && row.calc_deps.is_empty() {
                        println!("{status:>5}  {}", row.name);
                    } else {
                        let mut deps = row.task_deps;
                        deps.extend(row.calc_deps);
                        println!("{status:>5}  {}  <- {}", row.name, deps.join(", "));
                    }
                }
            }
        }
        Commands::Clean {
            components,
            configs_dir,
        } => {
            if let Some(dir) = configs_dir {
                layout.configs_dir = dir;
            }
            let pipeline = Pipeline::new(layout);
            let graph = pipeline.assemble()?;
            let cleaned = pipeline.clean(&graph, &components)?;
            println!("cleaned {cleaned} task(s)");
        }
        Commands::Sync {
            mode,
            size_limit_mb,
            snapshot_dir,
            shared_cache_dir,
        } => {
            let limit = size_limit_mb
                .or(layout.cache_size_limit_mb)
                .unwrap_or(DEFAULT_SIZE_LIMIT_MB);
            let report = if mode.push {
                sync::push(&snapshot_dir, &shared_cache_dir, limit)?
            } else {
                sync::pull(&shared_cache_dir, &snapshot_dir)?
            };
            println!(
                "{} linked, {} skipped, {} pruned ({} bytes reclaimed)",
                report.linked, report.skipped, report.pruned, report.pruned_bytes
            );
        }
        Commands::Envinfo => {
            println!("TOP_DIR: {}", layout.top_dir.display());
            println!("BUILD_ROOT: {}", layout.build_root.display());
            println!("INSTALL_ROOT: {}", layout.install_root.display());
            println!("CACHE_ROOT: {}", layout.cache_root.display());
            println!("CONFIGS_DIR: {}", layout.configs_dir.display());
            println!("CMAKE: {}", layout.cmake_program);
        }
    }
    Ok(())
}
