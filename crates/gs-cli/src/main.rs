//! gitshuffle CLI: plan and replay a working tree as a timed commit history.

mod commands;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use gs_core::config::DEFAULT_CONFIG_FILE;
use gs_telemetry::logging::{self, LogFormat};
use gs_telemetry::tracing_setup::create_operation_span;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// gitshuffle -- turn a directory of files into a realistic, resumable
/// commit history.
#[derive(Parser)]
#[command(name = "gitshuffle", version, about)]
struct Cli {
    /// Path to the configuration file (JSON, or TOML by extension).
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file.
    Init,

    /// Build the plan and print it. Never touches the repository.
    Plan {
        /// Print the preview as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run pre-flight checks and apply the plan, resuming if interrupted.
    Apply {
        /// Simulate the run without committing or writing state.
        #[arg(long)]
        dry_run: bool,
        /// Discard any persisted state and start a new run.
        #[arg(long)]
        fresh: bool,
        /// Proceed even if tracked files have uncommitted changes.
        #[arg(long)]
        allow_dirty: bool,
        /// Proceed even if HEAD is detached.
        #[arg(long)]
        allow_detached: bool,
    },

    /// Show the persisted execution state.
    Status {
        /// Print the state as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Human
    };
    logging::init(
        format,
        "gitshuffle",
        logging::level_for_verbosity(cli.verbose, cli.quiet),
    );

    let name = match &cli.command {
        Commands::Init => "init",
        Commands::Plan { .. } => "plan",
        Commands::Apply { .. } => "apply",
        Commands::Status { .. } => "status",
    };
    let (span, _trace_id) = create_operation_span(name);
    let _enter = span.enter();

    match cli.command {
        Commands::Init => commands::init::run(&cli.config),
        Commands::Plan { json } => commands::plan::run(&cli.config, json),
        Commands::Apply {
            dry_run,
            fresh,
            allow_dirty,
            allow_detached,
        } => commands::apply::run(
            &cli.config,
            commands::apply::ApplyArgs {
                dry_run,
                fresh,
                allow_dirty,
                allow_detached,
            },
        ),
        Commands::Status { json } => commands::status::run(&cli.config, json),
    }
}
