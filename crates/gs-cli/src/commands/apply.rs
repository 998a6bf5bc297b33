use std::path::Path;

use chrono::Utc;
use gs_core::engine::{ApplyOptions, ApplyOutcome, Engine, RetryPolicy};
use gs_core::git::GitBackend;
use gs_core::plan::Plan;

use super::{load_config, print_rows, scan_files, short, with_hint};

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyArgs {
    pub dry_run: bool,
    pub fresh: bool,
    pub allow_dirty: bool,
    pub allow_detached: bool,
}

/// Run the `apply` subcommand.
pub fn run(config_path: &Path, args: ApplyArgs) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let state_dir = config.state_dir_path();
    let backend = GitBackend::new(&config.repo_path, &state_dir);

    if !backend.is_repo() {
        if args.dry_run {
            // Nothing to pre-flight against yet; show what would happen.
            let files = scan_files(&config)?;
            let plan = Plan::build(&config, &files, Utc::now())?;
            println!(
                "Dry run: {} is not a repository yet; apply would initialise it and create {} commits",
                config.repo_path.display(),
                plan.len()
            );
            print_rows(&plan.preview());
            return Ok(());
        }
        backend.init_if_missing()?;
    }

    let files = scan_files(&config)?;
    let opts = ApplyOptions {
        dry_run: args.dry_run,
        allow_dirty: args.allow_dirty,
        allow_detached: args.allow_detached,
        fresh: args.fresh,
        retry: RetryPolicy::from_config(&config.retry),
    };

    let engine = Engine::new(backend, state_dir);
    let report = engine
        .apply(&config, &files, Utc::now(), &opts)
        .map_err(with_hint)?;

    match report.outcome {
        ApplyOutcome::DryRun => {
            println!(
                "Dry run for plan {}: {} of {} commits would be applied ({} already done)",
                short(&report.manifest_hash),
                report.would_apply.len(),
                report.total,
                report.skipped
            );
            print_rows(&report.would_apply);
        }
        ApplyOutcome::AlreadyComplete => {
            println!(
                "Plan {} was already fully applied ({} commits); use --fresh to start over",
                short(&report.manifest_hash),
                report.total
            );
        }
        ApplyOutcome::Completed => {
            if report.resumed {
                println!("Resumed after {} previously applied commits", report.skipped);
            }
            for commit in &report.applied {
                println!("  [{}/{}] {}", commit.index + 1, report.total, short(&commit.hash));
            }
            println!(
                "Applied {} commits; plan {} complete",
                report.applied.len(),
                short(&report.manifest_hash)
            );
        }
    }
    Ok(())
}
