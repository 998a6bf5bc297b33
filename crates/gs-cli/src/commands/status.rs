use std::path::Path;

use gs_core::engine::Engine;
use gs_core::git::GitBackend;

use super::{load_config, short};

/// Run the `status` subcommand: print the persisted execution state.
pub fn run(config_path: &Path, json_output: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let state_dir = config.state_dir_path();
    let engine = Engine::new(GitBackend::new(&config.repo_path, &state_dir), &state_dir);
    let status = engine.status()?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("gitshuffle status  ({})", config.repo_path.display());
    println!("{}", "-".repeat(40));
    match &status.lock_holder {
        Some(lock) => println!("Lock:           held by pid {} since {}", lock.pid, lock.acquired_at),
        None => println!("Lock:           free"),
    }
    let Some(state) = &status.state else {
        println!("State:          no apply has run yet");
        return Ok(());
    };
    println!("Plan:           {}", short(&state.manifest_hash));
    println!("Status:         {}", state.status);
    println!("Applied:        {}/{}", state.applied(), state.total_commits);
    println!(
        "Head:           {}",
        state.last_recorded_head.as_deref().map(short).unwrap_or("(unborn)")
    );
    println!("Reference time: {}", state.reference_time.to_rfc3339());
    println!("Updated:        {}", state.updated_at.to_rfc3339());
    if let (Some(index), Some(error)) = (state.failed_index, &state.last_error) {
        println!("Failed at:      #{index}: {error}");
    }
    Ok(())
}
