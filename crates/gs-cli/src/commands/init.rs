use std::path::Path;

use anyhow::{bail, Context};
use gs_core::config::ShuffleConfig;

/// Run the `init` subcommand: write the template config, never overwriting.
pub fn run(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        bail!("{} already exists; edit it or remove it first", path.display());
    }
    let json = ShuffleConfig::template().to_json()?;
    std::fs::write(path, json + "\n")
        .with_context(|| format!("failed to write {}", path.display()))?;

    tracing::info!(path = %path.display(), "wrote starter configuration");
    println!("Created {}", path.display());
    println!("Edit the authors, duration and file_patterns, then run `gitshuffle plan`.");
    Ok(())
}
