pub mod apply;
pub mod init;
pub mod plan;
pub mod status;

use std::path::Path;

use anyhow::Context;
use gs_core::config::ShuffleConfig;
use gs_core::plan::PreviewRow;
use gs_core::scan::SafeScan;
use gs_core::types::FileSet;
use gs_core::ShuffleError;

/// Load and validate the configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<ShuffleConfig> {
    ShuffleConfig::load_from(path).with_context(|| {
        format!(
            "failed to load {} (create one with `gitshuffle init`)",
            path.display()
        )
    })
}

/// Scan the configured repository, pruning the state directory.
pub fn scan_files(config: &ShuffleConfig) -> anyhow::Result<FileSet> {
    let mut scan = SafeScan::new(&config.file_patterns)?;
    if let Some(name) = config.state_dir.file_name() {
        scan = scan.deny_dir(name.to_string_lossy());
    }
    let files = scan
        .scan(&config.repo_path)
        .with_context(|| format!("failed to scan {}", config.repo_path.display()))?;
    tracing::info!(files = files.len(), root = %config.repo_path.display(), "scan complete");
    Ok(files)
}

/// Attach an operator hint to errors that leave resumable state behind.
pub fn with_hint(err: ShuffleError) -> anyhow::Error {
    let resumable = err.is_resumable();
    let err = anyhow::Error::new(err);
    if resumable {
        err.context("apply stopped; rerun `gitshuffle apply` to resume from the last checkpoint")
    } else {
        err
    }
}

pub fn print_rows(rows: &[PreviewRow]) {
    println!("{:>5}  {:<20}  {:<32}  {:>5}", "#", "timestamp", "author", "files");
    println!("{}", "-".repeat(68));
    for row in rows {
        println!(
            "{:>5}  {:<20}  {:<32}  {:>5}",
            row.index, row.timestamp, row.author_email, row.file_count
        );
    }
}

pub fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
