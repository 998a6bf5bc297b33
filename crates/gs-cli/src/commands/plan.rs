use std::path::Path;

use chrono::Utc;
use gs_core::plan::Plan;
use serde_json::json;

use super::{load_config, print_rows, scan_files, short};

/// Run the `plan` subcommand: scan, plan and print. No side effects.
pub fn run(config_path: &Path, json_output: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let files = scan_files(&config)?;
    let plan = Plan::build(&config, &files, Utc::now())?;

    if json_output {
        let body = json!({
            "manifest_hash": plan.manifest_hash,
            "reference_time": plan.reference_time,
            "commits": plan.preview(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!(
        "Plan {}: {} commits covering {} files",
        short(&plan.manifest_hash),
        plan.len(),
        plan.file_count()
    );
    print_rows(&plan.preview());
    Ok(())
}
