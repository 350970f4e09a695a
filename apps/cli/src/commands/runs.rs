//! `prefgen runs` implementation.

use crate::commands::types::RunsCommand;
use crate::config::resolve_config_file;
use anyhow::{Context, Result};
use colored::Colorize;
use prefgen_training::{RunConfig, RunConfigOverlay, discover_runs};
use serde_json::json;
use std::path::PathBuf;

pub fn execute(command: RunsCommand) -> Result<()> {
    match command {
        RunsCommand::List { output_dir, config, json } => list_runs(output_dir, config, json),
    }
}

fn list_runs(output_dir: Option<PathBuf>, config: Option<PathBuf>, json_output: bool) -> Result<()> {
    let file = resolve_config_file(config.as_deref());
    let overlay = RunConfigOverlay { output_dir, ..RunConfigOverlay::default() };
    let config = RunConfig::layered(file.as_deref(), &overlay).context("Invalid run configuration")?;

    let runs = discover_runs(&config.output_dir)
        .with_context(|| format!("Failed to scan {}", config.output_dir.display()))?;

    if json_output {
        let out: Vec<_> = runs
            .iter()
            .map(|r| {
                json!({
                    "run_id": r.manifest.run_id.0,
                    "save_dir": r.save_dir,
                    "created_at": r.manifest.created_at,
                    "dataset": r.manifest.dataset,
                    "prompt_format": r.manifest.prompt_format,
                    "mode": r.manifest.mode,
                    "model": r.manifest.model,
                    "trained": r.manifest.trained,
                    "test_metrics": r.manifest.test_metrics,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Runs ({})", runs.len()).bold().cyan());
    println!();

    if runs.is_empty() {
        println!("  {}", format!("No runs found under {}.", config.output_dir.display()).dimmed());
        println!();
        println!("  {}", "Tip: start one with `prefgen train --dataset <name> --prompt-format REC-P`.".dimmed());
        return Ok(());
    }

    println!("{:<24} {:<12} {:<10} {}", "Save dir", "Format", "Trained", "Created");
    println!("{}", "─".repeat(78));
    for run in runs {
        let name = run.save_dir.file_name().map_or_else(String::new, |n| n.to_string_lossy().to_string());
        println!(
            "{:<24} {:<12} {:<10} {}",
            name.cyan(),
            run.manifest.prompt_format.to_string(),
            if run.manifest.trained { "yes".green() } else { "no".dimmed() },
            run.manifest.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
        );
    }
    println!();
    Ok(())
}
