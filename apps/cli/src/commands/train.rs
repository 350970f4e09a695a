//! Training command implementation.

use crate::commands::types::TrainArgs;
use crate::config::resolve_config_file;
use anyhow::{Context, Result};
use colored::Colorize;
use prefgen_training::{
    ProgressSink, RetrievalBackend, RunConfig, RunReport, StdoutProgressSink, TracingProgressSink,
    TrainingOrchestrator,
};
use serde_json::json;
use std::sync::Arc;

pub async fn execute(args: TrainArgs) -> Result<()> {
    let file = resolve_config_file(args.config.as_deref());
    let config = RunConfig::layered(file.as_deref(), &args.overlay()).context("Invalid run configuration")?;

    // In --json mode stdout carries only the report; progress goes to the stderr log.
    let progress: Arc<dyn ProgressSink> =
        if args.json { Arc::new(TracingProgressSink) } else { Arc::new(StdoutProgressSink) };

    if !args.json {
        println!();
        println!(
            "{} {} on {}",
            "Training".bold().cyan(),
            config.prompt_format.to_string().bold(),
            config.dataset.cyan()
        );
        println!();
    }

    let orchestrator = TrainingOrchestrator::new(Arc::new(RetrievalBackend), progress);
    let report = orchestrator.run(&config).await.context("Training run failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report_json(&config, &report))?);
        return Ok(());
    }

    print_report(&report);
    Ok(())
}

fn report_json(config: &RunConfig, report: &RunReport) -> serde_json::Value {
    json!({
        "run_id": report.run_id.0,
        "dataset": config.dataset,
        "prompt_format": config.prompt_format,
        "mode": report.plan.mode,
        "task": report.plan.task,
        "save_dir": report.plan.save_dir,
        "primary": report.primary,
        "trained": report.train.is_some(),
        "train": report.train,
        "test_metrics": report.test_metrics,
        "augmented": report.augmented.iter().map(|o| json!({
            "split": o.split.as_str(),
            "records": o.records.len(),
            "scores": o.scores,
        })).collect::<Vec<_>>(),
        "artifacts": report.artifacts,
        "manifest": report.manifest_path,
    })
}

fn print_report(report: &RunReport) {
    println!();
    println!("{}", "Run complete".bold().green());
    println!("  {:<14} {}", "Run ID:".dimmed(), report.run_id.to_string().cyan());
    println!("  {:<14} {:?}", "Mode:".dimmed(), report.plan.mode);
    println!("  {:<14} {}", "Save dir:".dimmed(), report.plan.save_dir.display());

    if let Some(train) = &report.train {
        println!(
            "  {:<14} {} epochs, {} steps, loss {:.4}{}",
            "Training:".dimmed(),
            train.epochs_completed,
            train.global_step,
            train.training_loss,
            if train.stopped_early { " (stopped early)".yellow().to_string() } else { String::new() }
        );
    } else {
        println!("  {:<14} {}", "Training:".dimmed(), "skipped (evaluated existing checkpoint)".yellow());
    }

    println!();
    println!("{}", "Test metrics".bold());
    for (key, value) in &report.test_metrics {
        println!("  {:<22} {:.4}", key, value);
    }

    for outcome in &report.augmented {
        println!();
        println!("{} {}", "Augmented".bold(), outcome.split.as_str().cyan());
        println!("  {} records written", outcome.records.len());
        if let Some(scores) = &outcome.scores {
            for (key, value) in scores {
                println!("  {:<22} {:.4}", key, value);
            }
        }
    }

    if !report.primary {
        println!();
        println!("  {}", "Not the primary process; nothing was written.".dimmed());
    } else if let Some(path) = &report.manifest_path {
        println!();
        println!("  {} {}", "Manifest:".dimmed(), path.display());
    }
    println!();
}
