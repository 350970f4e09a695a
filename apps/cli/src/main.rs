//! Prefgen CLI - fine-tune and evaluate preference-generation models
//!
//! Provides the `prefgen` command: `prefgen train` runs one fine-tuning
//! pipeline, `prefgen runs list` shows finished runs.

mod commands;
mod config;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{RunsCommand, TrainArgs, runs, train};

/// Prefgen - seq2seq fine-tuning for recommendation preferences
///
/// Trains a model to generate user-preference rationales or yes/no labels,
/// evaluates it and writes prediction-augmented records for the next stage.
#[derive(Parser, Debug)]
#[command(name = "prefgen", author, version, about = "Prefgen - preference generation fine-tuning")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one fine-tuning pipeline
    ///
    /// Loads the selected splits, trains (unless --evaluate-dir is given),
    /// evaluates on the test split and, for REC-P, writes augmented records.
    Train(Box<TrainArgs>),

    /// Inspect finished runs
    #[command(subcommand)]
    Runs(RunsCommand),
}

fn parse_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so --json output on stdout stays parseable.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&args.log_level))
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Train(cmd) => train::execute(*cmd).await?,
        Command::Runs(cmd) => runs::execute(cmd)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }
}
