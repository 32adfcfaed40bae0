//! sales-pipeline: runs the daily sales ETL from the current directory.
//!
//! Invoked with no arguments or with `run`. Layout overrides are read from
//! `pipeline.toml` in the working directory when present.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::error;

use sales_pipeline::{PipelineConfig, PipelineError, init_logging, run_pipeline};

/// Batch sales pipeline: raw copy, refinement, aggregation, publication.
#[derive(Parser, Debug)]
#[command(name = "sales-pipeline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the full pipeline (the default)
    Run,
}

/// Load the configuration for `root` and start logging
///
/// A configuration that fails to load still gets logging with the default
/// layout, so the failure reaches `logs/pipeline.log`.
fn setup(root: &Path) -> anyhow::Result<PipelineConfig> {
    match PipelineConfig::load(root) {
        Ok(config) => {
            init_logging(config.log_dir.as_deref()).context("Failed to initialise logging")?;
            Ok(config)
        }
        Err(err) => {
            let fallback = PipelineConfig::from_root(root);
            if let Err(log_err) = init_logging(fallback.log_dir.as_deref()) {
                eprintln!("Warning: {log_err}");
            }
            Err(anyhow::Error::new(err)
                .context(format!("Failed to load configuration from {}", root.display())))
        }
    }
}

fn run() -> anyhow::Result<()> {
    let root = std::env::current_dir().context("Failed to resolve working directory")?;
    let config = setup(&root)?;

    let report = run_pipeline(config)?;
    report.log_summary();
    Ok(())
}

fn fail(err: &anyhow::Error) -> ExitCode {
    error!(error = %format!("{err:#}"), "Pipeline run failed");
    match err.downcast_ref::<PipelineError>() {
        Some(e) => eprintln!("Error: {}", e.user_message()),
        None => eprintln!("Error: {err:#}"),
    }
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => match run() {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => fail(&err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_arguments_defaults_to_run() {
        let cli = Cli::try_parse_from(["sales-pipeline"]).unwrap();
        assert_eq!(cli.command.unwrap_or(Command::Run), Command::Run);

        let cli = Cli::try_parse_from(["sales-pipeline", "run"]).unwrap();
        assert_eq!(cli.command, Some(Command::Run));
    }

    #[test]
    fn test_unknown_arguments_rejected() {
        assert!(Cli::try_parse_from(["sales-pipeline", "--stages", "refine"]).is_err());
        assert!(Cli::try_parse_from(["sales-pipeline", "publish"]).is_err());
    }

    #[test]
    fn test_config_failure_is_logged() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("pipeline.toml"), "publish = \"sometimes\"\n").unwrap();

        let err = setup(temp.path()).unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_some());
        fail(&err);

        let log = std::fs::read_to_string(temp.path().join("logs").join("pipeline.log")).unwrap();
        assert!(log.contains("Pipeline run failed"));
        assert!(log.contains("pipeline.toml"));
    }
}
