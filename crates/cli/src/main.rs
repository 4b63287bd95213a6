//! CLI entry point for the DPX preservation pipeline
//!
//! One subcommand per batch stage, intended to be triggered periodically by
//! an external scheduler. A stage finding no input exits non-zero so the
//! scheduler can distinguish "nothing delivered" from a quiet success.

use clap::{Parser, Subcommand};
use dpx_pipeline::ledger::{new_run_id, LedgerSet};
use dpx_pipeline::{assess, coordinator, gap_check, startup, verify};
use dpx_pipeline::{PipelineConfig, PipelineError, PipelineLayout};
use std::path::PathBuf;
use std::process::ExitCode;

/// DPX preservation pipeline - gap check, assess, encode, verify
#[derive(Parser, Debug)]
#[command(name = "dpx-pipeline")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Skip startup checks (encoder, conformance checker, inspector).
    /// For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    #[command(subcommand)]
    stage: StageCommand,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum StageCommand {
    /// Check intake sequences for frame gaps
    GapCheck,
    /// Assess gap-free sequences against the conformance policy
    Assess,
    /// Encode accepted sequences through the worker pool
    Encode,
    /// Classify encoder logs and dispatch outcomes
    Verify,
    /// Run all four stages in order
    Run,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let cfg = match PipelineConfig::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(config = %args.config.display(), error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if args.skip_checks {
        tracing::warn!("skipping startup checks (--skip-checks enabled)");
    } else if let Err(e) = startup::run_startup_checks() {
        tracing::error!(error = %e, "startup check failed");
        return ExitCode::FAILURE;
    }

    let layout = PipelineLayout::new(&cfg.paths.root);
    if let Err(e) = layout.ensure() {
        tracing::error!(error = %e, "could not create pipeline directories");
        return ExitCode::FAILURE;
    }
    match layout.reconcile() {
        Ok(swept) if !swept.is_empty() => {
            tracing::warn!(count = swept.len(), "swept run lists left by an interrupted run");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %e, "startup reconciliation failed");
            return ExitCode::FAILURE;
        }
    }

    let ledgers = LedgerSet::open(&layout.ledgers);
    let run_id = new_run_id();
    tracing::info!(run_id = run_id.as_str(), root = %cfg.paths.root.display(), "pipeline run starting");

    match args.stage {
        StageCommand::GapCheck => {
            report_stage("gap check", gap_check::run(&layout, &ledgers, &run_id))
        }
        StageCommand::Assess => report_stage(
            "assessment",
            assess::run(&cfg, &layout, &ledgers, &run_id),
        ),
        StageCommand::Encode => report_stage(
            "encode",
            coordinator::run(&cfg, &layout, &ledgers, &run_id).await,
        ),
        StageCommand::Verify => {
            report_stage("verification", verify::run(&cfg, &layout, &ledgers, &run_id))
        }
        StageCommand::Run => run_all(&cfg, &layout, &ledgers, &run_id).await,
    }
}

/// Reports one stage result: missing input and errors both exit non-zero.
fn report_stage<T: std::fmt::Debug>(
    name: &str,
    result: Result<T, PipelineError>,
) -> ExitCode {
    match result {
        Ok(summary) => {
            tracing::info!(stage = name, summary = ?summary, "stage complete");
            ExitCode::SUCCESS
        }
        Err(e) if e.is_no_input() => {
            tracing::error!(stage = name, "no input available, exiting");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(stage = name, error = %e, "stage failed");
            ExitCode::FAILURE
        }
    }
}

/// Runs the full chain. Stages that find no input are reported and skipped;
/// the chain only fails when nothing at all was available to do, or a stage
/// hit a real error.
async fn run_all(
    cfg: &PipelineConfig,
    layout: &PipelineLayout,
    ledgers: &LedgerSet,
    run_id: &str,
) -> ExitCode {
    let mut did_work = false;

    macro_rules! stage {
        ($name:expr, $result:expr) => {
            match $result {
                Ok(summary) => {
                    tracing::info!(stage = $name, summary = ?summary, "stage complete");
                    did_work = true;
                }
                Err(e) if e.is_no_input() => {
                    tracing::info!(stage = $name, "no input for stage, continuing");
                }
                Err(e) => {
                    tracing::error!(stage = $name, error = %e, "stage failed");
                    return ExitCode::FAILURE;
                }
            }
        };
    }

    stage!("gap check", gap_check::run(layout, ledgers, run_id));
    stage!("assessment", assess::run(cfg, layout, ledgers, run_id));
    stage!("encode", coordinator::run(cfg, layout, ledgers, run_id).await);
    stage!("verification", verify::run(cfg, layout, ledgers, run_id));

    if did_work {
        ExitCode::SUCCESS
    } else {
        tracing::error!("no input available for any stage");
        ExitCode::FAILURE
    }
}
