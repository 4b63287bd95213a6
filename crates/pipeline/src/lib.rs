//! DPX preservation pipeline
//!
//! Batch stages that move film-scan frame sequences through gap checking,
//! policy assessment, lossless encoding, and post-encode verification, with
//! append-only ledgers as the crash-recovery record. Each stage is an
//! independent run driven by an external scheduler; directory location is
//! the ground truth for a sequence's stage.

pub mod assess;
pub mod concurrency;
pub mod coordinator;
pub mod encode;
pub mod gap_check;
pub mod inspect;
pub mod layout;
pub mod ledger;
pub mod moves;
pub mod report;
pub mod runlist;
pub mod sequence;
pub mod startup;
pub mod verify;

pub use dpx_pipeline_config as config;
pub use dpx_pipeline_config::PipelineConfig;

pub use concurrency::{derive_plan, WorkerPlan};
pub use coordinator::{plan_batch, EncodeCoordinator, EncodeJob};
pub use encode::{build_check_command, build_encode_command, run_check, run_encode, EncodeError, EncodeParams};
pub use gap_check::{gap_report, GapReport};
pub use inspect::{check_policy, parse_policy_output, PolicyVerdict, ToolError};
pub use layout::PipelineLayout;
pub use ledger::{new_run_id, Ledger, LedgerEntry, LedgerError, LedgerOutcome, LedgerSet, Stage};
pub use moves::{move_into, MoveError};
pub use report::{ErrorReport, ReportError};
pub use sequence::{discover, EncodeVersion, Sequence};
pub use startup::{run_startup_checks, StartupError};
pub use verify::{Classifier, EncodeOutcome};

use thiserror::Error;

/// Error type shared by the stage runners.
///
/// Per-sequence failures are isolated inside each stage; what surfaces here
/// is either the run-fatal absence of input or an environment problem the
/// whole run trips over.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No work available for the stage. Run-level fatal: the stage exits
    /// non-zero so the scheduler can alert.
    #[error("no input available for {0}")]
    NoInput(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Move(#[from] MoveError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

impl PipelineError {
    /// True for the missing-input condition, which callers treat as a
    /// distinct exit path from real failures.
    pub fn is_no_input(&self) -> bool {
        matches!(self, PipelineError::NoInput(_))
    }
}
