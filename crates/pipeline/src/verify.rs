//! Post-encode verification stage.
//!
//! Every container log left in the encoder output directory is classified by
//! an ordered, first-match-wins catalog of diagnostic markers and the
//! sequence dispatched accordingly: archive on success, one-shot version-2
//! requeue on a first reversibility overflow, permanent failure with an
//! operator alert on a repeat overflow, quarantine on recognized errors, and
//! artifact discard (with the source left queued) for stalled encodes.
//!
//! The marker catalog is versioned: new diagnostic strings are added as
//! catalog entries, never as new control flow, and classification is pure
//! over the log text so identical logs always classify identically.

use crate::inspect;
use crate::ledger::{LedgerEntry, LedgerOutcome, LedgerSet, Stage};
use crate::layout::PipelineLayout;
use crate::moves;
use crate::report::{append_report, ErrorReport};
use crate::sequence::EncodeVersion;
use crate::PipelineError;
use dpx_pipeline_config::PipelineConfig;
use std::path::{Path, PathBuf};

/// Marker the encoder prints after a fully verified encode.
pub const SUCCESS_MARKER: &str = "Reversibility was checked, no issue detected";

/// Markers for an oversized reversibility artifact.
pub const OVERFLOW_MARKERS: &[&str] = &[
    "Error: the reversibility file is becoming big",
    "Error: undecodable file is becoming too big",
];

/// Marker for naming inconsistencies surfaced during encoding.
pub const INCOHERENT_MARKER: &str = "Warning: incoherent file names";

/// Markers for recognized-but-unrecoverable encoder failures.
pub const GENERIC_ERROR_MARKERS: &[&str] = &[
    "Reversibility was checked, issues detected",
    "Conversion failed!",
    "Error:",
    "Please contact info@mediaarea.net if you want support of such content",
];

/// Classification of one completed encode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// Encode completed and reversibility verified.
    Success,
    /// Reversibility artifact exceeded the size threshold.
    ReversibilityOverflow,
    /// Frame naming inconsistency reported mid-encode.
    IncoherentNaming,
    /// Recognized failure with no automatic remediation.
    GenericError,
    /// No recognized marker: the encoder was interrupted or killed.
    Stalled,
}

impl std::fmt::Display for EncodeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EncodeOutcome::Success => "success",
            EncodeOutcome::ReversibilityOverflow => "reversibility_overflow",
            EncodeOutcome::IncoherentNaming => "incoherent_naming",
            EncodeOutcome::GenericError => "generic_error",
            EncodeOutcome::Stalled => "stalled",
        };
        write!(f, "{}", s)
    }
}

/// One catalog rule: any of the markers maps to the outcome.
#[derive(Debug, Clone)]
struct Rule {
    markers: &'static [&'static str],
    outcome: EncodeOutcome,
}

/// Ordered marker catalog mapping encoder log text to an outcome.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    /// The current catalog. Order matters: the success marker wins over
    /// everything, and the specific overflow markers must precede the
    /// catch-all "Error:" rule they would otherwise fall into.
    pub fn v1() -> Self {
        Self {
            rules: vec![
                Rule {
                    markers: &[SUCCESS_MARKER],
                    outcome: EncodeOutcome::Success,
                },
                Rule {
                    markers: OVERFLOW_MARKERS,
                    outcome: EncodeOutcome::ReversibilityOverflow,
                },
                Rule {
                    markers: &[INCOHERENT_MARKER],
                    outcome: EncodeOutcome::IncoherentNaming,
                },
                Rule {
                    markers: GENERIC_ERROR_MARKERS,
                    outcome: EncodeOutcome::GenericError,
                },
            ],
        }
    }

    /// Classifies log text; a log matching no rule is a stalled encode.
    pub fn classify(&self, log_text: &str) -> EncodeOutcome {
        for rule in &self.rules {
            if rule.markers.iter().any(|m| log_text.contains(m)) {
                return rule.outcome;
            }
        }
        EncodeOutcome::Stalled
    }

    /// The log line carrying the first matching marker, for ledger
    /// diagnostics.
    pub fn matching_line<'a>(&self, log_text: &'a str) -> Option<&'a str> {
        for rule in &self.rules {
            for line in log_text.lines() {
                if rule.markers.iter().any(|m| line.contains(m)) {
                    return Some(line);
                }
            }
        }
        None
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::v1()
    }
}

/// Outcome counts of one verification run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifySummary {
    /// Containers archived and sources moved to completed.
    pub archived: usize,
    /// First overflows requeued at version 2.
    pub retried: usize,
    /// Repeat overflows: container deleted, operator alerted.
    pub overflow_fatal: usize,
    /// Incoherent-naming and generic failures quarantined.
    pub quarantined: usize,
    /// Containers failing the container conformance policy.
    pub container_policy_failed: usize,
    /// Stalled encodes whose artifacts were discarded.
    pub stalled: usize,
    /// Logs that errored during dispatch and were left untouched.
    pub errors: usize,
}

/// Runs the verification stage over the encoder output directory.
pub fn run(
    cfg: &PipelineConfig,
    layout: &PipelineLayout,
    ledgers: &LedgerSet,
    run_id: &str,
) -> Result<VerifySummary, PipelineError> {
    let verifier = Verifier {
        cfg,
        layout,
        ledgers,
        run_id,
        classifier: Classifier::v1(),
    };
    verifier.run()
}

/// One verification run over the encoder output directory.
struct Verifier<'a> {
    cfg: &'a PipelineConfig,
    layout: &'a PipelineLayout,
    ledgers: &'a LedgerSet,
    run_id: &'a str,
    classifier: Classifier,
}

impl Verifier<'_> {
    fn run(&self) -> Result<VerifySummary, PipelineError> {
        let logs = collect_logs(&self.layout.container_out)?;
        if logs.is_empty() {
            return Err(PipelineError::NoInput("verification"));
        }

        let mut summary = VerifySummary::default();
        for (id, log_path) in logs {
            if let Err(e) = self.dispatch_log(&id, &log_path, &mut summary) {
                tracing::warn!(sequence = id.as_str(), error = %e, "verification failed for log, leaving untouched");
                summary.errors += 1;
            }
        }

        tracing::info!(
            archived = summary.archived,
            retried = summary.retried,
            overflow_fatal = summary.overflow_fatal,
            quarantined = summary.quarantined,
            container_policy_failed = summary.container_policy_failed,
            stalled = summary.stalled,
            errors = summary.errors,
            "verification run complete"
        );
        Ok(summary)
    }

    fn dispatch_log(
        &self,
        id: &str,
        log_path: &Path,
        summary: &mut VerifySummary,
    ) -> Result<(), PipelineError> {
        let text = std::fs::read_to_string(log_path)?;
        let outcome = self.classifier.classify(&text);
        let diagnostic = self.classifier.matching_line(&text).map(|l| l.to_string());

        match outcome {
            EncodeOutcome::Success => self.handle_success(id, log_path, summary),
            EncodeOutcome::ReversibilityOverflow => {
                self.handle_overflow(id, log_path, diagnostic, summary)
            }
            EncodeOutcome::IncoherentNaming => self.handle_quarantine(
                id,
                log_path,
                LedgerOutcome::IncoherentNaming,
                diagnostic,
                summary,
            ),
            EncodeOutcome::GenericError => self.handle_quarantine(
                id,
                log_path,
                LedgerOutcome::GenericError,
                diagnostic,
                summary,
            ),
            EncodeOutcome::Stalled => self.handle_stalled(id, log_path, summary),
        }
    }

    fn handle_success(
        &self,
        id: &str,
        log_path: &Path,
        summary: &mut VerifySummary,
    ) -> Result<(), PipelineError> {
        let container = self.layout.container_path(id);
        if !container.exists() {
            // Success marker but no container: a partial run was interrupted
            // after deletion started. Discard the log and let the sequence
            // re-encode.
            tracing::warn!(sequence = id, "success log without container, discarding log");
            return self.handle_stalled(id, log_path, summary);
        }

        // The container itself must conform before the sequence is archived.
        if let Some(policy) = &self.cfg.paths.container_policy {
            let verdict = inspect::check_policy(&self.cfg.resolve_policy(policy), &container)?;
            if !verdict.pass {
                tracing::warn!(sequence = id, "container failed the conformance policy");
                summary.container_policy_failed += 1;
                return self.handle_quarantine(
                    id,
                    log_path,
                    LedgerOutcome::ContainerPolicyFail,
                    Some(verdict.raw),
                    summary,
                );
            }
        }

        self.ledgers.success.append(&LedgerEntry::new(
            self.run_id,
            Stage::Verify,
            LedgerOutcome::Archived,
            &self.layout.completed.join(id),
            None,
        ))?;

        moves::move_into(&container, &self.layout.check)?;
        moves::move_into(log_path, &self.layout.retained_logs)?;
        if let Some((source, _)) = self.layout.queue_dir_for(id) {
            moves::move_into(&source, &self.layout.completed)?;
        } else {
            tracing::warn!(sequence = id, "source sequence not found in either encode queue");
        }

        tracing::info!(sequence = id, "encode verified, container archived");
        summary.archived += 1;
        Ok(())
    }

    fn handle_overflow(
        &self,
        id: &str,
        log_path: &Path,
        diagnostic: Option<String>,
        summary: &mut VerifySummary,
    ) -> Result<(), PipelineError> {
        let container = self.layout.container_path(id);
        let source = self.layout.queue_dir_for(id);
        let already_v2 = matches!(source, Some((_, EncodeVersion::V2)));

        // One retry only: a sequence that already consumed its retry — or
        // that was encoded at version 2 in the first place — cannot be
        // helped by another pass.
        if self.ledgers.has_retried(id)? || already_v2 {
            tracing::error!(
                sequence = id,
                "repeat reversibility data error, deleting container"
            );
            self.ledgers.deletion.append(&LedgerEntry::new(
                self.run_id,
                Stage::Verify,
                LedgerOutcome::OverflowFatal,
                &self.layout.review.join(id),
                diagnostic.as_deref(),
            ))?;
            append_report(
                &self.layout.error_reports,
                &ErrorReport::new(
                    id,
                    Stage::Verify,
                    LedgerOutcome::OverflowFatal,
                    self.run_id,
                    "repeated reversibility data error; container deleted, sequence quarantined",
                ),
            )?;

            remove_if_exists(&container)?;
            retain_log(log_path, &self.layout.retained_logs, "fail", id)?;
            if let Some((source, _)) = source {
                moves::move_into(&source, &self.layout.review)?;
            }
            summary.overflow_fatal += 1;
            return Ok(());
        }

        tracing::warn!(
            sequence = id,
            "new encoding error: oversized reversibility data, requeueing at version 2"
        );
        self.ledgers.v2_retry.append(&LedgerEntry::new(
            self.run_id,
            Stage::Verify,
            LedgerOutcome::OverflowRetry,
            &self.layout.encode_v2.join(id),
            diagnostic.as_deref(),
        ))?;

        remove_if_exists(&container)?;
        retain_log(log_path, &self.layout.retained_logs, "retry", id)?;
        if let Some((source, EncodeVersion::V1)) = source {
            moves::move_into(&source, &self.layout.encode_v2)?;
        } else {
            tracing::warn!(sequence = id, "source sequence not found in the v1 queue");
        }
        summary.retried += 1;
        Ok(())
    }

    fn handle_quarantine(
        &self,
        id: &str,
        log_path: &Path,
        outcome: LedgerOutcome,
        diagnostic: Option<String>,
        summary: &mut VerifySummary,
    ) -> Result<(), PipelineError> {
        tracing::warn!(sequence = id, outcome = outcome.as_str(), "quarantining failed encode");
        self.ledgers.review.append(&LedgerEntry::new(
            self.run_id,
            Stage::Verify,
            outcome,
            &self.layout.review.join(id),
            diagnostic.as_deref(),
        ))?;

        let container = self.layout.container_path(id);
        if container.exists() {
            moves::move_into(&container, &self.layout.review_containers)?;
        }
        moves::move_into(log_path, &self.layout.review_logs)?;
        if let Some((source, _)) = self.layout.queue_dir_for(id) {
            moves::move_into(&source, &self.layout.review)?;
        }
        summary.quarantined += 1;
        Ok(())
    }

    fn handle_stalled(
        &self,
        id: &str,
        log_path: &Path,
        summary: &mut VerifySummary,
    ) -> Result<(), PipelineError> {
        tracing::warn!(
            sequence = id,
            "no completion marker in log, treating as stalled encode and discarding artifacts"
        );
        // The note lands before the deletes so a crash in between cannot
        // lose the stall evidence.
        append_report(
            &self.layout.error_reports,
            &ErrorReport::new(
                id,
                Stage::Verify,
                LedgerOutcome::Stalled,
                self.run_id,
                "encoding stalled mid-process; partial container and log deleted, sequence will retry",
            ),
        )?;

        remove_if_exists(&self.layout.container_path(id))?;
        std::fs::remove_file(log_path)?;
        summary.stalled += 1;
        Ok(())
    }
}

/// Lists `(sequence id, log path)` pairs for every encoder log, in name
/// order.
fn collect_logs(container_out: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut logs = Vec::new();
    for entry in std::fs::read_dir(container_out)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(id) = name.strip_suffix(".mkv.txt") {
            logs.push((id.to_string(), entry.path()));
        }
    }
    logs.sort();
    Ok(logs)
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Moves a settled log into the retained-logs directory under a
/// `<disposition>_` prefix, mirroring how retries and failures are told
/// apart on disk.
fn retain_log(
    log_path: &Path,
    retained_logs: &Path,
    disposition: &str,
    id: &str,
) -> std::io::Result<()> {
    let dest = retained_logs.join(format!("{}_{}.mkv.txt", disposition, id));
    std::fs::rename(log_path, dest)
}
