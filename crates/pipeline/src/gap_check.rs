//! Sequence gap checking.
//!
//! The first gate of the pipeline: verifies that a sequence's frame-number
//! set is contiguous before anything else touches it. A gap means either
//! silent data loss in the scan or a delivery problem, and must short-circuit
//! the sequence to manual review before an encoder ever sees it.

use crate::ledger::{LedgerEntry, LedgerOutcome, LedgerSet, Stage};
use crate::layout::PipelineLayout;
use crate::moves;
use crate::sequence::{self, frame_index, is_frame_file, Candidate, Sequence};
use crate::PipelineError;
use std::collections::BTreeSet;
use std::path::Path;
use walkdir::WalkDir;

/// Contiguity report for one sequence's observed frame indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapReport {
    /// Lowest observed frame index.
    pub first: u64,
    /// Highest observed frame index.
    pub last: u64,
    /// Number of frame files observed.
    pub frame_count: usize,
    /// Indices missing from the inclusive first..=last range.
    pub missing: Vec<u64>,
}

impl GapReport {
    pub fn has_gaps(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// Collects the observed frame-index set of a frames directory.
///
/// Frame files whose names carry no digits are ignored; they cannot occupy a
/// position in the sequence.
pub fn scan_frame_indices(frames_dir: &Path) -> std::io::Result<BTreeSet<u64>> {
    let mut indices = BTreeSet::new();
    for entry in WalkDir::new(frames_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || !is_frame_file(entry.path()) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if let Some(index) = frame_index(name) {
                indices.insert(index);
            }
        }
    }
    Ok(indices)
}

/// Computes the contiguity report for an observed index set.
///
/// Returns None for an empty set. A single frame is trivially contiguous.
pub fn gap_report(indices: &BTreeSet<u64>) -> Option<GapReport> {
    let first = *indices.iter().next()?;
    let last = *indices.iter().next_back()?;
    let missing: Vec<u64> = (first..=last).filter(|i| !indices.contains(i)).collect();
    Some(GapReport {
        first,
        last,
        frame_count: indices.len(),
        missing,
    })
}

/// Outcome counts of one gap-check run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GapCheckSummary {
    /// Gap-free sequences moved to assessment.
    pub clean: usize,
    /// Gapped sequences routed to review.
    pub gapped: usize,
    /// Frameless sequence directories routed to review.
    pub empty: usize,
    /// Candidates already terminal in a ledger.
    pub skipped: usize,
    /// Candidates that errored and were left in place.
    pub errors: usize,
}

/// Runs the gap-check stage over the intake staging directory.
///
/// Gapped and empty sequences are recorded in the review ledger before they
/// move; clean sequences move to the assessment staging directory. One
/// sequence's failure never aborts the rest of the batch.
pub fn run(
    layout: &PipelineLayout,
    ledgers: &LedgerSet,
    run_id: &str,
) -> Result<GapCheckSummary, PipelineError> {
    let candidates = sequence::discover(&layout.gap_check)?;
    if candidates.is_empty() {
        return Err(PipelineError::NoInput("gap check"));
    }

    let mut summary = GapCheckSummary::default();
    for candidate in candidates {
        match check_candidate(layout, ledgers, run_id, &candidate, &mut summary) {
            Ok(()) => {}
            Err(e) => {
                let id = match &candidate {
                    Candidate::Frames(seq) => seq.id.as_str(),
                    Candidate::Empty { id, .. } => id.as_str(),
                };
                tracing::warn!(sequence = id, error = %e, "gap check failed for sequence, leaving in place");
                summary.errors += 1;
            }
        }
    }

    tracing::info!(
        clean = summary.clean,
        gapped = summary.gapped,
        empty = summary.empty,
        skipped = summary.skipped,
        errors = summary.errors,
        "gap check run complete"
    );
    Ok(summary)
}

fn check_candidate(
    layout: &PipelineLayout,
    ledgers: &LedgerSet,
    run_id: &str,
    candidate: &Candidate,
    summary: &mut GapCheckSummary,
) -> Result<(), PipelineError> {
    let seq = match candidate {
        Candidate::Empty { id, root } => {
            // A frameless delivery is an error condition, not a skip.
            tracing::error!(sequence = id.as_str(), "sequence holds no frame files, routing to review");
            ledgers.review.append(&LedgerEntry::new(
                run_id,
                Stage::GapCheck,
                LedgerOutcome::EmptySequence,
                root,
                Some("no frame files found"),
            ))?;
            moves::move_into(root, &layout.review)?;
            summary.empty += 1;
            return Ok(());
        }
        Candidate::Frames(seq) => seq,
    };

    if ledgers.is_terminal(&seq.id)? {
        tracing::info!(sequence = seq.id.as_str(), "already terminal in a ledger, skipping");
        summary.skipped += 1;
        return Ok(());
    }

    route_sequence(layout, ledgers, run_id, seq, summary)
}

fn route_sequence(
    layout: &PipelineLayout,
    ledgers: &LedgerSet,
    run_id: &str,
    seq: &Sequence,
    summary: &mut GapCheckSummary,
) -> Result<(), PipelineError> {
    let indices = scan_frame_indices(&seq.frames_dir)?;
    let report = match gap_report(&indices) {
        Some(report) => report,
        None => {
            // Frame files present but none carried an index.
            ledgers.review.append(&LedgerEntry::new(
                run_id,
                Stage::GapCheck,
                LedgerOutcome::EmptySequence,
                &seq.root,
                Some("no numbered frame files found"),
            ))?;
            moves::move_into(&seq.root, &layout.review)?;
            summary.empty += 1;
            return Ok(());
        }
    };

    if report.has_gaps() {
        tracing::warn!(
            sequence = seq.id.as_str(),
            first = report.first,
            last = report.last,
            missing = report.missing.len(),
            "frame gaps detected, routing to review"
        );
        ledgers.review.append(&LedgerEntry::new(
            run_id,
            Stage::GapCheck,
            LedgerOutcome::Gapped,
            &seq.root,
            Some(&format_missing(&report)),
        ))?;
        moves::move_into(&seq.root, &layout.review)?;
        summary.gapped += 1;
    } else {
        tracing::info!(
            sequence = seq.id.as_str(),
            frames = report.frame_count,
            "sequence contiguous, moving to assessment"
        );
        moves::move_into(&seq.root, &layout.to_assess)?;
        summary.clean += 1;
    }
    Ok(())
}

/// Renders the missing-index list for the ledger, truncated so a badly
/// damaged sequence cannot balloon a ledger line.
fn format_missing(report: &GapReport) -> String {
    const SHOWN: usize = 20;
    let shown: Vec<String> = report
        .missing
        .iter()
        .take(SHOWN)
        .map(|i| i.to_string())
        .collect();
    if report.missing.len() > SHOWN {
        format!(
            "{} missing of {}..={}: {} ...",
            report.missing.len(),
            report.first,
            report.last,
            shown.join(",")
        )
    } else {
        format!(
            "{} missing of {}..={}: {}",
            report.missing.len(),
            report.first,
            report.last,
            shown.join(",")
        )
    }
}
