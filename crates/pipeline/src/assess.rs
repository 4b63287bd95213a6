//! Policy assessment stage.
//!
//! For each gap-free sequence: check the representative frame against the
//! conformance policy, then screen the sequence with a check-only encoder
//! probe for the two known encode-blocking signatures. A conformance pass is
//! necessary but not sufficient — the probe decides between the default and
//! version-2 encode paths, or diverts the sequence to review entirely.
//!
//! Every decision of a run is recorded in per-run lists before any
//! filesystem move happens, so a crash mid-run leaves the staging tree
//! undisturbed and the run safely re-triable.

use crate::encode;
use crate::inspect;
use crate::ledger::{LedgerEntry, LedgerOutcome, LedgerSet, Stage};
use crate::layout::PipelineLayout;
use crate::moves;
use crate::runlist::RunList;
use crate::sequence::{self, Candidate, EncodeVersion, Sequence};
use crate::PipelineError;
use dpx_pipeline_config::PipelineConfig;

/// Probe signature for naming inconsistencies the gap check cannot see.
pub const PROBE_INCOHERENT_MARKER: &str = "incoherent file names";
/// Probe signature predicting an oversized reversibility artifact.
pub const PROBE_OVERFLOW_MARKER: &str = "reversibility file is becoming big";

/// What the check-only encoder probe found in a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFinding {
    /// No blocking signature; encode at the default version.
    Clean,
    /// Inconsistent frame naming; the sequence needs human eyes.
    IncoherentNaming,
    /// Default encode would produce an oversized reversibility artifact;
    /// encode at version 2 instead.
    OversizedReversibility,
}

/// Screens the probe's diagnostic stream for the blocking signatures.
///
/// Naming incoherence wins over the overflow signature: an incoherent
/// sequence is unsafe to encode at any version.
pub fn screen_probe_output(output: &str) -> ProbeFinding {
    if output.contains(PROBE_INCOHERENT_MARKER) {
        ProbeFinding::IncoherentNaming
    } else if output.contains(PROBE_OVERFLOW_MARKER) {
        ProbeFinding::OversizedReversibility
    } else {
        ProbeFinding::Clean
    }
}

/// Where assessment decided to send a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Disposition {
    /// Queue for encoding at the given version.
    Encode(EncodeVersion),
    /// Conformance failure: hand off to the non-lossless path, with the full
    /// report for the audit record.
    Tar(String),
    /// Probe found incoherent naming: quarantine for review.
    Review,
}

#[derive(Debug)]
struct Decision {
    seq: Sequence,
    disposition: Disposition,
}

/// Outcome counts of one assessment run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AssessSummary {
    /// Sequences queued for a default encode.
    pub queued_v1: usize,
    /// Sequences queued directly for a version-2 encode.
    pub queued_v2: usize,
    /// Conformance failures sent to the tar disposition.
    pub policy_failed: usize,
    /// Probe-detected incoherent naming sent to review.
    pub incoherent: usize,
    /// Candidates already terminal in a ledger.
    pub skipped: usize,
    /// Candidates that errored and were left in place.
    pub errors: usize,
}

/// Runs the assessment stage over the post-gap-check staging directory.
pub fn run(
    cfg: &PipelineConfig,
    layout: &PipelineLayout,
    ledgers: &LedgerSet,
    run_id: &str,
) -> Result<AssessSummary, PipelineError> {
    let candidates = sequence::discover(&layout.to_assess)?;
    if candidates.is_empty() {
        return Err(PipelineError::NoInput("assessment"));
    }

    let encode_list = RunList::create(&layout.ledgers, "assess_encode")?;
    let tar_list = RunList::create(&layout.ledgers, "assess_tar")?;
    let review_list = RunList::create(&layout.ledgers, "assess_review")?;

    let mut summary = AssessSummary::default();
    let mut decisions = Vec::new();

    // Decide everything before moving anything.
    for candidate in candidates {
        let seq = match candidate {
            Candidate::Empty { id, root } => {
                // Should have been caught upstream; still never skip silently.
                tracing::error!(sequence = id.as_str(), "frameless directory in assessment staging");
                ledgers.review.append(&LedgerEntry::new(
                    run_id,
                    Stage::Assess,
                    LedgerOutcome::EmptySequence,
                    &root,
                    Some("no frame files found"),
                ))?;
                moves::move_into(&root, &layout.review)?;
                summary.errors += 1;
                continue;
            }
            Candidate::Frames(seq) => seq,
        };

        if ledgers.is_terminal(&seq.id)? {
            tracing::info!(sequence = seq.id.as_str(), "already terminal in a ledger, skipping");
            summary.skipped += 1;
            continue;
        }

        match assess_sequence(cfg, &seq) {
            Ok(disposition) => {
                match &disposition {
                    Disposition::Encode(version) => {
                        encode_list.append(&format!("{}\t{}", seq.root.display(), version))?
                    }
                    Disposition::Tar(_) => tar_list.append(&seq.root.display().to_string())?,
                    Disposition::Review => {
                        review_list.append(&seq.root.display().to_string())?
                    }
                }
                decisions.push(Decision { seq, disposition });
            }
            Err(e) => {
                tracing::warn!(sequence = seq.id.as_str(), error = %e, "assessment failed for sequence, leaving in place");
                summary.errors += 1;
            }
        }
    }

    // Ledger, then move.
    for decision in decisions {
        if let Err(e) = apply_decision(layout, ledgers, run_id, &decision, &mut summary) {
            tracing::warn!(
                sequence = decision.seq.id.as_str(),
                error = %e,
                "could not apply assessment decision"
            );
            summary.errors += 1;
        }
    }

    encode_list.finish()?;
    tar_list.finish()?;
    review_list.finish()?;

    tracing::info!(
        queued_v1 = summary.queued_v1,
        queued_v2 = summary.queued_v2,
        policy_failed = summary.policy_failed,
        incoherent = summary.incoherent,
        skipped = summary.skipped,
        errors = summary.errors,
        "assessment run complete"
    );
    Ok(summary)
}

/// Assesses one sequence: conformance check, metadata sidecar, encoder probe.
fn assess_sequence(cfg: &PipelineConfig, seq: &Sequence) -> Result<Disposition, PipelineError> {
    let policy = cfg.resolve_policy(&cfg.paths.frame_policy);
    let verdict = inspect::check_policy(&policy, &seq.representative)?;

    if !verdict.pass {
        tracing::warn!(
            sequence = seq.id.as_str(),
            "representative frame does not conform to policy, routing to tar path"
        );
        return Ok(Disposition::Tar(verdict.raw));
    }

    // Retain the inspector's metadata for the audit record; the sidecar
    // travels with the sequence through subsequent moves.
    let sidecar = seq.root.join(format!("{}_metadata.txt", seq.id));
    inspect::write_metadata_sidecar(&seq.representative, &sidecar)?;
    let details = inspect::inspect_frame(&seq.representative)?;
    tracing::info!(
        sequence = seq.id.as_str(),
        class = %details.class(),
        "representative frame passed the conformance policy"
    );

    let probe_output = encode::run_check(&seq.root, cfg.encoder.max_reversibility_bytes)?;
    match screen_probe_output(&probe_output) {
        ProbeFinding::Clean => Ok(Disposition::Encode(EncodeVersion::V1)),
        ProbeFinding::OversizedReversibility => {
            tracing::warn!(
                sequence = seq.id.as_str(),
                "probe predicts oversized reversibility data, assigning version 2"
            );
            Ok(Disposition::Encode(EncodeVersion::V2))
        }
        ProbeFinding::IncoherentNaming => Ok(Disposition::Review),
    }
}

fn apply_decision(
    layout: &PipelineLayout,
    ledgers: &LedgerSet,
    run_id: &str,
    decision: &Decision,
    summary: &mut AssessSummary,
) -> Result<(), PipelineError> {
    let seq = &decision.seq;
    match &decision.disposition {
        Disposition::Encode(EncodeVersion::V1) => {
            moves::move_into(&seq.root, &layout.encode_v1)?;
            summary.queued_v1 += 1;
        }
        Disposition::Encode(EncodeVersion::V2) => {
            moves::move_into(&seq.root, &layout.encode_v2)?;
            summary.queued_v2 += 1;
        }
        Disposition::Tar(raw) => {
            ledgers.policy_failures.append(&LedgerEntry::new(
                run_id,
                Stage::Assess,
                LedgerOutcome::PolicyFail,
                &seq.root,
                Some(raw),
            ))?;
            moves::move_into(&seq.root, &layout.to_tar)?;
            summary.policy_failed += 1;
        }
        Disposition::Review => {
            ledgers.review.append(&LedgerEntry::new(
                run_id,
                Stage::Assess,
                LedgerOutcome::IncoherentNaming,
                &seq.root,
                Some("encoder probe reported incoherent file names"),
            ))?;
            moves::move_into(&seq.root, &layout.review)?;
            summary.incoherent += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_screen_probe_output_clean() {
        let output = "Track 0: 500 files\nReversibility data: OK\n";
        assert_eq!(screen_probe_output(output), ProbeFinding::Clean);
    }

    #[test]
    fn test_screen_probe_output_overflow() {
        let output = "Warning: the reversibility file is becoming big.\n";
        assert_eq!(
            screen_probe_output(output),
            ProbeFinding::OversizedReversibility
        );
    }

    #[test]
    fn test_screen_probe_output_incoherent_wins() {
        let output = "\
Warning: incoherent file names\n\
Warning: the reversibility file is becoming big.\n";
        assert_eq!(screen_probe_output(output), ProbeFinding::IncoherentNaming);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Screening is deterministic and marker-free text is always clean.
        #[test]
        fn prop_screening_deterministic(text in "[ -~\\n]{0,200}") {
            let first = screen_probe_output(&text);
            let second = screen_probe_output(&text);
            prop_assert_eq!(first, second);

            if !text.contains(PROBE_INCOHERENT_MARKER)
                && !text.contains(PROBE_OVERFLOW_MARKER)
            {
                prop_assert_eq!(first, ProbeFinding::Clean);
            }
        }
    }

    struct Fixture {
        _temp: TempDir,
        cfg: PipelineConfig,
        layout: PipelineLayout,
        ledgers: LedgerSet,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let cfg = PipelineConfig {
            paths: dpx_pipeline_config::PathsConfig {
                root: temp.path().to_path_buf(),
                ..Default::default()
            },
            encoder: Default::default(),
        };
        let layout = PipelineLayout::new(temp.path());
        layout.ensure().unwrap();
        let ledgers = LedgerSet::open(&layout.ledgers);
        Fixture {
            _temp: temp,
            cfg,
            layout,
            ledgers,
        }
    }

    fn seed_sequence(dir: &std::path::Path, id: &str) {
        let root = dir.join(id);
        fs::create_dir_all(&root).unwrap();
        File::create(root.join("0000001.dpx")).unwrap();
    }

    #[test]
    fn test_run_no_input_is_fatal() {
        let f = fixture();
        let err = run(&f.cfg, &f.layout, &f.ledgers, "run-1").unwrap_err();
        assert!(err.is_no_input());
    }

    // A sequence already terminal in a ledger is never reassessed and no
    // external tool is invoked for it.
    #[test]
    fn test_run_skips_terminal_sequences() {
        let f = fixture();
        seed_sequence(&f.layout.to_assess, "N_000123_01of01");
        f.ledgers
            .success
            .append(&LedgerEntry::new(
                "run-0",
                Stage::Verify,
                LedgerOutcome::Archived,
                &f.layout.completed.join("N_000123_01of01"),
                None,
            ))
            .unwrap();

        let summary = run(&f.cfg, &f.layout, &f.ledgers, "run-1").unwrap();
        assert_eq!(summary.skipped, 1);
        // Not moved anywhere
        assert!(f.layout.to_assess.join("N_000123_01of01").is_dir());
    }

    // Tool failures isolate to the sequence: it stays in staging and the run
    // lists are still cleaned up at run end.
    #[test]
    fn test_run_tool_failure_leaves_sequence_in_place() {
        let mut f = fixture();
        // Point the conformance checker at a policy under a root where the
        // tool itself cannot be what fails the test; the subprocess launch
        // will fail in minimal environments and a real checker will fail on
        // the missing policy. Either way the sequence must survive in place.
        f.cfg.paths.frame_policy = std::path::PathBuf::from("missing/policy.xml");
        seed_sequence(&f.layout.to_assess, "N_000777_01of01");

        let summary = run(&f.cfg, &f.layout, &f.ledgers, "run-1").unwrap();
        assert_eq!(summary.errors + summary.policy_failed, 1);
        // No stale run lists left behind
        let stale: Vec<_> = fs::read_dir(&f.layout.ledgers)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("temp_"))
            .collect();
        assert!(stale.is_empty());
    }

    #[test]
    fn test_frameless_directory_is_quarantined() {
        let f = fixture();
        let root = f.layout.to_assess.join("N_000888_01of01");
        fs::create_dir_all(&root).unwrap();
        File::create(root.join("notes.txt")).unwrap();

        let summary = run(&f.cfg, &f.layout, &f.ledgers, "run-1").unwrap();
        assert_eq!(summary.errors, 1);
        assert!(f.layout.review.join("N_000888_01of01").is_dir());
        assert_eq!(
            f.ledgers.review.entries().unwrap()[0].outcome,
            LedgerOutcome::EmptySequence
        );
    }
}
