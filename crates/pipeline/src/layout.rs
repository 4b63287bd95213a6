//! Pipeline directory layout.
//!
//! Directories double as both storage and stage state: a sequence occupies
//! exactly one of these directories at any instant, and moving it is the
//! stage transition. The layout is derived once from the configured root and
//! passed to every component.

use crate::runlist;
use crate::sequence::EncodeVersion;
use std::path::{Path, PathBuf};

/// Resolved stage directories under one pipeline root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineLayout {
    pub root: PathBuf,
    /// Intake for freshly delivered sequences awaiting the gap check.
    pub gap_check: PathBuf,
    /// Gap-free sequences awaiting policy assessment.
    pub to_assess: PathBuf,
    /// Manual-review quarantine for sequences.
    pub review: PathBuf,
    /// Quarantined containers from failed encodes.
    pub review_containers: PathBuf,
    /// Quarantined encoder logs from failed encodes.
    pub review_logs: PathBuf,
    /// Hand-off point for the non-lossless (tar) disposition.
    pub to_tar: PathBuf,
    /// Sequences accepted for a default (v1) encode.
    pub encode_v1: PathBuf,
    /// Sequences accepted or requeued for a version-2 encode.
    pub encode_v2: PathBuf,
    /// Encoder working/output directory for containers and their logs.
    pub container_out: PathBuf,
    /// Retained logs of settled encodes (success, retry, fail).
    pub retained_logs: PathBuf,
    /// Verified containers awaiting final fixity checks.
    pub check: PathBuf,
    /// Archived source sequences of successful encodes.
    pub completed: PathBuf,
    /// Operator-facing error reports.
    pub error_reports: PathBuf,
    /// Ledger files and per-run lists.
    pub ledgers: PathBuf,
}

impl PipelineLayout {
    pub fn new(root: &Path) -> Self {
        let review = root.join("dpx_for_review");
        let encoded = root.join("rawcooked").join("encoded");
        Self {
            root: root.to_path_buf(),
            gap_check: root.join("dpx_gap_check"),
            to_assess: root.join("dpx_to_assess"),
            review_containers: review.join("post_encode_fails").join("mkv_files"),
            review_logs: review.join("post_encode_fails").join("encoder_logs"),
            review,
            to_tar: root.join("dpx_to_tar"),
            encode_v1: root.join("rawcooked").join("dpx_to_cook"),
            encode_v2: root.join("rawcooked").join("dpx_to_cook_v2"),
            container_out: encoded.join("mkv_cooked"),
            retained_logs: encoded.join("logs"),
            check: root.join("mkv_check"),
            completed: root.join("dpx_completed"),
            error_reports: root.join("current_errors"),
            ledgers: root.join("ledgers"),
        }
    }

    /// All stage directories, in creation order.
    fn all_dirs(&self) -> [&PathBuf; 14] {
        [
            &self.gap_check,
            &self.to_assess,
            &self.review,
            &self.review_containers,
            &self.review_logs,
            &self.to_tar,
            &self.encode_v1,
            &self.encode_v2,
            &self.container_out,
            &self.retained_logs,
            &self.check,
            &self.completed,
            &self.error_reports,
            &self.ledgers,
        ]
    }

    /// Creates any missing stage directories.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in self.all_dirs() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Startup reconciliation: sweeps run lists left by a crashed run.
    ///
    /// The ledgers are the authority on terminal state, so the only cleanup
    /// needed is logging and removing the orphaned in-flight records; the
    /// sequences they name are still sitting in whichever stage directory
    /// they reached and will be picked up by the next run.
    pub fn reconcile(&self) -> std::io::Result<Vec<PathBuf>> {
        runlist::sweep_stale(&self.ledgers)
    }

    /// Locates a sequence in the encode queues by identifier.
    pub fn queue_dir_for(&self, id: &str) -> Option<(PathBuf, EncodeVersion)> {
        let v2 = self.encode_v2.join(id);
        if v2.is_dir() {
            return Some((v2, EncodeVersion::V2));
        }
        let v1 = self.encode_v1.join(id);
        if v1.is_dir() {
            return Some((v1, EncodeVersion::V1));
        }
        None
    }

    /// Container path the encoder writes for a sequence.
    pub fn container_path(&self, id: &str) -> PathBuf {
        self.container_out.join(format!("{}.mkv", id))
    }

    /// Log path paired with a sequence's container.
    pub fn log_path(&self, id: &str) -> PathBuf {
        self.container_out.join(format!("{}.mkv.txt", id))
    }
}
