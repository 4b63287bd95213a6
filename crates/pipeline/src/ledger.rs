//! Append-only state ledgers.
//!
//! Every terminal decision the pipeline makes is appended to a per-outcome
//! ledger file before the corresponding filesystem move or delete happens.
//! Entries are one tab-separated line each and are never edited in place;
//! corrections append superseding entries. Membership checks are linear scans
//! over the relevant file, which keeps the format trivially inspectable and
//! crash-recoverable.
//!
//! Appends are serialized through an interior mutex so concurrent encode
//! workers cannot interleave partial lines.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Error type for ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Pipeline stage that produced a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    GapCheck,
    Assess,
    Encode,
    Verify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::GapCheck => "gap_check",
            Stage::Assess => "assess",
            Stage::Encode => "encode",
            Stage::Verify => "verify",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gap_check" => Some(Stage::GapCheck),
            "assess" => Some(Stage::Assess),
            "encode" => Some(Stage::Encode),
            "verify" => Some(Stage::Verify),
            _ => None,
        }
    }
}

/// Recorded disposition of a sequence at a stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerOutcome {
    /// Container verified and archived.
    Archived,
    /// Representative frame failed the conformance policy.
    PolicyFail,
    /// Frame-number set has holes.
    Gapped,
    /// Sequence directory holds no frame files at all.
    EmptySequence,
    /// Encoder reported inconsistent frame naming.
    IncoherentNaming,
    /// First reversibility overflow, requeued for a version-2 encode.
    OverflowRetry,
    /// Repeat reversibility overflow, container deleted.
    OverflowFatal,
    /// Produced container failed the container conformance policy.
    ContainerPolicyFail,
    /// Unrecognized encoder error, quarantined for manual review.
    GenericError,
    /// Encode interrupted mid-process, artifacts discarded.
    Stalled,
}

impl LedgerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerOutcome::Archived => "archived",
            LedgerOutcome::PolicyFail => "policy_fail",
            LedgerOutcome::Gapped => "gapped",
            LedgerOutcome::EmptySequence => "empty_sequence",
            LedgerOutcome::IncoherentNaming => "incoherent_naming",
            LedgerOutcome::OverflowRetry => "overflow_retry",
            LedgerOutcome::OverflowFatal => "overflow_fatal",
            LedgerOutcome::ContainerPolicyFail => "container_policy_fail",
            LedgerOutcome::GenericError => "generic_error",
            LedgerOutcome::Stalled => "stalled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "archived" => Some(LedgerOutcome::Archived),
            "policy_fail" => Some(LedgerOutcome::PolicyFail),
            "gapped" => Some(LedgerOutcome::Gapped),
            "empty_sequence" => Some(LedgerOutcome::EmptySequence),
            "incoherent_naming" => Some(LedgerOutcome::IncoherentNaming),
            "overflow_retry" => Some(LedgerOutcome::OverflowRetry),
            "overflow_fatal" => Some(LedgerOutcome::OverflowFatal),
            "container_policy_fail" => Some(LedgerOutcome::ContainerPolicyFail),
            "generic_error" => Some(LedgerOutcome::GenericError),
            "stalled" => Some(LedgerOutcome::Stalled),
            _ => None,
        }
    }
}

/// One ledger line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub timestamp_ms: i64,
    pub run_id: String,
    pub stage: Stage,
    pub outcome: LedgerOutcome,
    pub path: PathBuf,
    pub diagnostic: Option<String>,
}

impl LedgerEntry {
    pub fn new(
        run_id: &str,
        stage: Stage,
        outcome: LedgerOutcome,
        path: &Path,
        diagnostic: Option<&str>,
    ) -> Self {
        Self {
            timestamp_ms: timestamp_ms(),
            run_id: run_id.to_string(),
            stage,
            outcome,
            path: path.to_path_buf(),
            diagnostic: diagnostic.map(|d| d.to_string()),
        }
    }

    /// Sequence identifier of the entry (final path component).
    pub fn sequence_id(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Serializes the entry to its single-line form.
    ///
    /// Tabs and newlines inside the diagnostic are flattened to spaces so the
    /// line-per-entry invariant holds for arbitrary tool output.
    pub fn to_line(&self) -> String {
        let diagnostic = self
            .diagnostic
            .as_deref()
            .unwrap_or("")
            .replace(['\t', '\n', '\r'], " ");
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.timestamp_ms,
            self.run_id,
            self.stage.as_str(),
            self.outcome.as_str(),
            self.path.display(),
            diagnostic
        )
    }

    /// Parses a single ledger line; returns None for malformed lines.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut fields = line.splitn(6, '\t');
        let timestamp_ms = fields.next()?.parse().ok()?;
        let run_id = fields.next()?.to_string();
        let stage = Stage::parse(fields.next()?)?;
        let outcome = LedgerOutcome::parse(fields.next()?)?;
        let path = PathBuf::from(fields.next()?);
        let diagnostic = match fields.next() {
            None | Some("") => None,
            Some(d) => Some(d.to_string()),
        };
        Some(Self {
            timestamp_ms,
            run_id,
            stage,
            outcome,
            path,
            diagnostic,
        })
    }
}

/// One append-only ledger file with serialized writes.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Ledger {
    /// Opens a ledger at the given path. The file is created lazily on the
    /// first append, so opening never touches the filesystem.
    pub fn open<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry, holding the write lock across the whole line so
    /// appends from concurrent workers never interleave.
    pub fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| LedgerError::Io {
                path: self.path.clone(),
                source,
            })?;
        let line = format!("{}\n", entry.to_line());
        file.write_all(line.as_bytes())
            .map_err(|source| LedgerError::Io {
                path: self.path.clone(),
                source,
            })
    }

    /// Reads every parseable entry. A missing file is an empty ledger.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LedgerError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(content.lines().filter_map(LedgerEntry::parse_line).collect())
    }

    /// Linear-scan membership check by sequence identifier.
    pub fn contains_sequence(&self, id: &str) -> Result<bool, LedgerError> {
        Ok(self
            .entries()?
            .iter()
            .any(|entry| entry.sequence_id() == Some(id)))
    }
}

/// The full set of pipeline ledgers rooted in one directory.
#[derive(Debug)]
pub struct LedgerSet {
    /// Successful encodes moved to the archive.
    pub success: Ledger,
    /// Conformance failures routed to the tar disposition.
    pub policy_failures: Ledger,
    /// Sequences quarantined for manual review.
    pub review: Ledger,
    /// Sequences requeued once for a version-2 encode (not terminal).
    pub v2_retry: Ledger,
    /// Containers deleted after a repeat reversibility overflow.
    pub deletion: Ledger,
}

impl LedgerSet {
    pub fn open(dir: &Path) -> Self {
        Self {
            success: Ledger::open(dir.join("success.log")),
            policy_failures: Ledger::open(dir.join("policy_failures.log")),
            review: Ledger::open(dir.join("review.log")),
            v2_retry: Ledger::open(dir.join("v2_retry.log")),
            deletion: Ledger::open(dir.join("deletion.log")),
        }
    }

    /// True when the sequence already terminated in any terminal ledger.
    /// The v2-retry ledger is deliberately excluded: a retried sequence is
    /// still in flight.
    pub fn is_terminal(&self, id: &str) -> Result<bool, LedgerError> {
        Ok(self.success.contains_sequence(id)?
            || self.policy_failures.contains_sequence(id)?
            || self.review.contains_sequence(id)?
            || self.deletion.contains_sequence(id)?)
    }

    /// True when the sequence has already consumed its one overflow retry.
    pub fn has_retried(&self, id: &str) -> Result<bool, LedgerError> {
        self.v2_retry.contains_sequence(id)
    }
}

/// Current timestamp in milliseconds since the Unix epoch.
pub fn timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Fresh identifier for one batch run, stamped into every entry and run list
/// the run produces.
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}
