//! Operator-facing error reports.
//!
//! Permanent failures and stall notes are written as JSON lines into a
//! per-sequence report file in the error-report directory. Appending keeps
//! recurrence visible: a sequence that stalls on every run accumulates one
//! line per occurrence.

use crate::ledger::{timestamp_ms, LedgerOutcome, Stage};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for report writing.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write error report {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize error report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One operator-facing error record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub sequence: String,
    pub stage: Stage,
    pub outcome: LedgerOutcome,
    pub timestamp_ms: i64,
    pub run_id: String,
    pub detail: String,
}

impl ErrorReport {
    pub fn new(
        sequence: &str,
        stage: Stage,
        outcome: LedgerOutcome,
        run_id: &str,
        detail: &str,
    ) -> Self {
        Self {
            sequence: sequence.to_string(),
            stage,
            outcome,
            timestamp_ms: timestamp_ms(),
            run_id: run_id.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Report file for a sequence: `<dir>/<sequence>_errors.json`.
pub fn report_path(dir: &Path, sequence: &str) -> PathBuf {
    dir.join(format!("{}_errors.json", sequence))
}

/// Appends one report line to the sequence's report file.
pub fn append_report(dir: &Path, report: &ErrorReport) -> Result<PathBuf, ReportError> {
    let path = report_path(dir, &report.sequence);
    let line = serde_json::to_string(report)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
    writeln!(file, "{}", line).map_err(|source| ReportError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Reads back every report line for a sequence (empty when none exist).
pub fn read_reports(dir: &Path, sequence: &str) -> Result<Vec<ErrorReport>, ReportError> {
    let path = report_path(dir, sequence);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(ReportError::Io { path, source }),
    };
    let mut reports = Vec::new();
    for line in content.lines() {
        reports.push(serde_json::from_str(line)?);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read_reports() {
        let temp = TempDir::new().unwrap();
        let report = ErrorReport::new(
            "N_000123_01of01",
            Stage::Verify,
            LedgerOutcome::OverflowFatal,
            "run-1",
            "repeated reversibility data error, container deleted",
        );

        let path = append_report(temp.path(), &report).unwrap();
        assert_eq!(path, temp.path().join("N_000123_01of01_errors.json"));

        let reports = read_reports(temp.path(), "N_000123_01of01").unwrap();
        assert_eq!(reports, vec![report]);
    }

    #[test]
    fn test_recurrence_accumulates_lines() {
        let temp = TempDir::new().unwrap();
        for run in ["run-1", "run-2", "run-3"] {
            let report = ErrorReport::new(
                "N_000999_01of01",
                Stage::Verify,
                LedgerOutcome::Stalled,
                run,
                "encoding stalled mid-process, artifacts deleted",
            );
            append_report(temp.path(), &report).unwrap();
        }

        let reports = read_reports(temp.path(), "N_000999_01of01").unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[2].run_id, "run-3");
    }

    #[test]
    fn test_missing_report_file_reads_empty() {
        let temp = TempDir::new().unwrap();
        assert!(read_reports(temp.path(), "N_000000_01of01")
            .unwrap()
            .is_empty());
    }
}
