//! Per-run temporary list files.
//!
//! Each batch run records its intended work in a run list before performing
//! any filesystem move, so a crash mid-run leaves an accurate record of what
//! was in flight. Lists are deleted at clean run end; lists still present at
//! startup are evidence of a crashed run and are swept (after logging their
//! contents) by the reconciliation pass.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Filename prefix/suffix marking a run list, used by the reconciliation sweep.
const RUN_LIST_PREFIX: &str = "temp_";
const RUN_LIST_SUFFIX: &str = "_list.txt";

/// A per-run temporary list file with serialized, immediately flushed appends.
#[derive(Debug)]
pub struct RunList {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RunList {
    /// Creates (or truncates) the run list `temp_<name>_list.txt` in `dir`.
    pub fn create(dir: &Path, name: &str) -> std::io::Result<Self> {
        let path = dir.join(format!("{}{}{}", RUN_LIST_PREFIX, name, RUN_LIST_SUFFIX));
        std::fs::write(&path, "")?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line, before the action it records is performed.
    pub fn append(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", line)
    }

    /// Reads back the recorded lines.
    pub fn lines(&self) -> std::io::Result<Vec<String>> {
        Ok(std::fs::read_to_string(&self.path)?
            .lines()
            .map(|l| l.to_string())
            .collect())
    }

    /// Removes the list at clean run end.
    pub fn finish(self) -> std::io::Result<()> {
        std::fs::remove_file(&self.path)
    }
}

/// Sweeps run lists left behind by a crashed run.
///
/// Their contents are logged for the operator before removal; the ledgers
/// remain the authority on what actually terminated, so sweeping is safe.
pub fn sweep_stale(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !dir.exists() {
        return Ok(removed);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(RUN_LIST_PREFIX) || !name.ends_with(RUN_LIST_SUFFIX) {
            continue;
        }
        let path = entry.path();
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                for line in content.lines() {
                    tracing::warn!(list = %name, entry = %line, "stale run list entry from interrupted run");
                }
            }
            Err(e) => tracing::warn!(list = %name, error = %e, "could not read stale run list"),
        }
        std::fs::remove_file(&path)?;
        removed.push(path);
    }
    Ok(removed)
}
