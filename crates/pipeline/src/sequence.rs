//! Sequence discovery for intake and staging directories.
//!
//! A sequence is a directory subtree holding the numbered frame files of one
//! film scan. Discovery maps each top-level directory to the innermost
//! directory that actually contains frame files, so both flat layouts
//! (`N_123456_01of01/<frames>`) and legacy three-level layouts
//! (`N_123456_01of01/scan01/2048x1556/<frames>`) resolve without a depth
//! parameter.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Frame file extension (case-insensitive matching).
pub const FRAME_EXTENSION: &str = "dpx";

/// Encoder output strategy for a sequence.
///
/// V2 bounds the size of the reversibility data and is assigned either by the
/// assessment probe or by the first reversibility-overflow retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodeVersion {
    V1,
    V2,
}

impl Default for EncodeVersion {
    fn default() -> Self {
        Self::V1
    }
}

impl std::fmt::Display for EncodeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeVersion::V1 => write!(f, "v1"),
            EncodeVersion::V2 => write!(f, "v2"),
        }
    }
}

/// A discovered frame sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    /// Top-level sequence directory.
    pub root: PathBuf,
    /// Sequence identifier (the directory name).
    pub id: String,
    /// Innermost directory containing the frame files.
    pub frames_dir: PathBuf,
    /// Lexicographically first frame file, used for policy assessment.
    pub representative: PathBuf,
}

/// A candidate found in a staging directory.
///
/// A directory without a single frame file is an error condition that must be
/// surfaced, never silently skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    Frames(Sequence),
    Empty { id: String, root: PathBuf },
}

/// Checks if a file has the frame extension (case-insensitive).
pub fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(FRAME_EXTENSION))
        .unwrap_or(false)
}

/// Extracts the frame index from a frame filename.
///
/// The index is the first run of ASCII digits in the name; returns None when
/// the name holds no digits or the run overflows u64.
pub fn frame_index(file_name: &str) -> Option<u64> {
    let start = file_name.find(|c: char| c.is_ascii_digit())?;
    let digits: String = file_name[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Discovers candidate sequences in a staging directory.
///
/// Each immediate subdirectory is one candidate (loose files and hidden
/// directories are ignored). Entries are returned in name order and the
/// representative frame is the first frame file of a filename-sorted walk,
/// so discovery is deterministic for a given tree.
pub fn discover(dir: &Path) -> std::io::Result<Vec<Candidate>> {
    let mut roots = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        roots.push((name, entry.path()));
    }
    roots.sort();

    let mut candidates = Vec::new();
    for (id, root) in roots {
        candidates.push(match locate_frames(&root) {
            Some((frames_dir, representative)) => Candidate::Frames(Sequence {
                root,
                id,
                frames_dir,
                representative,
            }),
            None => Candidate::Empty { id, root },
        });
    }
    Ok(candidates)
}

/// Walks a sequence root and returns its frames directory and representative
/// frame, or None when the subtree holds no frame file.
fn locate_frames(root: &Path) -> Option<(PathBuf, PathBuf)> {
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok());

    for entry in walker {
        if entry.file_type().is_file() && is_frame_file(entry.path()) {
            let representative = entry.path().to_path_buf();
            let frames_dir = representative
                .parent()
                .unwrap_or(root)
                .to_path_buf();
            return Some((frames_dir, representative));
        }
    }
    None
}
