//! Atomic directory moves between pipeline stages.
//!
//! A sequence's directory location is the ground truth for its stage, so
//! stage transitions are single renames wherever possible. When rename fails
//! (cross-filesystem staging areas), the move falls back to a recursive copy
//! followed by source removal, and an existing destination always refuses the
//! move rather than merging trees.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors that can occur while moving a sequence or artifact.
#[derive(Debug, Error)]
pub enum MoveError {
    /// Source path does not exist.
    #[error("move source missing: {}", .0.display())]
    SourceMissing(PathBuf),

    /// A same-named entry already occupies the destination.
    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    /// Source path has no final component to name the destination with.
    #[error("source has no file name: {}", .0.display())]
    NoFileName(PathBuf),

    /// Filesystem error during the move.
    #[error("failed to move {} to {}: {source}", .src.display(), .dest.display())]
    Io {
        src: PathBuf,
        dest: PathBuf,
        source: std::io::Error,
    },
}

/// Moves a file or directory into `dest_dir`, keeping its name.
///
/// Returns the destination path on success. Refuses to overwrite: a
/// same-named destination entry is an error the caller must surface, since it
/// means two runs raced or a previous move half-completed.
pub fn move_into(src: &Path, dest_dir: &Path) -> Result<PathBuf, MoveError> {
    if !src.exists() {
        return Err(MoveError::SourceMissing(src.to_path_buf()));
    }
    let name = src
        .file_name()
        .ok_or_else(|| MoveError::NoFileName(src.to_path_buf()))?;
    let dest = dest_dir.join(name);
    if dest.exists() {
        return Err(MoveError::DestinationExists(dest));
    }

    // Rename first; fall back to copy + remove across filesystems.
    if fs::rename(src, &dest).is_ok() {
        return Ok(dest);
    }

    let io_err = |source| MoveError::Io {
        src: src.to_path_buf(),
        dest: dest.clone(),
        source,
    };

    if src.is_dir() {
        copy_tree(src, &dest).map_err(io_err)?;
        fs::remove_dir_all(src).map_err(io_err)?;
    } else {
        fs::copy(src, &dest).map_err(io_err)?;
        fs::remove_file(src).map_err(io_err)?;
    }
    Ok(dest)
}

/// Recursively copies a directory tree.
pub fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_sequence(dir: &Path, id: &str, frames: usize) -> PathBuf {
        let root = dir.join(id);
        fs::create_dir_all(&root).unwrap();
        for i in 1..=frames {
            let mut f = File::create(root.join(format!("{:07}.dpx", i))).unwrap();
            writeln!(f, "frame {}", i).unwrap();
        }
        root
    }

    #[test]
    fn test_move_directory_into() {
        let temp = TempDir::new().unwrap();
        let src_dir = temp.path().join("gap_check");
        let dest_dir = temp.path().join("to_assess");
        fs::create_dir_all(&src_dir).unwrap();
        fs::create_dir_all(&dest_dir).unwrap();
        let seq = make_sequence(&src_dir, "N_000123_01of01", 3);

        let dest = move_into(&seq, &dest_dir).unwrap();

        assert_eq!(dest, dest_dir.join("N_000123_01of01"));
        assert!(!seq.exists());
        assert!(dest.join("0000001.dpx").exists());
        assert!(dest.join("0000003.dpx").exists());
    }

    #[test]
    fn test_move_file_into() {
        let temp = TempDir::new().unwrap();
        let dest_dir = temp.path().join("logs");
        fs::create_dir_all(&dest_dir).unwrap();
        let src = temp.path().join("N_1.mkv.txt");
        fs::write(&src, "log text").unwrap();

        let dest = move_into(&src, &dest_dir).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(dest).unwrap(), "log text");
    }

    #[test]
    fn test_move_refuses_existing_destination() {
        let temp = TempDir::new().unwrap();
        let dest_dir = temp.path().join("review");
        fs::create_dir_all(dest_dir.join("N_000123_01of01")).unwrap();
        let seq = make_sequence(temp.path(), "N_000123_01of01", 1);

        let err = move_into(&seq, &dest_dir).unwrap_err();
        assert!(matches!(err, MoveError::DestinationExists(_)));
        // Source left untouched
        assert!(seq.join("0000001.dpx").exists());
    }

    #[test]
    fn test_move_missing_source() {
        let temp = TempDir::new().unwrap();
        let err = move_into(&temp.path().join("absent"), temp.path()).unwrap_err();
        assert!(matches!(err, MoveError::SourceMissing(_)));
    }

    #[test]
    fn test_copy_tree_preserves_nesting() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let nested = src.join("scan01").join("2048x1556");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("0000001.dpx"), "frame").unwrap();

        let dest = temp.path().join("dest");
        copy_tree(&src, &dest).unwrap();

        assert_eq!(
            fs::read_to_string(dest.join("scan01/2048x1556/0000001.dpx")).unwrap(),
            "frame"
        );
    }
}
