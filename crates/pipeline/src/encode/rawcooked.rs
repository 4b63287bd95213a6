//! RAWcooked encoder module.
//!
//! Builds and executes encoder commands for real encodes and for the
//! check-only probe used during assessment. The encoder writes progress and
//! errors to stderr and its exit code is not a reliable failure signal, so
//! both output streams are captured verbatim into the container's paired log
//! file and all failure detection happens later by parsing that text.

use crate::sequence::EncodeVersion;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Encoder binary.
pub const ENCODER_BIN: &str = "rawcooked";

/// Error type for encoding operations.
///
/// Only launch and log-capture failures surface here; a completed process is
/// always classified from its captured output, never from its exit status.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Encoder process could not be launched.
    #[error("failed to launch encoder: {0}")]
    Launch(std::io::Error),

    /// Captured output could not be written to the paired log file.
    #[error("failed to write encoder log {}: {source}", .path.display())]
    LogWrite {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Parameters for one encoder invocation.
#[derive(Debug, Clone)]
pub struct EncodeParams {
    /// Sequence directory handed to the encoder.
    pub sequence_root: PathBuf,
    /// Output container path.
    pub container_path: PathBuf,
    /// Encoder output strategy.
    pub version: EncodeVersion,
    /// Whether to generate per-frame checksums on this invocation.
    pub checksum: bool,
    /// Reversibility-artifact size threshold in bytes.
    pub max_reversibility_bytes: u64,
    /// License key, when configured.
    pub license: Option<String>,
}

/// Build an encoder command with all required flags.
///
/// Gap rejection is always forced on: gap checking already ran, and a gap
/// slipping through must abort the encode rather than be papered over.
pub fn build_encode_command(params: &EncodeParams) -> Command {
    let mut cmd = Command::new(ENCODER_BIN);

    if let Some(license) = &params.license {
        cmd.arg("--license").arg(license);
    }

    cmd.arg("-y").arg("--all");
    cmd.arg("--no-accept-gaps");

    if params.version == EncodeVersion::V2 {
        cmd.arg("--output-version").arg("2");
    }

    cmd.arg("-s").arg(params.max_reversibility_bytes.to_string());

    if params.checksum {
        cmd.arg("--framemd5");
    }

    cmd.arg(&params.sequence_root);
    cmd.arg("-o").arg(&params.container_path);

    cmd
}

/// Build the check-only probe command used during assessment.
///
/// Same screening flags as a real encode, but `--check` makes the encoder
/// inspect the sequence without producing a container.
pub fn build_check_command(sequence_root: &Path, max_reversibility_bytes: u64) -> Command {
    let mut cmd = Command::new(ENCODER_BIN);
    cmd.arg("--check");
    cmd.arg("-y").arg("--all");
    cmd.arg("--no-accept-gaps");
    cmd.arg("-s").arg(max_reversibility_bytes.to_string());
    cmd.arg(sequence_root);
    cmd
}

/// Runs one encoder invocation, appending its combined output to `log_path`.
///
/// Stderr is captured ahead of stdout because the encoder reports there. The
/// exit status is deliberately ignored; classification of the run happens in
/// the verification stage over the captured text.
pub fn run_encode(params: &EncodeParams, log_path: &Path) -> Result<(), EncodeError> {
    let output = build_encode_command(params)
        .output()
        .map_err(EncodeError::Launch)?;

    let mut text = String::new();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text.push_str(&String::from_utf8_lossy(&output.stdout));

    append_log(log_path, &text)
}

/// Runs the check-only probe and returns the combined output text.
pub fn run_check(
    sequence_root: &Path,
    max_reversibility_bytes: u64,
) -> Result<String, EncodeError> {
    let output = build_check_command(sequence_root, max_reversibility_bytes)
        .output()
        .map_err(EncodeError::Launch)?;

    let mut text = String::new();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text.push_str(&String::from_utf8_lossy(&output.stdout));
    Ok(text)
}

fn append_log(log_path: &Path, text: &str) -> Result<(), EncodeError> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|source| EncodeError::LogWrite {
            path: log_path.to_path_buf(),
            source,
        })?;
    file.write_all(text.as_bytes())
        .map_err(|source| EncodeError::LogWrite {
            path: log_path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::ffi::OsStr;

    /// Helper to convert Command args to a Vec of strings for easier testing
    fn get_command_args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .filter_map(|arg| arg.to_str().map(String::from))
            .collect()
    }

    /// Helper to check if args contain a flag with a specific value
    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value)
    }

    /// Helper to check if args contain a standalone flag
    fn has_flag(args: &[String], flag: &str) -> bool {
        args.iter().any(|arg| arg == flag)
    }

    // Strategy for generating valid path-like strings
    fn path_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-zA-Z0-9_/.-]{1,50}")
            .unwrap()
            .prop_filter("non-empty path", |s| !s.is_empty())
    }

    // For any parameter combination, the built command contains every
    // required flag, the version flag appears exactly when v2 is assigned,
    // and the checksum flag exactly when requested.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_encode_command_completeness(
            sequence_root in path_strategy(),
            container in path_strategy(),
            v2 in proptest::bool::ANY,
            checksum in proptest::bool::ANY,
            max_bytes in 1u64..100_000_000,
            license in proptest::option::of("[A-F0-9]{16}"),
        ) {
            let params = EncodeParams {
                sequence_root: PathBuf::from(&sequence_root),
                container_path: PathBuf::from(&container),
                version: if v2 { EncodeVersion::V2 } else { EncodeVersion::V1 },
                checksum,
                max_reversibility_bytes: max_bytes,
                license: license.clone(),
            };

            let cmd = build_encode_command(&params);
            let args = get_command_args(&cmd);

            prop_assert_eq!(cmd.get_program(), OsStr::new(ENCODER_BIN));

            prop_assert!(has_flag(&args, "-y"), "args: {:?}", args);
            prop_assert!(has_flag(&args, "--all"), "args: {:?}", args);
            prop_assert!(
                has_flag(&args, "--no-accept-gaps"),
                "gap rejection must always be forced on, args: {:?}",
                args
            );
            prop_assert!(
                has_flag_with_value(&args, "-s", &max_bytes.to_string()),
                "args: {:?}",
                args
            );
            prop_assert!(
                has_flag_with_value(&args, "-o", &container),
                "args: {:?}",
                args
            );
            prop_assert!(
                args.iter().any(|a| a == &sequence_root),
                "input dir must be present, args: {:?}",
                args
            );

            prop_assert_eq!(
                has_flag_with_value(&args, "--output-version", "2"),
                v2,
                "version flag presence must track the assigned version, args: {:?}",
                args
            );
            prop_assert_eq!(has_flag(&args, "--framemd5"), checksum, "args: {:?}", args);

            match &license {
                Some(lic) => prop_assert!(has_flag_with_value(&args, "--license", lic)),
                None => prop_assert!(!has_flag(&args, "--license")),
            }
        }
    }

    #[test]
    fn test_check_command_has_no_output() {
        let cmd = build_check_command(Path::new("/queue/N_000123_01of01"), 5_281_680);
        let args = get_command_args(&cmd);

        assert!(has_flag(&args, "--check"));
        assert!(has_flag(&args, "--no-accept-gaps"));
        assert!(has_flag_with_value(&args, "-s", "5281680"));
        assert!(!has_flag(&args, "-o"));
        assert!(!has_flag(&args, "--framemd5"));
    }

    #[test]
    fn test_append_log_accumulates_both_invocations() {
        let temp = tempfile::TempDir::new().unwrap();
        let log = temp.path().join("N_1.mkv.txt");

        append_log(&log, "first pass output\n").unwrap();
        append_log(&log, "checksum pass output\n").unwrap();

        let content = std::fs::read_to_string(&log).unwrap();
        assert_eq!(content, "first pass output\nchecksum pass output\n");
    }
}
