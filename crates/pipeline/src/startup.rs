//! Preflight checks for the external tools.
//!
//! Verifies before a batch run that the encoder, conformance checker, and
//! frame inspector can all be launched, and that the encoder is new enough
//! to know the version-2 output flag the overflow-retry path depends on.

use crate::encode::ENCODER_BIN;
use crate::inspect::{CONFORMANCE_BIN, INSPECTOR_BIN};
use std::process::Command;
use thiserror::Error;

/// Minimum encoder major version: earlier releases lack `--output-version 2`.
pub const MIN_ENCODER_MAJOR: u32 = 21;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not available: {detail}")]
    ToolUnavailable { tool: &'static str, detail: String },

    #[error("encoder version requirement not met: {0}")]
    EncoderVersion(String),
}

/// Runs `<tool> <version_arg>` and returns its stdout.
pub fn check_tool(tool: &'static str, version_arg: &str) -> Result<String, StartupError> {
    let output = Command::new(tool)
        .arg(version_arg)
        .output()
        .map_err(|e| StartupError::ToolUnavailable {
            tool,
            detail: format!("{} {} failed; is it installed and in PATH? Error: {}", tool, version_arg, e),
        })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            tool,
            detail: format!("{} {} exited unsuccessfully", tool, version_arg),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Parse the encoder's version banner and extract the major version number.
///
/// Handles the usual banner shapes:
/// - "RAWcooked 23.12"
/// - "RAWcooked 21.09-12-gabcdef (...)"
pub fn parse_encoder_version(version_output: &str) -> Option<u32> {
    let line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("rawcooked"))?;

    let version_part = line
        .split_whitespace()
        .find(|tok| tok.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))?;

    let major_str = version_part.split(['.', '-']).next()?;
    major_str.parse().ok()
}

/// Check that the encoder is installed and supports version-2 output.
pub fn check_encoder() -> Result<(), StartupError> {
    let output = check_tool(ENCODER_BIN, "--version")?;
    let major = parse_encoder_version(&output).ok_or_else(|| {
        StartupError::EncoderVersion(format!(
            "could not parse encoder version from: {}",
            output.lines().next().unwrap_or("(empty)")
        ))
    })?;

    if major < MIN_ENCODER_MAJOR {
        return Err(StartupError::EncoderVersion(format!(
            "{}.x or newer required for --output-version 2, got: {}",
            MIN_ENCODER_MAJOR, major
        )));
    }
    Ok(())
}

/// Run all startup checks in order: encoder, conformance checker, inspector.
pub fn run_startup_checks() -> Result<(), StartupError> {
    check_encoder()?;
    check_tool(CONFORMANCE_BIN, "--version")?;
    check_tool(INSPECTOR_BIN, "--Version")?;
    Ok(())
}
