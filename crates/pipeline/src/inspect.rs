//! Wrappers around the external inspection tools.
//!
//! Two collaborators are wrapped here: the frame inspector (`mediainfo`),
//! which reports resolution and pixel-descriptor metadata as text, and the
//! conformance checker (`mediaconch`), whose output begins with a pass/fail
//! marker followed by diagnostic detail. Both are invoked per file and their
//! output parsed by testable functions; neither tool's format is owned by
//! this system.

use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Frame inspector binary.
pub const INSPECTOR_BIN: &str = "mediainfo";
/// Conformance checker binary.
pub const CONFORMANCE_BIN: &str = "mediaconch";

/// Marker that opens a passing conformance report.
pub const POLICY_PASS_MARKER: &str = "pass!";

/// Error type for inspection-tool operations.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool could not be launched.
    #[error("{tool} failed to launch: {source}")]
    Launch {
        tool: &'static str,
        source: std::io::Error,
    },

    /// The tool ran but exited unsuccessfully.
    #[error("{tool} failed: {detail}")]
    Failed { tool: &'static str, detail: String },

    /// IO error while persisting tool output.
    #[error("failed to write tool output: {0}")]
    Output(std::io::Error),
}

/// Result of checking a file against a conformance policy.
///
/// The raw report is retained verbatim for the audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVerdict {
    pub pass: bool,
    pub raw: String,
}

/// Parses a conformance report into a verdict.
pub fn parse_policy_output(output: &str) -> PolicyVerdict {
    PolicyVerdict {
        pass: output.trim_start().starts_with(POLICY_PASS_MARKER),
        raw: output.to_string(),
    }
}

/// Checks a file against a conformance policy.
///
/// Runs `mediaconch --force -p <policy> <file>` and parses the report.
pub fn check_policy(policy: &Path, file: &Path) -> Result<PolicyVerdict, ToolError> {
    let output = Command::new(CONFORMANCE_BIN)
        .arg("--force")
        .arg("-p")
        .arg(policy)
        .arg(file)
        .output()
        .map_err(|source| ToolError::Launch {
            tool: CONFORMANCE_BIN,
            source,
        })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            tool: CONFORMANCE_BIN,
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(parse_policy_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Scan class of a representative frame, derived from inspector metadata.
/// Informational only: all three classes take the same encode path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// 4K-width scan.
    FourK,
    /// Greyscale (Luma-only) scan.
    Luma,
    /// Standard RGB scan.
    Rgb,
}

impl std::fmt::Display for FrameClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameClass::FourK => write!(f, "4K"),
            FrameClass::Luma => write!(f, "Luma (Y)"),
            FrameClass::Rgb => write!(f, "RGB"),
        }
    }
}

/// Metadata fields parsed from a frame inspector report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDetails {
    /// Horizontal resolution ("Pixels per line" field).
    pub pixels_per_line: Option<u32>,
    /// Pixel descriptor field, e.g. "RGB" or "Luma (Y)".
    pub descriptor: Option<String>,
}

impl FrameDetails {
    /// Classifies the scan: 4K wins over Luma, everything else is RGB.
    pub fn class(&self) -> FrameClass {
        if self.pixels_per_line.map(|px| px > 3999).unwrap_or(false) {
            FrameClass::FourK
        } else if self
            .descriptor
            .as_deref()
            .map(|d| d.contains("Luma (Y)"))
            .unwrap_or(false)
        {
            FrameClass::Luma
        } else {
            FrameClass::Rgb
        }
    }
}

/// Parses the fields of interest out of a detailed inspector report.
///
/// Field lines look like `Pixels per line: 2048`; matching is
/// case-insensitive on the field name and takes the last whitespace token as
/// the value.
pub fn parse_frame_details(output: &str) -> FrameDetails {
    let mut pixels_per_line = None;
    let mut descriptor = None;

    for line in output.lines() {
        let lower = line.to_lowercase();
        if pixels_per_line.is_none() && lower.contains("pixels per line") {
            pixels_per_line = line
                .split_whitespace()
                .last()
                .and_then(|tok| tok.parse().ok());
        } else if descriptor.is_none() && lower.contains("descriptor") {
            descriptor = line
                .split_once(':')
                .map(|(_, value)| value.trim().to_string());
        }
    }

    FrameDetails {
        pixels_per_line,
        descriptor,
    }
}

/// Inspects a frame file.
///
/// Runs `mediainfo --Details=1 <file>` and parses the report.
pub fn inspect_frame(file: &Path) -> Result<FrameDetails, ToolError> {
    let output = run_inspector(&["--Details=1"], file)?;
    Ok(parse_frame_details(&output))
}

/// Writes the inspector's full metadata report for a frame to a sidecar file.
pub fn write_metadata_sidecar(file: &Path, sidecar: &Path) -> Result<(), ToolError> {
    let output = run_inspector(&["-f"], file)?;
    std::fs::write(sidecar, output).map_err(ToolError::Output)
}

fn run_inspector(flags: &[&str], file: &Path) -> Result<String, ToolError> {
    let output = Command::new(INSPECTOR_BIN)
        .args(flags)
        .arg(file)
        .output()
        .map_err(|source| ToolError::Launch {
            tool: INSPECTOR_BIN,
            source,
        })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            tool: INSPECTOR_BIN,
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy_output_pass() {
        let verdict = parse_policy_output("pass! /media/seq/0000001.dpx\n");
        assert!(verdict.pass);
        assert!(verdict.raw.contains("0000001.dpx"));
    }

    #[test]
    fn test_parse_policy_output_fail_keeps_diagnostic() {
        let report = "fail! /media/seq/0000001.dpx\n -- colour primaries mismatch\n";
        let verdict = parse_policy_output(report);
        assert!(!verdict.pass);
        assert_eq!(verdict.raw, report);
    }

    #[test]
    fn test_parse_policy_output_marker_must_lead() {
        // A report merely mentioning the marker later is not a pass
        let verdict = parse_policy_output("error before pass! marker");
        assert!(!verdict.pass);
    }

    #[test]
    fn test_parse_frame_details_basic() {
        let report = "\
Image\n\
Format                                   : DPX\n\
Pixels per line                          : 2048\n\
Descriptor                               : RGB\n";
        let details = parse_frame_details(report);
        assert_eq!(details.pixels_per_line, Some(2048));
        assert_eq!(details.descriptor.as_deref(), Some("RGB"));
        assert_eq!(details.class(), FrameClass::Rgb);
    }

    #[test]
    fn test_parse_frame_details_luma() {
        let report = "\
Pixels per line                          : 2048\n\
Descriptor                               : Luma (Y)\n";
        let details = parse_frame_details(report);
        assert_eq!(details.class(), FrameClass::Luma);
    }

    #[test]
    fn test_parse_frame_details_4k_wins_over_descriptor() {
        let report = "\
Pixels per line                          : 4096\n\
Descriptor                               : Luma (Y)\n";
        let details = parse_frame_details(report);
        assert_eq!(details.pixels_per_line, Some(4096));
        assert_eq!(details.class(), FrameClass::FourK);
    }

    #[test]
    fn test_parse_frame_details_missing_fields() {
        let details = parse_frame_details("Format : DPX\n");
        assert_eq!(details.pixels_per_line, None);
        assert_eq!(details.descriptor, None);
        // Unknown metadata falls back to the standard path
        assert_eq!(details.class(), FrameClass::Rgb);
    }

    #[test]
    fn test_frame_class_display() {
        assert_eq!(format!("{}", FrameClass::FourK), "4K");
        assert_eq!(format!("{}", FrameClass::Luma), "Luma (Y)");
        assert_eq!(format!("{}", FrameClass::Rgb), "RGB");
    }
}
