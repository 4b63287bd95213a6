//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Filesystem locations the pipeline operates on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Root directory under which all pipeline stage directories live
    pub root: PathBuf,
    /// Conformance policy applied to a representative frame during assessment
    pub frame_policy: PathBuf,
    /// Conformance policy applied to produced containers during verification
    /// (None = verifier trusts log classification alone)
    #[serde(default)]
    pub container_policy: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            frame_policy: PathBuf::from("policy/frame_policy.xml"),
            container_policy: None,
        }
    }
}

/// Encoder-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// Encoder license key passed on the command line (None = unlicensed run)
    #[serde(default)]
    pub license: Option<String>,
    /// Reversibility-artifact size threshold in bytes passed to the encoder
    #[serde(default = "default_max_reversibility_bytes")]
    pub max_reversibility_bytes: u64,
    /// Maximum sequences dispatched per encode invocation
    #[serde(default = "default_batch_cap")]
    pub batch_cap: usize,
    /// Concurrent encoder subprocesses (0 = derive from core count)
    #[serde(default)]
    pub workers: u32,
}

fn default_max_reversibility_bytes() -> u64 {
    5_281_680
}

fn default_batch_cap() -> usize {
    20
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            license: None,
            max_reversibility_bytes: default_max_reversibility_bytes(),
            batch_cap: default_batch_cap(),
            workers: 0,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - DPX_PIPELINE_ROOT -> paths.root
    /// - DPX_PIPELINE_FRAME_POLICY -> paths.frame_policy
    /// - DPX_PIPELINE_CONTAINER_POLICY -> paths.container_policy
    /// - DPX_PIPELINE_BATCH_CAP -> encoder.batch_cap
    /// - DPX_PIPELINE_WORKERS -> encoder.workers
    /// - DPX_PIPELINE_LICENSE -> encoder.license
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("DPX_PIPELINE_ROOT") {
            if !val.is_empty() {
                self.paths.root = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("DPX_PIPELINE_FRAME_POLICY") {
            if !val.is_empty() {
                self.paths.frame_policy = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("DPX_PIPELINE_CONTAINER_POLICY") {
            if !val.is_empty() {
                self.paths.container_policy = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("DPX_PIPELINE_BATCH_CAP") {
            if let Ok(cap) = val.parse::<usize>() {
                self.encoder.batch_cap = cap;
            }
        }

        if let Ok(val) = env::var("DPX_PIPELINE_WORKERS") {
            if let Ok(workers) = val.parse::<u32>() {
                self.encoder.workers = workers;
            }
        }

        if let Ok(val) = env::var("DPX_PIPELINE_LICENSE") {
            if !val.is_empty() {
                self.encoder.license = Some(val);
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Resolve a policy path against the pipeline root unless it is absolute
    pub fn resolve_policy(&self, policy: &Path) -> PathBuf {
        if policy.is_absolute() {
            policy.to_path_buf()
        } else {
            self.paths.root.join(policy)
        }
    }
}
