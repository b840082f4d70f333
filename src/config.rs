use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Safety limits of one VM instance.
///
/// Missing fields in a TOML file fall back to the defaults:
///
/// ```toml
/// max_call_depth = 256
/// max_steps = 1_000_000
/// max_stack_size = 10_000
/// max_nesting_depth = 512
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Nested `CALL` activations allowed, the top-level run included.
    pub max_call_depth: usize,
    /// Instructions executed per `run`; unlimited when `None`.
    pub max_steps: Option<usize>,
    pub max_stack_size: usize,
    /// Frames a dump may descend to, the root frame included.
    pub max_nesting_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 256,
            max_steps: None,
            max_stack_size: 10_000,
            max_nesting_depth: 512,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl VmConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
