//! Compiler configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Errors reading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("could not read {path}: {source}")]
    Io {
        /// Configuration path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid configuration JSON
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        /// Configuration path
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },
}

/// Settings for one compilation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Unknown unqualified variables are errors rather than `undef`
    pub strict_variables: bool,
    /// Upper bound on evaluation passes
    pub max_evaluation_passes: usize,
    /// Environment name bound as `$environment`
    pub environment: String,
    /// Directories holding modules
    pub module_path: Vec<PathBuf>,
    /// Directory for relative imports
    pub manifest_dir: Option<PathBuf>,
}

impl CompilerConfig {
    /// Default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            strict_variables: false,
            max_evaluation_passes: 1000,
            environment: "production".to_string(),
            module_path: Vec::new(),
            manifest_dir: None,
        }
    }

    /// Read a JSON configuration file; missing fields keep their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Set strict variable lookup
    #[must_use]
    pub fn with_strict_variables(mut self, strict: bool) -> Self {
        self.strict_variables = strict;
        self
    }

    /// Set the pass limit
    #[must_use]
    pub fn with_max_evaluation_passes(mut self, passes: usize) -> Self {
        self.max_evaluation_passes = passes;
        self
    }

    /// Set the environment name
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Add a module directory
    #[must_use]
    pub fn with_module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.module_path.push(dir.into());
        self
    }

    /// Set the manifest directory
    #[must_use]
    pub fn with_manifest_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.manifest_dir = Some(dir.into());
        self
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self::new()
    }
}
