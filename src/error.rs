//! Error types for nccl-autoconf
//!
//! Fatal errors only. A probe that merely degrades a field is not an error:
//! it is recorded as a [`DegradedField`](crate::system::DegradedField) in the
//! detection report and the run continues.

use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Topology probing
    Detect,
    /// Config derivation
    Derive,
    /// Artifact serialization
    Write,
    /// JSON detection report
    Report,
    /// Argument / configuration handling
    Config,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Detect => "detect",
            Stage::Derive => "derive",
            Stage::Write => "write",
            Stage::Report => "report",
            Stage::Config => "config",
        };
        f.write_str(name)
    }
}

/// Main error type for nccl-autoconf operations
#[derive(Error, Debug)]
pub enum AutoconfError {
    /// A load-bearing count (CPU or GPU) could not be determined at all
    #[error("Detection failed for {field}: {reason}")]
    DetectionFailed { field: &'static str, reason: String },

    /// The environment artifact could not be written
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A name or value cannot be represented in the artifact format
    #[error("Invalid entry '{name}': {reason}")]
    InvalidEntry { name: String, reason: String },

    /// I/O error while reading an artifact or report
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Detection report serialization error
    #[error("Report error: {0}")]
    Report(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<AutoconfError>,
    },
}

impl AutoconfError {
    /// Create a detection failure for a load-bearing field
    pub fn detection_failed(field: &'static str, reason: impl Into<String>) -> Self {
        Self::DetectionFailed {
            field,
            reason: reason.into(),
        }
    }

    /// Create a write error with path context
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid entry error
    pub fn invalid_entry(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEntry {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stage of the pipeline that produced this error
    pub fn stage(&self) -> Stage {
        match self {
            Self::DetectionFailed { .. } => Stage::Detect,
            Self::Write { .. } => Stage::Write,
            Self::InvalidEntry { .. } => Stage::Derive,
            Self::Io { .. } => Stage::Write,
            Self::ConfigError(_) => Stage::Config,
            Self::Report(_) => Stage::Report,
            Self::WithContext { source, .. } => source.stage(),
        }
    }

    /// Check if this is a fatal detection failure
    pub fn is_detection_failure(&self) -> bool {
        match self {
            Self::DetectionFailed { .. } => true,
            Self::WithContext { source, .. } => source.is_detection_failure(),
            _ => false,
        }
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Write { path, .. } | Self::Io { path, .. } => Some(path),
            Self::WithContext { source, .. } => source.path(),
            _ => None,
        }
    }
}

/// Result type alias for nccl-autoconf operations
pub type Result<T> = std::result::Result<T, AutoconfError>;

impl From<serde_json::Error> for AutoconfError {
    fn from(err: serde_json::Error) -> Self {
        AutoconfError::Report(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Mark an I/O failure as an artifact write failure
    fn with_write_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| AutoconfError::io(path, e))
    }

    fn with_write_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| AutoconfError::write(path, e))
    }
}
