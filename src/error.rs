//! Error taxonomy for the densification pipeline.
//!
//! Per-patch numeric failures (NaN fitness/priority/correlation) are not
//! errors: they reduce to runtime-filter failure and patch deletion. Only
//! structural problems surface through [`MvsError`].

use std::path::PathBuf;

/// Errors produced by configuration, I/O and structural checks.
#[derive(Debug, thiserror::Error)]
pub enum MvsError {
    /// Missing or inconsistent tunables.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Load or write failure; surfaced to the caller, never retried.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed input file (NVM, snapshot, runtime config).
    #[error("malformed {}: {message}", path.display())]
    Format { path: PathBuf, message: String },

    /// Internal consistency violation (e.g. a cell referencing an unknown
    /// patch id). Fatal in debug builds, best-effort cleanup in release.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl MvsError {
    pub(crate) fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MvsError>;
