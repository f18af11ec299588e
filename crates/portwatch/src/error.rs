//! Error types for the portwatch engine.
//!
//! Only configuration loading can fail. Registration normalizes its input
//! instead of rejecting it, and probe failures are reported as
//! [`ProbeOutcome`](crate::prober::ProbeOutcome) values.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for portwatch operations.
pub type PortwatchResult<T> = Result<T, PortwatchError>;

/// Errors that can occur while loading monitor configuration.
#[derive(Debug, Error)]
pub enum PortwatchError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration: {0:?}")]
    Duration(String),
}
