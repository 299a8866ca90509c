// ABOUTME: Error taxonomy for registry and batch processing failures
// ABOUTME: Load errors degrade to a fresh registry; parse and persist errors are surfaced

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the registry core.
///
/// None of these abort the process on their own: `Load` is logged and replaced by an
/// empty registry, `Parse` aborts a single batch, `Persist` is reported to the caller.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The durable registry was missing or could not be decoded.
    #[error("failed to load registry {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// An input artifact was missing, malformed, or had an unrecognized shape.
    #[error("failed to parse input {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// Writing the registry or an output artifact failed.
    #[error("failed to write {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another process holds the registry lock. `pid` is the recorded holder, if readable.
    #[error("registry {path} is locked by process {}", describe_holder(.pid))]
    Locked { path: PathBuf, pid: Option<u32> },
}

impl RegistryError {
    pub(crate) fn parse(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        RegistryError::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RegistryError::Persist {
            path: path.into(),
            source,
        }
    }
}

fn describe_holder(pid: &Option<u32>) -> String {
    pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string())
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
