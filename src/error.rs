//! Error kinds raised by the enhancement step.
//!
//! Every phase returns `Result<_, EnhanceError>`; the CLI layer wraps these in
//! `anyhow` for reporting.
use std::path::PathBuf;
use thiserror::Error;

/// Cap on stderr carried inside an invocation error.
pub(crate) const MAX_ERROR_STDERR_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum EnhanceError {
    /// Environment or path discovery failed.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// The external process could not be started or exited unsuccessfully.
    #[error("command `{command}` failed ({status}): {stderr}")]
    Invocation {
        command: String,
        status: String,
        stderr: String,
    },

    /// The tool reported success but the expected file is absent.
    #[error("expected output {} was not produced", .0.display())]
    OutputMissing(PathBuf),

    /// The run's object store could not be updated.
    #[error("object store update failed: {0}")]
    Store(String),

    /// A phase was attempted out of order or after a terminal state.
    #[error("invalid step state: {0}")]
    State(String),
}

impl EnhanceError {
    pub(crate) fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution(message.into())
    }

    pub(crate) fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Short machine-readable kind used in logs and JSON reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolution(_) => "resolution",
            Self::Invocation { .. } => "invocation",
            Self::OutputMissing(_) => "output_missing",
            Self::Store(_) => "store",
            Self::State(_) => "state",
        }
    }
}
