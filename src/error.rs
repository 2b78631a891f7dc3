use std::io;

use thiserror::Error;

use crate::schema::Phase;

/// Error type a probe body (or its setup) may return.
pub type BodyError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Invalid arguments, unknown probe names or an unusable probe configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("probe already registered: {0}")]
    DuplicateName(String),

    /// Nothing was recorded against the probe since the last drain.
    #[error("no samples recorded for probe: {0}")]
    NotFound(String),

    #[error("probe {probe} failed during {phase} (fork {fork}, thread {thread}): {message}")]
    ProbeExecution {
        probe: String,
        phase: Phase,
        fork: u32,
        thread: usize,
        message: String,
    },

    #[error("probe {probe} hit the run timeout during {phase} (fork {fork})")]
    Timeout { probe: String, phase: Phase, fork: u32 },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Startup errors abort the run before any probe executes.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            HarnessError::Configuration(_) | HarnessError::DuplicateName(_)
        )
    }
}
