//! Error types for the simulation harness.

use cohort_env::CohortError;
use thiserror::Error;

/// Errors raised while loading, running or exporting a model.
#[derive(Debug, Error)]
pub enum SimError {
    /// The engine rejected the model or aborted a run
    #[error(transparent)]
    Engine(#[from] CohortError),

    /// The bundle is structurally invalid (unknown state, bad rule, ...)
    #[error("Bundle error: {0}")]
    Bundle(String),

    /// Bundle or export JSON could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a bundle or writing an export failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Creates a bundle error.
    pub fn bundle(msg: impl Into<String>) -> Self {
        Self::Bundle(msg.into())
    }
}

pub type SimResult<T> = Result<T, SimError>;
