//! Error types shared by the cohort engine and its collaborators.

use thiserror::Error;

/// Boxed error returned by externally supplied oracles and contributors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while setting up or running a cohort simulation.
///
/// Every variant is fatal: setup errors are raised before any cycle runs,
/// per-cycle errors abort the treatment arm that raised them.
#[derive(Debug, Error)]
pub enum CohortError {
    /// Backing array dimensions do not match the name list.
    #[error("Shape error: {0}")]
    Shape(String),

    /// A state, treatment or parameter name that the lookup table does not know.
    #[error("Unknown {kind}: '{name}'")]
    UnknownName { kind: &'static str, name: String },

    /// Transition matrix row that is not a probability distribution.
    #[error(
        "Invalid transition matrix for treatment '{treatment}' at cycle {cycle}: \
         row {row} ('{state}') {reason}"
    )]
    TransitionInvalid {
        treatment: String,
        cycle: usize,
        row: usize,
        state: String,
        reason: String,
    },

    /// Invalid run configuration (detected before the first cycle).
    #[error("Config error: {0}")]
    Config(String),

    /// The transition oracle itself failed.
    #[error("Transition oracle failed for treatment '{treatment}' at cycle {cycle}: {source}")]
    Oracle {
        treatment: String,
        cycle: usize,
        #[source]
        source: BoxError,
    },

    /// A contributor's calculation failed; the original error is kept as the source.
    #[error("Contributor '{name}' failed for treatment '{treatment}' at cycle {cycle}: {source}")]
    Contributor {
        name: String,
        treatment: String,
        cycle: usize,
        #[source]
        source: BoxError,
    },

    /// Occupancy no longer sums to one after a transition.
    #[error("Occupancy mass not conserved for treatment '{treatment}' after cycle {cycle}: sum = {sum}")]
    MassNotConserved {
        treatment: String,
        cycle: usize,
        sum: f64,
    },
}

impl CohortError {
    /// Creates a shape error.
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    /// Creates a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Unknown health state name.
    pub fn unknown_state(name: impl Into<String>) -> Self {
        Self::UnknownName {
            kind: "state",
            name: name.into(),
        }
    }

    /// Unknown parameter name.
    pub fn unknown_parameter(name: impl Into<String>) -> Self {
        Self::UnknownName {
            kind: "parameter",
            name: name.into(),
        }
    }

    /// Returns true for errors detected during setup, before any cycle ran.
    pub fn is_setup_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Shape(_))
    }
}

/// Result alias used across the workspace.
pub type CohortResult<T> = Result<T, CohortError>;
