//! Error types for simulation requests.

use thiserror::Error;

/// Errors surfaced to the caller of [`crate::simulation::simulate`].
///
/// Numerical trouble during integration (divergence, exhausted step budget)
/// is not an error: it is reported through
/// [`crate::integrator::SolverStatus`] alongside the partial trajectory.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("Invalid value for {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfiguration { field: &'static str, message: String },

    #[error("Simulation cancelled")]
    Cancelled,
}

impl SimulationError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        SimulationError::Validation {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_configuration(field: &'static str, message: impl Into<String>) -> Self {
        SimulationError::InvalidConfiguration {
            field,
            message: message.into(),
        }
    }

    /// Name of the offending request field, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            SimulationError::Validation { field, .. }
            | SimulationError::InvalidConfiguration { field, .. } => Some(field),
            SimulationError::Cancelled => None,
        }
    }

    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SimulationError::Validation { .. } => "validation_error",
            SimulationError::InvalidConfiguration { .. } => "invalid_configuration",
            SimulationError::Cancelled => "cancelled",
        }
    }
}

pub type SimResult<T> = Result<T, SimulationError>;
