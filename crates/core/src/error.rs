//! Error taxonomy for conductivity computations
//!
//! Every fallible operation in the crate returns [`ConductivityResult`]. The three
//! variants map onto three caller decisions:
//!
//! - `Configuration`: fix the inputs (map ranges, boundary choice, smoothing scales)
//! - `Convergence`: relax the tolerance, raise the iteration limit or switch backend
//! - `NumericalDegeneracy`: the assembled system is singular as posed
//!
//! The core never retries or substitutes a different method on its own.

use crate::config::SolverType;
use thiserror::Error;

/// Errors surfaced by the conductivity core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConductivityError {
    /// Invalid or inconsistent inputs
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Iterative backend ran out of iterations before reaching the tolerance
    #[error(
        "{solver} did not converge after {iterations} iterations (relative residual {residual:.3e})"
    )]
    Convergence {
        /// Backend that failed
        solver: SolverType,
        /// Iterations performed
        iterations: usize,
        /// Last relative residual norm
        residual: f64,
    },

    /// Singular or ill-posed linear system
    #[error("Numerical degeneracy: {0}")]
    NumericalDegeneracy(String),
}

impl ConductivityError {
    /// Shorthand for a configuration error
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Shorthand for a degeneracy error
    pub(crate) fn degenerate(message: impl Into<String>) -> Self {
        Self::NumericalDegeneracy(message.into())
    }
}

/// Result alias used across the crate
pub type ConductivityResult<T> = Result<T, ConductivityError>;
