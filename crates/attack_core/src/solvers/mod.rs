//! Adaptive stepper strategies and the table that selects them.
//!
//! - **Explicit pairs**: `Rk45` (Dormand-Prince 5(4)), `Rk23` (Bogacki-Shampine 3(2)),
//!   `Dop853` (Dormand-Prince 8(5,3)).
//! - **Implicit**: `Radau` (Radau IIA, order 5), `Bdf` (variable-step BDF1/BDF2).
//! - **Switching**: `Lsoda` runs Dormand-Prince until the problem looks stiff, then BDF.

mod bdf;
mod explicit;
mod lsoda;
mod radau;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Tolerances;
use crate::traits::AdaptiveStepper;

pub use bdf::Bdf;
pub use explicit::{Dop853, Rk23, Rk45};
pub use lsoda::Lsoda;
pub use radau::Radau;

/// Integration method requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SolverMethod {
    #[default]
    #[serde(rename = "RK45")]
    Rk45,
    #[serde(rename = "RK23")]
    Rk23,
    #[serde(rename = "DOP853")]
    Dop853,
    Radau,
    #[serde(rename = "BDF")]
    Bdf,
    #[serde(rename = "LSODA")]
    Lsoda,
}

impl SolverMethod {
    pub const ALL: [SolverMethod; 6] = [
        SolverMethod::Rk45,
        SolverMethod::Rk23,
        SolverMethod::Dop853,
        SolverMethod::Radau,
        SolverMethod::Bdf,
        SolverMethod::Lsoda,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SolverMethod::Rk45 => "RK45",
            SolverMethod::Rk23 => "RK23",
            SolverMethod::Dop853 => "DOP853",
            SolverMethod::Radau => "Radau",
            SolverMethod::Bdf => "BDF",
            SolverMethod::Lsoda => "LSODA",
        }
    }

    /// Builds a fresh stepper for a system of dimension `dim`.
    pub fn build(self, dim: usize, tolerances: &Tolerances) -> Box<dyn AdaptiveStepper> {
        let corrector = CorrectorSettings::from_tolerances(tolerances);
        match self {
            SolverMethod::Rk45 => Box::new(Rk45::new(dim)),
            SolverMethod::Rk23 => Box::new(Rk23::new(dim)),
            SolverMethod::Dop853 => Box::new(Dop853::new(dim)),
            SolverMethod::Radau => Box::new(Radau::new(dim, corrector)),
            SolverMethod::Bdf => Box::new(Bdf::new(dim, corrector)),
            SolverMethod::Lsoda => Box::new(Lsoda::new(dim, corrector)),
        }
    }
}

impl fmt::Display for SolverMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convergence settings for the simplified Newton iteration of implicit methods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct CorrectorSettings {
    pub rtol: f64,
    pub atol: f64,
    /// Scaled RMS size of a Newton update below which the iteration has converged.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl CorrectorSettings {
    pub fn from_tolerances(tolerances: &Tolerances) -> Self {
        let tolerance = (10.0 * f64::EPSILON / tolerances.rtol).max(tolerances.rtol.sqrt().min(0.03));
        Self {
            rtol: tolerances.rtol,
            atol: tolerances.atol,
            tolerance,
            max_iterations: 7,
        }
    }

    pub fn scaled_norm(&self, delta: &[f64], reference: &[f64]) -> f64 {
        let dim = reference.len();
        if delta.is_empty() {
            return 0.0;
        }
        let sum: f64 = delta
            .iter()
            .enumerate()
            .map(|(k, d)| {
                let scale = self.atol + self.rtol * reference[k % dim].abs();
                (d / scale) * (d / scale)
            })
            .sum();
        (sum / delta.len() as f64).sqrt()
    }

    /// Decides whether a Newton iteration has converged, given the current
    /// update norm and the previous one. `Err` means it is diverging.
    pub fn converged(&self, norm: f64, previous: Option<f64>) -> Result<bool, ()> {
        if !norm.is_finite() {
            return Err(());
        }
        if norm == 0.0 {
            return Ok(true);
        }
        match previous {
            Some(prev) if prev > 0.0 => {
                let rate = norm / prev;
                if rate >= 1.0 {
                    return Err(());
                }
                Ok(rate / (1.0 - rate) * norm < self.tolerance || norm < self.tolerance)
            }
            _ => Ok(norm < self.tolerance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip_through_serde() {
        for method in SolverMethod::ALL {
            let json = serde_json::to_string(&method).expect("serialize method");
            assert_eq!(json, format!("\"{}\"", method.as_str()));
            let back: SolverMethod = serde_json::from_str(&json).expect("deserialize method");
            assert_eq!(back, method);
        }
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(serde_json::from_str::<SolverMethod>("\"Euler\"").is_err());
    }

    #[test]
    fn default_method_is_rk45() {
        assert_eq!(SolverMethod::default(), SolverMethod::Rk45);
    }

    #[test]
    fn corrector_detects_divergence() {
        let settings = CorrectorSettings::from_tolerances(&Tolerances::default());
        assert!(settings.converged(2.0, Some(1.0)).is_err());
        assert!(settings.converged(f64::NAN, None).is_err());
        assert_eq!(settings.converged(0.0, None), Ok(true));
        assert_eq!(settings.converged(1.0, None), Ok(false));
    }
}
