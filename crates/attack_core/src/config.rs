//! Numerical tolerances shared by the integrator and the stability analyzer.

use serde::{Deserialize, Serialize};

use crate::equilibrium::NewtonSettings;

/// Every numerical threshold the engine uses, passed explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    /// Relative tolerance of the adaptive step controller.
    pub rtol: f64,
    /// Absolute tolerance of the adaptive step controller.
    pub atol: f64,
    /// Real or imaginary parts within this distance of zero count as zero
    /// when classifying eigenvalues.
    pub classification_threshold: f64,
    /// Integration stops once any state component exceeds this magnitude.
    pub divergence_bound: f64,
    /// Maximum number of attempted steps per integration.
    pub max_steps: usize,
    /// Attempts between two polls of the cancellation flag.
    pub cancel_check_interval: usize,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-10,
            classification_threshold: 1e-10,
            divergence_bound: 1e12,
            max_steps: 500_000,
            cancel_check_interval: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub tolerances: Tolerances,
    pub newton: NewtonSettings,
}
