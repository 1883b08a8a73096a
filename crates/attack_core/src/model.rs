//! The four-variable cyber conflict model.
//!
//! State variables:
//! - `x`: defender capability
//! - `y`: attacker capability
//! - `z`: system vulnerability
//! - `u`: threat intelligence
//!
//! ```text
//! dx/dt = αx - βxy - δxz + ρxu      (ρu with additive coupling)
//! dy/dt = γy - ηxy + εyz - σyu
//! dz/dt = θy - λx - μz
//! du/dt = νx - ξu
//! ```

use serde::{Deserialize, Serialize};

use crate::traits::DynamicalSystem;

pub const STATE_DIM: usize = 4;

/// The thirteen model coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
    pub epsilon: f64,
    pub eta: f64,
    pub theta: f64,
    pub lambda: f64,
    pub mu: f64,
    pub nu: f64,
    pub xi: f64,
    pub rho: f64,
    pub sigma: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            beta: 0.02,
            gamma: 0.08,
            delta: 0.015,
            epsilon: 0.01,
            eta: 0.025,
            theta: 0.03,
            lambda: 0.05,
            mu: 0.02,
            nu: 0.04,
            xi: 0.03,
            rho: 0.02,
            sigma: 0.01,
        }
    }
}

/// Documented `[min, max]` range of each coefficient, in declaration order.
pub const PARAMETER_RANGES: [(&str, f64, f64); 13] = [
    ("alpha", 0.01, 1.0),
    ("beta", 0.001, 0.1),
    ("gamma", 0.01, 1.0),
    ("delta", 0.001, 0.1),
    ("epsilon", 0.001, 0.1),
    ("eta", 0.001, 0.1),
    ("theta", 0.001, 0.1),
    ("lambda", 0.001, 0.2),
    ("mu", 0.001, 0.1),
    ("nu", 0.001, 0.2),
    ("xi", 0.001, 0.1),
    ("rho", 0.001, 0.1),
    ("sigma", 0.001, 0.1),
];

impl Parameters {
    /// Coefficient values paired with their field names, in declaration order.
    pub fn named(&self) -> [(&'static str, f64); 13] {
        [
            ("alpha", self.alpha),
            ("beta", self.beta),
            ("gamma", self.gamma),
            ("delta", self.delta),
            ("epsilon", self.epsilon),
            ("eta", self.eta),
            ("theta", self.theta),
            ("lambda", self.lambda),
            ("mu", self.mu),
            ("nu", self.nu),
            ("xi", self.xi),
            ("rho", self.rho),
            ("sigma", self.sigma),
        ]
    }
}

/// A point `(x, y, z, u)` in state space. No sign constraint is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub u: f64,
}

impl State {
    pub fn new(x: f64, y: f64, z: f64, u: f64) -> Self {
        Self { x, y, z, u }
    }

    pub fn to_array(self) -> [f64; STATE_DIM] {
        [self.x, self.y, self.z, self.u]
    }

    /// Builds a state from the first four entries of `values`.
    ///
    /// # Panics
    /// Panics if `values` has fewer than four entries.
    pub fn from_slice(values: &[f64]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }
}

/// How threat intelligence feeds back into defender capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntelligenceCoupling {
    /// `+ρxu`: intelligence amplifies existing defender capability.
    #[default]
    Multiplicative,
    /// `+ρu`: intelligence adds capability regardless of the defender level.
    Additive,
}

/// Right-hand side and analytic Jacobian of the cyber conflict model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CyberConflictModel {
    pub params: Parameters,
    pub coupling: IntelligenceCoupling,
}

impl CyberConflictModel {
    pub fn new(params: Parameters, coupling: IntelligenceCoupling) -> Self {
        Self { params, coupling }
    }

    /// Computes `dX/dt` at `state`.
    pub fn evaluate(&self, state: &State) -> State {
        let p = &self.params;
        let State { x, y, z, u } = *state;
        let intelligence = match self.coupling {
            IntelligenceCoupling::Multiplicative => p.rho * x * u,
            IntelligenceCoupling::Additive => p.rho * u,
        };
        State {
            x: p.alpha * x - p.beta * x * y - p.delta * x * z + intelligence,
            y: p.gamma * y - p.eta * x * y + p.epsilon * y * z - p.sigma * y * u,
            z: p.theta * y - p.lambda * x - p.mu * z,
            u: p.nu * x - p.xi * u,
        }
    }

    /// Analytic partial derivatives of [`Self::evaluate`]; `J[i][j] = ∂f_i/∂X_j`.
    pub fn jacobian(&self, state: &State) -> [[f64; STATE_DIM]; STATE_DIM] {
        let p = &self.params;
        let State { x, y, z, u } = *state;
        let (dx_dx_intel, dx_du) = match self.coupling {
            IntelligenceCoupling::Multiplicative => (p.rho * u, p.rho * x),
            IntelligenceCoupling::Additive => (0.0, p.rho),
        };
        [
            [
                p.alpha - p.beta * y - p.delta * z + dx_dx_intel,
                -p.beta * x,
                -p.delta * x,
                dx_du,
            ],
            [
                -p.eta * y,
                p.gamma - p.eta * x + p.epsilon * z - p.sigma * u,
                p.epsilon * y,
                -p.sigma * y,
            ],
            [-p.lambda, p.theta, -p.mu, 0.0],
            [p.nu, 0.0, 0.0, -p.xi],
        ]
    }
}

impl DynamicalSystem for CyberConflictModel {
    fn dimension(&self) -> usize {
        STATE_DIM
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let derivative = self.evaluate(&State::from_slice(x));
        out[..STATE_DIM].copy_from_slice(&derivative.to_array());
    }

    fn jacobian(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let jac = CyberConflictModel::jacobian(self, &State::from_slice(x));
        for (i, row) in jac.iter().enumerate() {
            out[i * STATE_DIM..(i + 1) * STATE_DIM].copy_from_slice(row);
        }
    }
}
