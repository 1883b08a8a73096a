use nalgebra::{DMatrix, DVector};

use super::CorrectorSettings;
use crate::traits::{AdaptiveStepper, DynamicalSystem, StepFailure};

const SQRT6: f64 = 2.449489742783178;

const C: [f64; 3] = [(4.0 - SQRT6) / 10.0, (4.0 + SQRT6) / 10.0, 1.0];

const A: [[f64; 3]; 3] = [
    [
        (88.0 - 7.0 * SQRT6) / 360.0,
        (296.0 - 169.0 * SQRT6) / 1800.0,
        (-2.0 + 3.0 * SQRT6) / 225.0,
    ],
    [
        (296.0 + 169.0 * SQRT6) / 1800.0,
        (88.0 + 7.0 * SQRT6) / 360.0,
        (-2.0 - 3.0 * SQRT6) / 225.0,
    ],
    [(16.0 - SQRT6) / 36.0, (16.0 + SQRT6) / 36.0, 1.0 / 9.0],
];

/// Weights of the embedded error estimate applied to the stage increments.
const E: [f64; 3] = [
    (-13.0 - 7.0 * SQRT6) / 3.0,
    (-13.0 + 7.0 * SQRT6) / 3.0,
    -1.0 / 3.0,
];

/// Real eigenvalue of the inverse Radau IIA matrix.
const GAMMA: f64 = 3.637834252744496;

/// Three-stage Radau IIA collocation (order 5, L-stable).
///
/// The stage system is solved for the increments `Z_i = Y_i - y` with a
/// simplified Newton iteration on the full `3n x 3n` matrix `I - dt (A ⊗ J)`.
pub struct Radau {
    dim: usize,
    corrector: CorrectorSettings,
    jac: Vec<f64>,
    z: Vec<f64>,
    stage_rhs: Vec<Vec<f64>>,
    f0: Vec<f64>,
    tmp: Vec<f64>,
}

impl Radau {
    pub(crate) fn new(dim: usize, corrector: CorrectorSettings) -> Self {
        Self {
            dim,
            corrector,
            jac: vec![0.0; dim * dim],
            z: vec![0.0; 3 * dim],
            stage_rhs: vec![vec![0.0; dim]; 3],
            f0: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }

    fn evaluate_stages(&mut self, system: &dyn DynamicalSystem, t: f64, state: &[f64], dt: f64) {
        let n = self.dim;
        for s in 0..3 {
            for i in 0..n {
                self.tmp[i] = state[i] + self.z[s * n + i];
            }
            system.apply(t + C[s] * dt, &self.tmp, &mut self.stage_rhs[s]);
        }
    }
}

impl AdaptiveStepper for Radau {
    fn error_order(&self) -> usize {
        3
    }

    fn attempt(
        &mut self,
        system: &dyn DynamicalSystem,
        t: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
        error: &mut [f64],
    ) -> Result<(), StepFailure> {
        let n = self.dim;
        system.jacobian(t, state, &mut self.jac);

        let iteration = DMatrix::from_fn(3 * n, 3 * n, |r, c| {
            let (si, i) = (r / n, r % n);
            let (sj, j) = (c / n, c % n);
            let identity = if r == c { 1.0 } else { 0.0 };
            identity - dt * A[si][sj] * self.jac[i * n + j]
        });
        let lu = iteration.lu();

        self.z.iter_mut().for_each(|v| *v = 0.0);
        let mut previous_norm = None;
        let mut converged = false;

        for _ in 0..self.corrector.max_iterations {
            self.evaluate_stages(system, t, state, dt);
            let residual = DVector::from_fn(3 * n, |k, _| {
                let (s, i) = (k / n, k % n);
                let mut acc = 0.0;
                for (j, a) in A[s].iter().enumerate() {
                    acc += a * self.stage_rhs[j][i];
                }
                self.z[k] - dt * acc
            });
            let delta = lu.solve(&residual).ok_or(StepFailure::SingularMatrix)?;
            for (z, d) in self.z.iter_mut().zip(delta.iter()) {
                *z -= d;
            }

            let norm = self.corrector.scaled_norm(delta.as_slice(), state);
            match self.corrector.converged(norm, previous_norm) {
                Ok(true) => {
                    converged = true;
                    break;
                }
                Ok(false) => previous_norm = Some(norm),
                Err(()) => return Err(StepFailure::NewtonDiverged),
            }
        }
        if !converged {
            return Err(StepFailure::NewtonDiverged);
        }

        // Stiffly accurate: the last stage is the new state.
        for i in 0..n {
            next[i] = state[i] + self.z[2 * n + i];
        }

        // error = (γ/dt I - J)^{-1} (f(t, y) + Σ E_s Z_s / dt)
        system.apply(t, state, &mut self.f0);
        let rhs = DVector::from_fn(n, |i, _| {
            let mut ze = 0.0;
            for (s, e) in E.iter().enumerate() {
                ze += e * self.z[s * n + i];
            }
            self.f0[i] + ze / dt
        });
        let shifted = DMatrix::from_fn(n, n, |i, j| {
            let diagonal = if i == j { GAMMA / dt } else { 0.0 };
            diagonal - self.jac[i * n + j]
        });
        let estimate = shifted
            .lu()
            .solve(&rhs)
            .ok_or(StepFailure::SingularMatrix)?;
        error.copy_from_slice(estimate.as_slice());
        Ok(())
    }
}
