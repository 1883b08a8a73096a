use nalgebra::{DMatrix, DVector};

use super::CorrectorSettings;
use crate::traits::{AdaptiveStepper, DynamicalSystem, StepFailure};

/// Variable-step backward differentiation formula.
///
/// The first step after construction (or [`Bdf::reset`]) is implicit Euler;
/// every later step is BDF2 on the non-uniform grid formed by the last
/// accepted step and the current one.
pub struct Bdf {
    dim: usize,
    corrector: CorrectorSettings,
    /// Start state and size of the last accepted step.
    history: Option<(Vec<f64>, f64)>,
    /// Start state of the pending attempt.
    pending: Vec<f64>,
    order: usize,
    jac: Vec<f64>,
    f0: Vec<f64>,
    fk: Vec<f64>,
    psi: Vec<f64>,
    predictor: Vec<f64>,
}

impl Bdf {
    pub(crate) fn new(dim: usize, corrector: CorrectorSettings) -> Self {
        Self {
            dim,
            corrector,
            history: None,
            pending: vec![0.0; dim],
            order: 1,
            jac: vec![0.0; dim * dim],
            f0: vec![0.0; dim],
            fk: vec![0.0; dim],
            psi: vec![0.0; dim],
            predictor: vec![0.0; dim],
        }
    }

    /// Drops the step history so the next step restarts at order one.
    pub fn reset(&mut self) {
        self.history = None;
        self.order = 1;
    }
}

impl AdaptiveStepper for Bdf {
    fn error_order(&self) -> usize {
        self.order
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
        self.pending.copy_from_slice(state);
        system.apply(t, state, &mut self.f0);
        system.jacobian(t, state, &mut self.jac);

        let (beta, error_constant) = match &self.history {
            None => {
                for i in 0..n {
                    self.psi[i] = state[i];
                    self.predictor[i] = state[i] + dt * self.f0[i];
                }
                self.order = 1;
                (1.0, 0.5)
            }
            Some((previous, h_prev)) => {
                let h_prev = *h_prev;
                let w = dt / h_prev;
                let denom = 1.0 + 2.0 * w;
                for i in 0..n {
                    self.psi[i] =
                        (1.0 + w) * (1.0 + w) / denom * state[i] - w * w / denom * previous[i];
                    // Quadratic through y_{n-1}, y_n with slope f(t_n, y_n).
                    let curvature = (previous[i] - state[i] + self.f0[i] * h_prev) / (h_prev * h_prev);
                    self.predictor[i] = state[i] + self.f0[i] * dt + curvature * dt * dt;
                }
                self.order = 2;
                ((1.0 + w) / denom, 0.4)
            }
        };

        let jac = &self.jac;
        let iteration = DMatrix::from_fn(n, n, |i, j| {
            let identity = if i == j { 1.0 } else { 0.0 };
            identity - beta * dt * jac[i * n + j]
        });
        let lu = iteration.lu();

        next.copy_from_slice(&self.predictor);
        let mut previous_norm = None;
        let mut converged = false;
        for _ in 0..self.corrector.max_iterations {
            system.apply(t + dt, next, &mut self.fk);
            let residual =
                DVector::from_fn(n, |i, _| next[i] - beta * dt * self.fk[i] - self.psi[i]);
            let delta = lu.solve(&residual).ok_or(StepFailure::SingularMatrix)?;
            for (y, d) in next.iter_mut().zip(delta.iter()) {
                *y -= d;
            }
            let norm = self.corrector.scaled_norm(delta.as_slice(), next);
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

        for i in 0..n {
            error[i] = error_constant * (next[i] - self.predictor[i]);
        }
        Ok(())
    }

    fn accept(&mut self, _system: &dyn DynamicalSystem, _t: f64, _state: &[f64], dt: f64) {
        if let Some((previous, h_prev)) = self.history.as_mut() {
            previous.copy_from_slice(&self.pending);
            *h_prev = dt;
            return;
        }
        self.history = Some((self.pending.clone(), dt));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tolerances;

    struct Decay;

    impl DynamicalSystem for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -x[0];
        }

        fn jacobian(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = -1.0;
        }
    }

    fn stepper() -> Bdf {
        Bdf::new(1, CorrectorSettings::from_tolerances(&Tolerances::default()))
    }

    #[test]
    fn first_step_is_implicit_euler() {
        let mut bdf = stepper();
        let mut next = [0.0];
        let mut error = [0.0];
        bdf.attempt(&Decay, 0.0, &[1.0], 0.1, &mut next, &mut error)
            .expect("implicit Euler step converges");
        assert_eq!(bdf.error_order(), 1);
        assert!((next[0] - 1.0 / 1.1).abs() < 1e-12);
        // Predictor is explicit Euler: 0.9.
        assert!((error[0] - 0.5 * (1.0 / 1.1 - 0.9)).abs() < 1e-12);
    }

    #[test]
    fn accepted_step_raises_order() {
        let mut bdf = stepper();
        let mut next = [0.0];
        let mut error = [0.0];
        bdf.attempt(&Decay, 0.0, &[1.0], 0.01, &mut next, &mut error)
            .expect("first step converges");
        bdf.accept(&Decay, 0.01, &next, 0.01);
        let start = next;
        bdf.attempt(&Decay, 0.01, &start, 0.01, &mut next, &mut error)
            .expect("second step converges");
        assert_eq!(bdf.error_order(), 2);
        assert!((next[0] - (-0.02f64).exp()).abs() < 1e-4);
        assert!(error[0].abs() < 1e-4);
    }

    #[test]
    fn reset_restarts_at_first_order() {
        let mut bdf = stepper();
        let mut next = [0.0];
        let mut error = [0.0];
        bdf.attempt(&Decay, 0.0, &[1.0], 0.01, &mut next, &mut error)
            .expect("first step converges");
        bdf.accept(&Decay, 0.01, &next, 0.01);
        bdf.reset();
        let start = next;
        bdf.attempt(&Decay, 0.01, &start, 0.01, &mut next, &mut error)
            .expect("restarted step converges");
        assert_eq!(bdf.error_order(), 1);
    }
}
