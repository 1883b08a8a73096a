use tracing::debug;

use super::{Bdf, CorrectorSettings, Rk45};
use crate::traits::{AdaptiveStepper, DynamicalSystem, StepFailure};

/// `dt * ||J||∞` above which an accepted step counts as stiff.
const STIFF_RATIO: f64 = 1.5;
/// `dt * ||J||∞` below which an accepted step counts as non-stiff.
const NONSTIFF_RATIO: f64 = 0.5;
const STIFF_STREAK: usize = 5;
const NONSTIFF_STREAK: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    NonStiff,
    Stiff,
}

/// Automatic stiffness switching between Dormand-Prince and BDF.
///
/// After every accepted step the product of the step size and the infinity
/// norm of the Jacobian is compared against fixed thresholds; a run of
/// consecutive steps on the other side of the threshold flips the method.
pub struct Lsoda {
    nonstiff: Rk45,
    stiff: Bdf,
    mode: Mode,
    streak: usize,
    switches: usize,
    dim: usize,
    jac: Vec<f64>,
}

impl Lsoda {
    pub(crate) fn new(dim: usize, corrector: CorrectorSettings) -> Self {
        Self {
            nonstiff: Rk45::new(dim),
            stiff: Bdf::new(dim, corrector),
            mode: Mode::NonStiff,
            streak: 0,
            switches: 0,
            dim,
            jac: vec![0.0; dim * dim],
        }
    }

    fn is_stiff(&self) -> bool {
        self.mode == Mode::Stiff
    }

    fn active(&mut self) -> &mut dyn AdaptiveStepper {
        if self.is_stiff() {
            &mut self.stiff
        } else {
            &mut self.nonstiff
        }
    }

    fn jacobian_norm(&self) -> f64 {
        self.jac
            .chunks(self.dim.max(1))
            .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max)
    }

    fn switch_to(&mut self, mode: Mode, t: f64, ratio: f64) {
        debug!(t, ratio, ?mode, "LSODA switching method");
        if mode == Mode::Stiff {
            self.stiff.reset();
        }
        self.mode = mode;
        self.streak = 0;
        self.switches += 1;
    }
}

impl AdaptiveStepper for Lsoda {
    fn error_order(&self) -> usize {
        if self.is_stiff() {
            self.stiff.error_order()
        } else {
            self.nonstiff.error_order()
        }
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
        self.active().attempt(system, t, state, dt, next, error)
    }

    fn error_norm(&self, error: &[f64], scale: &[f64]) -> f64 {
        if self.is_stiff() {
            self.stiff.error_norm(error, scale)
        } else {
            self.nonstiff.error_norm(error, scale)
        }
    }

    fn accept(&mut self, system: &dyn DynamicalSystem, t: f64, state: &[f64], dt: f64) {
        self.active().accept(system, t, state, dt);

        system.jacobian(t, state, &mut self.jac);
        let ratio = dt * self.jacobian_norm();
        match self.mode {
            Mode::NonStiff if ratio > STIFF_RATIO => {
                self.streak += 1;
                if self.streak >= STIFF_STREAK {
                    self.switch_to(Mode::Stiff, t, ratio);
                }
            }
            Mode::Stiff if ratio < NONSTIFF_RATIO => {
                self.streak += 1;
                if self.streak >= NONSTIFF_STREAK {
                    self.switch_to(Mode::NonStiff, t, ratio);
                }
            }
            _ => self.streak = 0,
        }
    }

    fn method_switches(&self) -> usize {
        self.switches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tolerances;

    struct Decay {
        rate: f64,
    }

    impl DynamicalSystem for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -self.rate * x[0];
        }

        fn jacobian(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = -self.rate;
        }
    }

    fn stepper() -> Lsoda {
        Lsoda::new(1, CorrectorSettings::from_tolerances(&Tolerances::default()))
    }

    #[test]
    fn switches_to_bdf_after_stiff_streak() {
        let mut lsoda = stepper();
        let system = Decay { rate: 1000.0 };
        for k in 0..STIFF_STREAK {
            assert!(!lsoda.is_stiff(), "switched early at step {k}");
            lsoda.accept(&system, 0.01 * (k + 1) as f64, &[1.0], 0.01);
        }
        assert!(lsoda.is_stiff());
        assert_eq!(lsoda.method_switches(), 1);
        assert_eq!(lsoda.error_order(), 1);
    }

    #[test]
    fn mixed_ratios_reset_the_streak() {
        let mut lsoda = stepper();
        let system = Decay { rate: 1000.0 };
        for k in 0..20 {
            // Alternate a stiff-looking step with a tiny one.
            let dt = if k % 2 == 0 { 0.01 } else { 1e-6 };
            lsoda.accept(&system, k as f64, &[1.0], dt);
        }
        assert!(!lsoda.is_stiff());
    }

    #[test]
    fn returns_to_dormand_prince_when_problem_relaxes() {
        let mut lsoda = stepper();
        let stiff = Decay { rate: 1000.0 };
        for k in 0..STIFF_STREAK {
            lsoda.accept(&stiff, k as f64, &[1.0], 0.01);
        }
        assert!(lsoda.is_stiff());
        let mild = Decay { rate: 1.0 };
        for k in 0..NONSTIFF_STREAK {
            lsoda.accept(&mild, k as f64, &[1.0], 0.01);
        }
        assert!(!lsoda.is_stiff());
        assert_eq!(lsoda.method_switches(), 2);
        assert_eq!(lsoda.error_order(), 4);
    }
}
