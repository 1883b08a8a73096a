/// Represents an autonomous or time-dependent flow `dx/dt = f(t, x)`.
pub trait DynamicalSystem {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt
    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]);

    /// Writes the Jacobian of `apply` with respect to `x` into `out`,
    /// row-major (`out[i * dim + j] = ∂f_i/∂x_j`).
    fn jacobian(&self, t: f64, x: &[f64], out: &mut [f64]);
}

/// Reason a stepper could not produce a candidate state for the requested step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFailure {
    /// The implicit corrector did not converge within its iteration budget.
    NewtonDiverged,
    /// The iteration matrix could not be factorised.
    SingularMatrix,
}

/// A solver that attempts one step of an adaptive scheme.
///
/// The stepper never decides whether a step is accepted: it returns the
/// candidate state and a local error estimate and leaves step-size control
/// to the driver in [`crate::integrator`].
pub trait AdaptiveStepper {
    /// Order of the local error estimate; the driver uses `1 / (order + 1)`
    /// as the step-size exponent.
    fn error_order(&self) -> usize;

    /// Attempts a step of size dt from (t, state).
    /// next: buffer for the candidate state at t + dt
    /// error: buffer for the local error estimate (same units as the state)
    fn attempt(
        &mut self,
        system: &dyn DynamicalSystem,
        t: f64,
        state: &[f64],
        dt: f64,
        next: &mut [f64],
        error: &mut [f64],
    ) -> Result<(), StepFailure>;

    /// Scaled error norm of the last attempt. `scale[i]` is the tolerance
    /// for component `i`.
    fn error_norm(&self, error: &[f64], scale: &[f64]) -> f64 {
        rms_norm(error, scale)
    }

    /// Called by the driver once the last attempted step has been accepted.
    /// `t` and `state` are the new time and state, `dt` the size of the step
    /// that reached them. Multistep and switching methods update their history here.
    fn accept(&mut self, _system: &dyn DynamicalSystem, _t: f64, _state: &[f64], _dt: f64) {}

    /// Times a composite method has changed its underlying scheme.
    fn method_switches(&self) -> usize {
        0
    }
}

pub(crate) fn rms_norm(values: &[f64], scale: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: f64 = values
        .iter()
        .zip(scale)
        .map(|(v, s)| (v / s) * (v / s))
        .sum();
    (sum / values.len() as f64).sqrt()
}
