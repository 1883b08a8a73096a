//! Adaptive step-size driver sampling a trajectory on a fixed reporting grid.
//!
//! The stepper proposes a candidate state and an error estimate; the driver
//! accepts or rejects it, adapts the step size and clips steps so that every
//! reporting time `k * resolution` is hit exactly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Tolerances;
use crate::error::{SimResult, SimulationError};
use crate::solvers::SolverMethod;
use crate::traits::{rms_norm, DynamicalSystem};

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;
/// Relative slack when deciding whether the grid already ends at the time span.
const GRID_SLACK: f64 = 1e-9;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How an integration ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SolverStatus {
    Completed,
    /// A state component became non-finite or left the divergence bound.
    Diverged { t: f64 },
    StepBudgetExhausted { t: f64 },
    StepSizeTooSmall { t: f64 },
}

impl SolverStatus {
    pub fn success(&self) -> bool {
        matches!(self, SolverStatus::Completed)
    }

    pub fn message(&self) -> String {
        match self {
            SolverStatus::Completed => {
                "The solver successfully reached the end of the integration interval.".to_string()
            }
            SolverStatus::Diverged { t } => {
                format!("Numerical divergence: state magnitude exceeded the sanity bound at t = {t:.4}.")
            }
            SolverStatus::StepBudgetExhausted { t } => {
                format!("Step budget exhausted at t = {t:.4} before reaching the end of the interval.")
            }
            SolverStatus::StepSizeTooSmall { t } => {
                format!("Required step size became smaller than the floating point spacing at t = {t:.4}.")
            }
        }
    }
}

/// Sampled trajectory, states stored flat in time order.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    dimension: usize,
    times: Vec<f64>,
    states: Vec<f64>,
}

impl Trajectory {
    fn with_capacity(dimension: usize, points: usize) -> Self {
        Self {
            dimension,
            times: Vec::with_capacity(points),
            states: Vec::with_capacity(points * dimension),
        }
    }

    fn push(&mut self, t: f64, state: &[f64]) {
        self.times.push(t);
        self.states.extend_from_slice(state);
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn state(&self, index: usize) -> &[f64] {
        &self.states[index * self.dimension..(index + 1) * self.dimension]
    }

    pub fn final_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    pub fn final_state(&self) -> Option<&[f64]> {
        if self.is_empty() {
            None
        } else {
            Some(self.state(self.len() - 1))
        }
    }

    /// Values of one state component across all samples.
    pub fn component(&self, index: usize) -> Vec<f64> {
        self.states
            .chunks(self.dimension)
            .map(|state| state[index])
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntegrationStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    /// Attempts abandoned because the implicit corrector failed.
    pub failed_corrections: usize,
    /// Changes of the underlying scheme (LSODA only).
    pub method_switches: usize,
}

#[derive(Debug, Clone)]
pub struct IntegrationOutcome {
    pub trajectory: Trajectory,
    pub status: SolverStatus,
    pub stats: IntegrationStats,
}

/// Reporting times `0, resolution, 2 * resolution, ...` up to `time_span`.
///
/// When `time_span` is not a multiple of `resolution` it is appended as the
/// final sample.
pub fn reporting_grid(time_span: f64, resolution: f64) -> Vec<f64> {
    let intervals = (time_span / resolution + GRID_SLACK).floor() as usize;
    let mut grid: Vec<f64> = (0..=intervals).map(|k| k as f64 * resolution).collect();
    let slack = GRID_SLACK * time_span.abs().max(resolution);
    let last = intervals as f64 * resolution;
    if (time_span - last).abs() <= slack {
        grid[intervals] = time_span;
    } else {
        grid.push(time_span);
    }
    grid
}

fn check_interval(field: &'static str, value: f64) -> SimResult<()> {
    if !value.is_finite() {
        return Err(SimulationError::invalid_configuration(field, "must be a finite number"));
    }
    if value <= 0.0 {
        return Err(SimulationError::invalid_configuration(
            field,
            format!("must be positive, got {value}"),
        ));
    }
    Ok(())
}

fn within_bound(state: &[f64], bound: f64) -> bool {
    state.iter().all(|v| v.is_finite() && v.abs() <= bound)
}

/// Starting step estimate (Hairer, Nørsett & Wanner, Solving ODEs I, II.4).
fn initial_step(
    system: &dyn DynamicalSystem,
    t: f64,
    state: &[f64],
    order: usize,
    tolerances: &Tolerances,
) -> f64 {
    let dim = state.len();
    let scale: Vec<f64> = state
        .iter()
        .map(|v| tolerances.atol + tolerances.rtol * v.abs())
        .collect();
    let mut f0 = vec![0.0; dim];
    system.apply(t, state, &mut f0);

    let d0 = rms_norm(state, &scale);
    let d1 = rms_norm(&f0, &scale);
    let h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    };

    let probe: Vec<f64> = state.iter().zip(&f0).map(|(y, f)| y + h0 * f).collect();
    let mut f1 = vec![0.0; dim];
    system.apply(t + h0, &probe, &mut f1);
    let diff: Vec<f64> = f1.iter().zip(&f0).map(|(a, b)| a - b).collect();
    let d2 = rms_norm(&diff, &scale) / h0;

    let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d1.max(d2)).powf(1.0 / (order as f64 + 1.0))
    };
    let h = (100.0 * h0).min(h1);
    if h.is_finite() {
        h
    } else {
        1e-6
    }
}

/// Integrates `system` from `t = 0` to `time_span`, sampling every `resolution`.
///
/// Invalid spans or resolutions fail with [`SimulationError::InvalidConfiguration`].
/// Numerical trouble ends the run early with the samples collected so far and
/// a non-successful [`SolverStatus`]. A cancelled token fails with
/// [`SimulationError::Cancelled`].
pub fn integrate(
    system: &dyn DynamicalSystem,
    initial: &[f64],
    time_span: f64,
    resolution: f64,
    method: SolverMethod,
    tolerances: &Tolerances,
    cancel: &CancelToken,
) -> SimResult<IntegrationOutcome> {
    check_interval("time_span", time_span)?;
    check_interval("resolution", resolution)?;
    let dim = system.dimension();
    if initial.len() != dim {
        return Err(SimulationError::invalid_configuration(
            "initial_state",
            format!("expected {dim} components, got {}", initial.len()),
        ));
    }

    let grid = reporting_grid(time_span, resolution);
    let mut stepper = method.build(dim, tolerances);
    let mut trajectory = Trajectory::with_capacity(dim, grid.len());
    let mut stats = IntegrationStats::default();

    let mut t = 0.0;
    let mut state = initial.to_vec();
    trajectory.push(t, &state);
    if !within_bound(&state, tolerances.divergence_bound) {
        warn!(method = %method, "initial state outside the divergence bound");
        return Ok(IntegrationOutcome {
            trajectory,
            status: SolverStatus::Diverged { t },
            stats,
        });
    }

    let mut h = initial_step(system, t, &state, stepper.error_order(), tolerances).min(resolution);
    let mut next = vec![0.0; dim];
    let mut error = vec![0.0; dim];
    let mut scale = vec![0.0; dim];
    let mut attempts = 0usize;
    let mut status = SolverStatus::Completed;
    let poll_every = tolerances.cancel_check_interval.max(1);

    'grid: for &target in &grid[1..] {
        let mut rejected_last = false;
        while t < target {
            if attempts % poll_every == 0 && cancel.is_cancelled() {
                return Err(SimulationError::Cancelled);
            }
            if attempts >= tolerances.max_steps {
                status = SolverStatus::StepBudgetExhausted { t };
                break 'grid;
            }
            if h < 10.0 * f64::EPSILON * t.abs().max(1.0) {
                status = SolverStatus::StepSizeTooSmall { t };
                break 'grid;
            }
            attempts += 1;

            let remaining = target - t;
            let clipped = h >= remaining;
            let dt = if clipped { remaining } else { h };

            if let Err(failure) = stepper.attempt(system, t, &state, dt, &mut next, &mut error) {
                debug!(t, dt, ?failure, "corrector failed; halving step");
                stats.failed_corrections += 1;
                stats.rejected_steps += 1;
                h = 0.5 * dt;
                rejected_last = true;
                continue;
            }

            for i in 0..dim {
                scale[i] = tolerances.atol + tolerances.rtol * state[i].abs().max(next[i].abs());
            }
            let norm = stepper.error_norm(&error, &scale);
            let exponent = -1.0 / (stepper.error_order() as f64 + 1.0);

            if norm.is_finite() && norm <= 1.0 {
                let t_new = if clipped { target } else { t + dt };
                stepper.accept(system, t_new, &next, dt);
                t = t_new;
                state.copy_from_slice(&next);
                stats.accepted_steps += 1;

                if !within_bound(&state, tolerances.divergence_bound) {
                    status = SolverStatus::Diverged { t };
                    break 'grid;
                }

                let mut factor = if norm == 0.0 {
                    MAX_FACTOR
                } else {
                    (SAFETY * norm.powf(exponent)).clamp(MIN_FACTOR, MAX_FACTOR)
                };
                if rejected_last {
                    factor = factor.min(1.0);
                }
                let proposal = dt * factor;
                h = if clipped { h.max(proposal) } else { proposal };
                h = h.min(resolution);
                rejected_last = false;
            } else {
                stats.rejected_steps += 1;
                let factor = if norm.is_finite() {
                    (SAFETY * norm.powf(exponent)).clamp(MIN_FACTOR, 1.0)
                } else {
                    MIN_FACTOR
                };
                h = dt * factor;
                rejected_last = true;
            }
        }
        trajectory.push(target, &state);
    }
    stats.method_switches = stepper.method_switches();

    if status.success() {
        debug!(
            method = %method,
            points = trajectory.len(),
            accepted = stats.accepted_steps,
            rejected = stats.rejected_steps,
            switches = stats.method_switches,
            "integration finished"
        );
    } else {
        warn!(
            method = %method,
            points = trajectory.len(),
            accepted = stats.accepted_steps,
            "integration stopped early: {}",
            status.message()
        );
    }

    Ok(IntegrationOutcome {
        trajectory,
        status,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Linear {
        rate: f64,
    }

    impl DynamicalSystem for Linear {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = self.rate * x[0];
        }

        fn jacobian(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = self.rate;
        }
    }

    /// Relaxation towards a slowly moving target: stiff for large `rate`.
    struct Relaxation {
        rate: f64,
    }

    impl DynamicalSystem for Relaxation {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -self.rate * (x[0] - t.cos());
        }

        fn jacobian(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = -self.rate;
        }
    }

    fn run(system: &dyn DynamicalSystem, initial: &[f64], span: f64, res: f64, method: SolverMethod) -> IntegrationOutcome {
        integrate(
            system,
            initial,
            span,
            res,
            method,
            &Tolerances::default(),
            &CancelToken::new(),
        )
        .expect("integration should run")
    }

    #[test]
    fn grid_hits_span_exactly() {
        let grid = reporting_grid(24.0, 0.1);
        assert_eq!(grid.len(), 241);
        assert_eq!(grid[0], 0.0);
        assert_eq!(*grid.last().unwrap(), 24.0);
        assert!(grid.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn grid_appends_span_when_not_a_multiple() {
        let grid = reporting_grid(10.0, 0.3);
        assert_eq!(grid.len(), 35);
        assert!((grid[33] - 9.9).abs() < 1e-12);
        assert_eq!(grid[34], 10.0);
    }

    #[test]
    fn rejects_non_positive_interval() {
        let system = Linear { rate: -1.0 };
        let cancel = CancelToken::new();
        let tolerances = Tolerances::default();
        let err = integrate(&system, &[1.0], 10.0, 0.0, SolverMethod::Rk45, &tolerances, &cancel)
            .expect_err("zero resolution must fail");
        assert_eq!(err.field(), Some("resolution"));
        assert_eq!(err.kind(), "invalid_configuration");

        let err = integrate(&system, &[1.0], -1.0, 0.1, SolverMethod::Rk45, &tolerances, &cancel)
            .expect_err("negative span must fail");
        assert_eq!(err.field(), Some("time_span"));

        let err = integrate(&system, &[1.0], f64::NAN, 0.1, SolverMethod::Rk45, &tolerances, &cancel)
            .expect_err("NaN span must fail");
        assert_eq!(err.field(), Some("time_span"));
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let err = integrate(
            &Linear { rate: -1.0 },
            &[1.0, 2.0],
            10.0,
            0.5,
            SolverMethod::Rk45,
            &Tolerances::default(),
            &CancelToken::new(),
        )
        .expect_err("dimension mismatch must fail");
        assert_eq!(err.field(), Some("initial_state"));
    }

    #[test]
    fn every_method_tracks_exponential_decay() {
        let system = Linear { rate: -1.0 };
        for method in SolverMethod::ALL {
            let outcome = run(&system, &[1.0], 10.0, 0.5, method);
            assert!(outcome.status.success(), "{method} failed: {:?}", outcome.status);
            assert_eq!(outcome.trajectory.len(), 21, "{method}");
            for (i, &t) in outcome.trajectory.times().iter().enumerate() {
                let exact = (-t).exp();
                let got = outcome.trajectory.state(i)[0];
                assert!((got - exact).abs() < 1e-5, "{method} at t={t}: {got} vs {exact}");
            }
        }
    }

    #[test]
    fn divergence_returns_truncated_trajectory() {
        let outcome = run(&Linear { rate: 10.0 }, &[1.0], 10.0, 0.1, SolverMethod::Rk45);
        match outcome.status {
            SolverStatus::Diverged { t } => assert!(t > 2.7 && t <= 2.8 + 1e-12, "t = {t}"),
            other => panic!("expected divergence, got {other:?}"),
        }
        assert!(!outcome.status.success());
        assert_eq!(outcome.trajectory.len(), 28);
        let last = outcome.trajectory.final_time().expect("non-empty trajectory");
        assert!((last - 2.7).abs() < 1e-9);
    }

    #[test]
    fn step_budget_is_enforced() {
        let tolerances = Tolerances {
            max_steps: 10,
            ..Tolerances::default()
        };
        let outcome = integrate(
            &Linear { rate: -1.0 },
            &[1.0],
            100.0,
            1.0,
            SolverMethod::Rk45,
            &tolerances,
            &CancelToken::new(),
        )
        .expect("integration should run");
        assert!(matches!(outcome.status, SolverStatus::StepBudgetExhausted { .. }));
        assert!(!outcome.trajectory.is_empty());
        assert!(outcome.trajectory.len() < 101);
    }

    #[test]
    fn cancelled_token_aborts() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = integrate(
            &Linear { rate: -1.0 },
            &[1.0],
            10.0,
            0.1,
            SolverMethod::Rk45,
            &Tolerances::default(),
            &cancel,
        )
        .expect_err("cancelled run must fail");
        assert_eq!(err, SimulationError::Cancelled);
    }

    #[test]
    fn implicit_methods_take_fewer_steps_on_stiff_problems() {
        let system = Relaxation { rate: 1000.0 };
        let explicit = run(&system, &[0.0], 10.0, 1.0, SolverMethod::Rk45);
        let radau = run(&system, &[0.0], 10.0, 1.0, SolverMethod::Radau);
        assert!(explicit.status.success());
        assert!(radau.status.success());
        assert!(
            radau.stats.accepted_steps * 5 < explicit.stats.accepted_steps,
            "radau {} vs rk45 {}",
            radau.stats.accepted_steps,
            explicit.stats.accepted_steps
        );
        let final_value = radau.trajectory.final_state().expect("samples")[0];
        assert!((final_value - 10f64.cos()).abs() < 1e-2);
    }

    #[test]
    fn lsoda_switches_to_bdf_on_stiff_problems() {
        let system = Relaxation { rate: 1000.0 };
        let explicit = run(&system, &[0.0], 10.0, 1.0, SolverMethod::Rk45);
        let switching = run(&system, &[0.0], 10.0, 1.0, SolverMethod::Lsoda);
        assert!(switching.status.success());
        assert!(switching.stats.accepted_steps < explicit.stats.accepted_steps);
        assert!(switching.stats.method_switches >= 1);
        assert_eq!(explicit.stats.method_switches, 0);
        let final_value = switching.trajectory.final_state().expect("samples")[0];
        assert!((final_value - 10f64.cos()).abs() < 1e-2);
    }

    #[test]
    fn out_of_bound_initial_state_keeps_the_first_sample() {
        let outcome = run(&Linear { rate: -1.0 }, &[2e12], 10.0, 1.0, SolverMethod::Rk45);
        assert_eq!(outcome.status, SolverStatus::Diverged { t: 0.0 });
        assert_eq!(outcome.trajectory.times(), &[0.0]);
        assert_eq!(outcome.trajectory.final_state(), Some(&[2e12][..]));
        assert_eq!(outcome.stats.accepted_steps, 0);
    }

    #[test]
    fn component_extracts_column() {
        let outcome = run(&Linear { rate: -1.0 }, &[2.0], 6.0, 1.0, SolverMethod::Rk45);
        let column = outcome.trajectory.component(0);
        assert_eq!(column.len(), outcome.trajectory.len());
        assert_eq!(column[0], 2.0);
    }
}
