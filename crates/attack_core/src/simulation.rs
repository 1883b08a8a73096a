//! Request validation, the integrate-then-linearize pipeline and the result payload.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::equilibrium::solve_equilibrium;
use crate::error::{SimResult, SimulationError};
use crate::integrator::{integrate, CancelToken};
use crate::model::{
    CyberConflictModel, IntelligenceCoupling, Parameters, State, PARAMETER_RANGES, STATE_DIM,
};
use crate::solvers::SolverMethod;
use crate::stability::{analyze, StabilityClass, WireEigenvalue};

pub const TIME_SPAN_RANGE: (f64, f64) = (6.0, 168.0);
pub const RESOLUTION_RANGE: (f64, f64) = (0.01, 1.0);
/// `beta * x0 * y0` above which the interaction terms are flagged.
const INTERACTION_WARNING: f64 = 1000.0;
/// `time_span / resolution` above which the grid is flagged as very fine.
const GRID_WARNING: f64 = 10_000.0;

/// State at which the Jacobian is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Linearization {
    /// Last sampled point of the trajectory.
    #[default]
    FinalState,
    /// Equilibrium found by Newton's method from the last sampled point.
    Equilibrium,
}

/// Everything a caller can ask for. Missing fields take the baseline scenario.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationRequest {
    #[serde(flatten)]
    pub parameters: Parameters,
    pub x0: f64,
    pub y0: f64,
    pub z0: f64,
    pub u0: f64,
    pub time_span: f64,
    pub resolution: f64,
    pub solver_method: SolverMethod,
    pub intelligence_coupling: IntelligenceCoupling,
    pub linearization: Linearization,
}

impl Default for SimulationRequest {
    fn default() -> Self {
        Self {
            parameters: Parameters::default(),
            x0: 100.0,
            y0: 50.0,
            z0: 30.0,
            u0: 20.0,
            time_span: 24.0,
            resolution: 0.1,
            solver_method: SolverMethod::default(),
            intelligence_coupling: IntelligenceCoupling::default(),
            linearization: Linearization::default(),
        }
    }
}

impl SimulationRequest {
    pub fn initial_state(&self) -> State {
        State::new(self.x0, self.y0, self.z0, self.u0)
    }

    fn initial_conditions(&self) -> [(&'static str, f64); STATE_DIM] {
        [
            ("x0", self.x0),
            ("y0", self.y0),
            ("z0", self.z0),
            ("u0", self.u0),
        ]
    }

    /// Checks the request and returns advisory warnings.
    ///
    /// Hard failures name the offending field. Values are never clamped:
    /// out-of-range coefficients and negative initial conditions only warn.
    pub fn validate(&self) -> SimResult<Vec<String>> {
        for (field, value) in [("time_span", self.time_span), ("resolution", self.resolution)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(SimulationError::invalid_configuration(
                    field,
                    format!("must be a positive finite number, got {value}"),
                ));
            }
        }

        for (name, value) in self.parameters.named() {
            if !value.is_finite() {
                return Err(SimulationError::validation(name, "must be a finite number"));
            }
        }
        for (name, value) in self.initial_conditions() {
            if !value.is_finite() {
                return Err(SimulationError::validation(name, "must be a finite number"));
            }
        }

        let (span_min, span_max) = TIME_SPAN_RANGE;
        if !(span_min..=span_max).contains(&self.time_span) {
            return Err(SimulationError::validation(
                "time_span",
                format!(
                    "must be between {span_min} and {span_max} hours, got {}",
                    self.time_span
                ),
            ));
        }
        let (res_min, res_max) = RESOLUTION_RANGE;
        if !(res_min..=res_max).contains(&self.resolution) {
            return Err(SimulationError::validation(
                "resolution",
                format!(
                    "must be between {res_min} and {res_max} hours, got {}",
                    self.resolution
                ),
            ));
        }
        if self.resolution > self.time_span / 10.0 {
            return Err(SimulationError::validation(
                "resolution",
                format!(
                    "must not exceed a tenth of the time span ({}), got {}",
                    self.time_span / 10.0,
                    self.resolution
                ),
            ));
        }

        let mut warnings = Vec::new();
        for ((name, value), (_, min, max)) in self.parameters.named().iter().zip(PARAMETER_RANGES) {
            if *value < min || *value > max {
                warnings.push(format!(
                    "{name} = {value} is outside the typical range [{min}, {max}]"
                ));
            }
        }
        for (name, value) in self.initial_conditions() {
            if value < 0.0 {
                warnings.push(format!("Negative initial condition {name} = {value}"));
            }
        }
        if self.parameters.beta * self.x0 * self.y0 > INTERACTION_WARNING {
            warnings.push(
                "High interaction terms (beta * x0 * y0) may cause numerical instability".to_string(),
            );
        }
        if self.time_span / self.resolution > GRID_WARNING {
            warnings.push("Very fine resolution may cause long computation times".to_string());
        }
        Ok(warnings)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub t: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub u: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumSummary {
    pub state: State,
    pub residual_norm: f64,
    pub iterations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub solver_method: SolverMethod,
    pub solver_success: bool,
    pub solver_message: String,
    pub data_points: usize,
    pub simulation_time: f64,
    pub resolution: f64,
    pub final_state: State,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub failed_corrections: usize,
    pub method_switches: usize,
    pub warnings: Vec<String>,
    pub linearization_point: Linearization,
    pub equilibrium: Option<EquilibriumSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub time_series: TimeSeries,
    pub jacobian: [[f64; STATE_DIM]; STATE_DIM],
    pub eigenvalues: Vec<WireEigenvalue>,
    pub stability: StabilityClass,
    pub parameters: SimulationRequest,
    pub metadata: Metadata,
}

/// Runs a request with the default engine configuration and no cancellation.
pub fn simulate(request: &SimulationRequest) -> SimResult<SimulationResult> {
    simulate_with_config(request, &EngineConfig::default(), &CancelToken::new())
}

pub fn simulate_with_config(
    request: &SimulationRequest,
    config: &EngineConfig,
    cancel: &CancelToken,
) -> SimResult<SimulationResult> {
    let mut warnings = request.validate()?;
    for message in &warnings {
        warn!("{message}");
    }

    let model = CyberConflictModel::new(request.parameters, request.intelligence_coupling);
    let initial = request.initial_state();
    let outcome = integrate(
        &model,
        &initial.to_array(),
        request.time_span,
        request.resolution,
        request.solver_method,
        &config.tolerances,
        cancel,
    )?;

    let trajectory = &outcome.trajectory;
    let final_state = trajectory
        .final_state()
        .map(State::from_slice)
        .unwrap_or(initial);

    let (point, equilibrium) = match request.linearization {
        Linearization::FinalState => (final_state, None),
        Linearization::Equilibrium => {
            match solve_equilibrium(&model, &final_state.to_array(), config.newton) {
                Ok(result) => {
                    let state = State::from_slice(&result.state);
                    let summary = EquilibriumSummary {
                        state,
                        residual_norm: result.residual_norm,
                        iterations: result.iterations,
                    };
                    (state, Some(summary))
                }
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "equilibrium refinement failed");
                    warnings.push(format!(
                        "Equilibrium refinement failed ({err:#}); linearized at the final state instead"
                    ));
                    (final_state, None)
                }
            }
        }
    };

    let jacobian = model.jacobian(&point);
    let flat: Vec<f64> = jacobian.iter().flatten().copied().collect();
    let analysis = analyze(STATE_DIM, &flat, &config.tolerances);
    let threshold = config.tolerances.classification_threshold;

    debug!(
        method = %request.solver_method,
        points = trajectory.len(),
        stability = %analysis.stability,
        "simulation finished"
    );

    Ok(SimulationResult {
        time_series: TimeSeries {
            t: trajectory.times().to_vec(),
            x: trajectory.component(0),
            y: trajectory.component(1),
            z: trajectory.component(2),
            u: trajectory.component(3),
        },
        jacobian,
        eigenvalues: analysis
            .eigenvalues
            .iter()
            .map(|e| e.to_wire(threshold))
            .collect(),
        stability: analysis.stability,
        parameters: *request,
        metadata: Metadata {
            solver_method: request.solver_method,
            solver_success: outcome.status.success(),
            solver_message: outcome.status.message(),
            data_points: trajectory.len(),
            simulation_time: request.time_span,
            resolution: request.resolution,
            final_state,
            accepted_steps: outcome.stats.accepted_steps,
            rejected_steps: outcome.stats.rejected_steps,
            failed_corrections: outcome.stats.failed_corrections,
            method_switches: outcome.stats.method_switches,
            warnings,
            linearization_point: if equilibrium.is_some() {
                Linearization::Equilibrium
            } else {
                Linearization::FinalState
            },
            equilibrium,
        },
    })
}
