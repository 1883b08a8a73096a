use std::time::Instant;

use attack_core::solvers::SolverMethod;
use attack_core::{simulate_with_config, CancelToken, SimulationRequest, SimulationResult};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::AppState;

const SERVICE_NAME: &str = "attack-a-litics";

pub async fn root() -> Json<Value> {
    let methods: Vec<&str> = SolverMethod::ALL.iter().map(|m| m.as_str()).collect();
    Json(json!({
        "name": "Attack-a-litics API",
        "description": "Cyber conflict dynamics: a four-variable Lotka-Volterra model with stability analysis",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "GET /": "Service information",
            "GET /health": "Liveness probe",
            "POST /simulate": "Integrate the model and classify the equilibrium",
        },
        "variables": {
            "x": "Defender capability",
            "y": "Attacker capability",
            "z": "System vulnerability",
            "u": "Threat intelligence",
        },
        "equations": {
            "dx/dt": "alpha*x - beta*x*y - delta*x*z + rho*x*u",
            "dy/dt": "gamma*y - eta*x*y + epsilon*y*z - sigma*y*u",
            "dz/dt": "theta*y - lambda*x - mu*z",
            "du/dt": "nu*x - xi*u",
        },
        "solver_methods": methods,
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    /// RFC 3339, UTC.
    pub timestamp: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Runs the simulation on the blocking pool under the configured time limit.
///
/// On timeout the run is cancelled and the worker exits at its next poll.
pub async fn simulate(
    State(state): State<AppState>,
    payload: Result<Json<SimulationRequest>, JsonRejection>,
) -> Result<Json<SimulationResult>, ApiError> {
    let Json(request) = payload?;
    let started = Instant::now();
    let cancel = CancelToken::new();
    let engine = state.engine;

    let worker = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || simulate_with_config(&request, &engine, &cancel))
    };

    let joined = match tokio::time::timeout(state.simulation_timeout, worker).await {
        Ok(joined) => joined,
        Err(_) => {
            cancel.cancel();
            warn!(
                method = %request.solver_method,
                time_span = request.time_span,
                limit_secs = state.simulation_timeout.as_secs(),
                "simulation timed out"
            );
            return Err(ApiError::Timeout(state.simulation_timeout));
        }
    };
    let result = joined.map_err(|err| ApiError::Internal(err.to_string()))??;

    info!(
        method = %request.solver_method,
        time_span = request.time_span,
        points = result.metadata.data_points,
        stability = %result.stability,
        success = result.metadata.solver_success,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "simulation completed"
    );
    Ok(Json(result))
}
