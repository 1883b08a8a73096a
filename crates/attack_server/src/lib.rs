//! HTTP host for the Attack-a-litics engine.

pub mod config;
pub mod error;
pub mod routes;

use std::time::Duration;

use anyhow::Result;
use attack_core::EngineConfig;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use config::ServerConfig;

#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: EngineConfig,
    pub simulation_timeout: Duration,
}

pub fn app(config: &ServerConfig) -> Result<Router> {
    let state = AppState {
        engine: EngineConfig::default(),
        simulation_timeout: config.simulation_timeout(),
    };
    Ok(Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/simulate", post(routes::simulate))
        .with_state(state)
        .layer(config.cors_layer()?)
        .layer(TraceLayer::new_for_http()))
}
