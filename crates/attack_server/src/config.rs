use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

#[derive(Parser, Debug, Clone)]
#[command(name = "attack_server", about = "Attack-a-litics simulation API", version)]
pub struct ServerConfig {
    /// Interface to bind
    #[arg(long, env = "ATTACK_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP port
    #[arg(long, env = "ATTACK_PORT", default_value = "8000")]
    pub port: u16,

    /// Comma-separated list of allowed origins, or `*` for any
    #[arg(long, env = "CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    /// Wall-clock limit for a single simulation
    #[arg(long, env = "ATTACK_SIMULATION_TIMEOUT_SECS", default_value = "30")]
    pub simulation_timeout_secs: u64,
}

impl ServerConfig {
    pub fn simulation_timeout(&self) -> Duration {
        Duration::from_secs(self.simulation_timeout_secs)
    }

    pub fn cors_layer(&self) -> Result<CorsLayer> {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);

        let origins: Vec<&str> = self
            .cors_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .collect();
        if origins.is_empty() || origins.contains(&"*") {
            return Ok(layer.allow_origin(Any));
        }

        let values = origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("invalid CORS origin \"{origin}\""))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(layer.allow_origin(AllowOrigin::list(values)))
    }
}
