use std::time::Duration;

use attack_core::SimulationError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error("Malformed request body: {0}")]
    BadRequest(String),

    #[error("Simulation exceeded the {} s time limit", .0.as_secs())]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Simulation(SimulationError::Cancelled) | ApiError::Timeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ApiError::Simulation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Simulation(err) => err.kind(),
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Timeout(_) => "timeout",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            ApiError::Simulation(SimulationError::Cancelled) | ApiError::Timeout(_) => {
                "Simulation timed out"
            }
            ApiError::Simulation(_) => "Invalid simulation request",
            ApiError::BadRequest(_) => "Malformed request",
            ApiError::Internal(_) => "Simulation failed",
        }
    }

    fn field(&self) -> Option<&'static str> {
        match self {
            ApiError::Simulation(err) => err.field(),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": self.summary(),
            "message": self.to_string(),
            "type": self.kind(),
            "field": self.field(),
        });
        (status, Json(body)).into_response()
    }
}
