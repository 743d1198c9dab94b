use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::controller::AppState;
use crate::domain::ControllerState;

/// Body of `GET /healthz`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    controller: ComponentHealth,
}

/// Liveness of one actor.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<ControllerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn healthy(state: ControllerState) -> Self {
        Self {
            status: "healthy".to_string(),
            state: Some(state),
            error: None,
        }
    }

    fn unhealthy(error: String) -> Self {
        Self {
            status: "unhealthy".to_string(),
            state: None,
            error: Some(error),
        }
    }
}

/// GET /healthz - 200 while the controller actor answers, 503 once it died.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let controller = match state.controller.state().await {
        Ok(s) => ComponentHealth::healthy(s),
        Err(e) => ComponentHealth::unhealthy(e.to_string()),
    };
    let healthy = controller.error.is_none();

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now(),
        checks: HealthChecks { controller },
    };
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}
