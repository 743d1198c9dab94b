use axum::extract::{rejection::JsonRejection, State};
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::ApiError;
use super::health;
use crate::{
    controller::{AppState, LoadStatus, StateSnapshot},
    domain::Command,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/state", get(get_state).put(set_state))
        .route("/schedule_trigger", get(get_schedule_trigger).put(set_schedule_trigger))
        .route("/loads", get(get_loads))
        .route("/forecast", get(get_forecast))
        .route("/temperature", get(get_temperature))
        .route("/healthz", get(health::healthz))
        .with_state(state)
}

pub async fn get_state(State(st): State<AppState>) -> Result<Json<StateSnapshot>, ApiError> {
    Ok(Json(st.controller.snapshot().await?))
}

#[derive(Debug, Deserialize)]
pub struct StateRequest {
    pub state: String,
}

/// Only `halt`, `idle` and `force` may be requested from outside.
pub async fn set_state(
    State(st): State<AppState>,
    payload: Result<Json<StateRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = payload?;
    let command =
        Command::from_str(&req.state).map_err(|_| ApiError::InvalidState(req.state.clone()))?;
    if st.controller.command(command).await? {
        tracing::info!(%command, "state change requested");
        Ok(Json(serde_json::json!({})))
    } else {
        Err(ApiError::TransitionRefused {
            from: st.controller.state().await?,
            requested: command,
        })
    }
}

pub async fn get_schedule_trigger(State(st): State<AppState>) -> Result<Json<bool>, ApiError> {
    Ok(Json(st.controller.schedule_trigger().await?))
}

pub async fn set_schedule_trigger(
    State(st): State<AppState>,
    payload: Result<Json<bool>, JsonRejection>,
) -> Result<Json<bool>, ApiError> {
    let Json(trigger) = payload?;
    Ok(Json(st.controller.set_schedule_trigger(trigger).await?))
}

pub async fn get_loads(State(st): State<AppState>) -> Result<Json<Vec<LoadStatus>>, ApiError> {
    Ok(Json(st.controller.loads().await?))
}

#[derive(Debug, Serialize)]
pub struct ForecastResponse {
    pub timestamp: i64,
    pub cloudiness: u8,
    /// Whether the forecast alone will start the schedule tonight.
    pub schedule_by_weather: bool,
}

pub async fn get_forecast(State(st): State<AppState>) -> Result<Json<ForecastResponse>, ApiError> {
    let forecast = st.weather.forecast().await?;
    Ok(Json(ForecastResponse {
        timestamp: forecast.timestamp,
        cloudiness: forecast.cloudiness,
        schedule_by_weather: forecast.is_cloudy(),
    }))
}

#[derive(Debug, Serialize)]
pub struct TemperatureResponse {
    pub temperature: f64,
}

pub async fn get_temperature(
    State(st): State<AppState>,
) -> Result<Json<TemperatureResponse>, ApiError> {
    let celsius = st.temperature.temperature().await?;
    Ok(Json(TemperatureResponse {
        temperature: (celsius * 10.0).round() / 10.0,
    }))
}
