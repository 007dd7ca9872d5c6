//! The HAL's HTTP surface.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use fridgeos_common::error::HalError;
use serde::Deserialize;
use serde_json::json;

use crate::core::Hal;

#[derive(Clone)]
pub struct AppState {
    pub hal: Arc<Hal>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/temperatures", get(get_temperatures))
        .route("/temperature/:name", get(get_temperature))
        .route("/heaters/values", get(get_heater_values))
        .route("/heater/:name/value", get(get_heater_value).put(set_heater_value))
        .route("/heaters/max_values", get(get_heater_max_values))
        .with_state(state)
}

fn hal_error_response(err: HalError) -> Response {
    match err {
        HalError::NotFound(name) => {
            (StatusCode::NOT_FOUND, Json(json!({ "detail": format!("device {name:?} not found") }))).into_response()
        }
        HalError::DriverRead { name, reason } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": format!("error reading {name}: {reason}") })),
        )
            .into_response(),
        HalError::DriverWrite { name, reason } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": format!("error writing {name}: {reason}") })),
        )
            .into_response(),
    }
}

async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    let temperatures = state.hal.get_temperatures().await;
    let heater_values = state.hal.get_heater_values().await.unwrap_or_default();
    let heater_max_values = state.hal.get_heater_max_values();

    Json(json!({
        "service": "HAL Server",
        "version": "1.0.0",
        "temperatures": temperatures,
        "heater_values": heater_values,
        "heater_max_values": heater_max_values,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

async fn get_temperatures(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.hal.get_temperatures().await))
}

async fn get_temperature(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.hal.get_temperature(&name).await {
        Ok(Some(value)) => Json(json!({ name: value })).into_response(),
        Ok(None) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": format!("unprocessable thermometer reading for {name}") })),
        )
            .into_response(),
        Err(e) => hal_error_response(e),
    }
}

async fn get_heater_values(State(state): State<AppState>) -> Response {
    match state.hal.get_heater_values().await {
        Ok(values) => Json(json!(values)).into_response(),
        Err(e) => hal_error_response(e),
    }
}

async fn get_heater_value(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.hal.get_heater_value(&name).await {
        Ok(value) => Json(json!({ name: value })).into_response(),
        Err(e) => hal_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct HeaterValueRequest {
    value: f64,
}

async fn set_heater_value(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<HeaterValueRequest>,
) -> Response {
    match state.hal.set_heater_value(&name, request.value).await {
        Ok(value) => Json(json!({ name: value })).into_response(),
        Err(e) => hal_error_response(e),
    }
}

async fn get_heater_max_values(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.hal.get_heater_max_values()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationCache;
    use crate::config::{HardwareConfig, HeaterConfig, ThermometerConfig};
    use crate::drivers::registry::DriverRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = HardwareConfig {
            thermometers: vec![ThermometerConfig {
                name: "4K".to_string(),
                hardware: "demo-thermometer".to_string(),
                setup: toml::value::Table::new(),
                conversion_csv: None,
            }],
            heaters: vec![HeaterConfig {
                name: "PUMPHEATER".to_string(),
                hardware: "demo-heater".to_string(),
                setup: toml::value::Table::new(),
                max_value: 25.0,
            }],
        };
        let registry = DriverRegistry::with_demo_drivers();
        let cache = CalibrationCache::new();
        let hal = Hal::build(&config, &registry, &cache).unwrap();
        AppState { hal: Arc::new(hal) }
    }

    #[tokio::test]
    async fn unknown_temperature_is_404() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/temperature/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn heater_write_clamps_above_max() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/heater/PUMPHEATER/value")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"value": 100.0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["PUMPHEATER"], 25.0);
    }
}
