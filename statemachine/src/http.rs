//! The State Machine's HTTP surface: read-only inspection endpoints, a
//! password-gated state change, pause/resume, a direct heater override, and
//! the browser-friendly HTML pages from the original server.

use std::sync::Arc;

use axum::extract::{Form, Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use fridgeos_common::error::AuthError;
use serde::Deserialize;
use serde_json::json;

use crate::engine::{HalAccess, StateMachine};

pub struct AppState<H: HalAccess + 'static> {
    pub machine: Arc<StateMachine<H>>,
}

impl<H: HalAccess + 'static> Clone for AppState<H> {
    fn clone(&self) -> Self {
        AppState {
            machine: Arc::clone(&self.machine),
        }
    }
}

pub fn router<H: HalAccess + 'static>(state: AppState<H>) -> Router {
    Router::new()
        .route("/", get(root::<H>))
        .route("/info", get(info::<H>))
        .route("/health", get(health))
        .route("/state", get(get_state::<H>).put(put_state::<H>))
        .route("/statelist", get(statelist::<H>))
        .route("/temperatures", get(temperatures::<H>))
        .route("/heaters", get(heaters::<H>))
        .route("/pause", post(pause::<H>))
        .route("/resume", post(resume::<H>))
        .route("/heater/set", post(set_heater::<H>).get(heater_control_page::<H>))
        .route("/control", get(control_page::<H>))
        .route("/control/set", post(control_set::<H>))
        .route("/control/:state", get(control_link::<H>))
        .with_state(state)
}

fn validate_password(machine: &StateMachine<impl HalAccess>, provided: Option<&str>) -> Result<(), AuthError> {
    match machine.state_change_password() {
        None => Ok(()),
        Some(required) => match provided {
            Some(given) if given == required => Ok(()),
            _ => Err(AuthError),
        },
    }
}

async fn root<H: HalAccess>(State(state): State<AppState<H>>) -> Html<String> {
    let fridge_name = state.machine.fridge_name();
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{fridge_name} FridgeOS State Machine</title></head>
<body>
<h2>FridgeOS State Machine Server</h2>
<p>Fridge name: {fridge_name}</p>
<ul>
  <li><a href="/info">Server Info</a></li>
  <li><a href="/temperatures">Temperatures</a></li>
  <li><a href="/heaters">Heaters</a></li>
  <li><a href="/state">Current State</a></li>
  <li><a href="/statelist">Available States</a></li>
  <li><a href="/health">Health Check</a></li>
  <li><a href="/control">State Control</a></li>
  <li><a href="/heater/set">Heater Control</a></li>
</ul>
</body>
</html>"#
    ))
}

async fn info<H: HalAccess>(State(state): State<AppState<H>>) -> Json<serde_json::Value> {
    let snapshot = state.machine.snapshot().await;
    let targets = state.machine.current_state_targets().await;
    Json(json!({
        "service": "FridgeOS State Machine Server",
        "version": "1.0.0",
        "current_state": snapshot.current_state,
        "available_states": state.machine.available_states(),
        "time_in_current_state": snapshot.time_in_current_state,
        "current_temperatures": snapshot.current_temperatures,
        "current_heater_values": snapshot.current_heater_values,
        "current_state_target_temperatures": targets,
        "last_temperature_update": snapshot.last_temperature_update_age,
        "update_num": snapshot.update_num,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "timestamp": chrono::Utc::now().timestamp() }))
}

async fn get_state<H: HalAccess>(State(state): State<AppState<H>>) -> Json<serde_json::Value> {
    let snapshot = state.machine.snapshot().await;
    Json(json!({
        "current_state": snapshot.current_state,
        "time_in_current_state": snapshot.time_in_current_state,
    }))
}

#[derive(Debug, Deserialize)]
struct StateChangeRequest {
    state: String,
    password: Option<String>,
}

async fn put_state<H: HalAccess>(
    State(state): State<AppState<H>>,
    Json(request): Json<StateChangeRequest>,
) -> Response {
    if validate_password(&state.machine, request.password.as_deref()).is_err() {
        log::warn!("invalid password provided for state change to {}", request.state);
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "invalid or missing password required for state changes" })),
        )
            .into_response();
    }

    if state.machine.make_transition(&request.state).await {
        Json(json!({
            "success": true,
            "message": format!("state changed to {}", request.state),
            "new_state": request.state,
        }))
        .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "detail": format!("invalid state: {}. valid states: {:?}", request.state, state.machine.available_states()),
            })),
        )
            .into_response()
    }
}

async fn statelist<H: HalAccess>(State(state): State<AppState<H>>) -> Json<serde_json::Value> {
    Json(json!({ "available_states": state.machine.available_states() }))
}

async fn temperatures<H: HalAccess>(State(state): State<AppState<H>>) -> Json<serde_json::Value> {
    Json(json!(state.machine.snapshot().await.current_temperatures))
}

async fn heaters<H: HalAccess>(State(state): State<AppState<H>>) -> Json<serde_json::Value> {
    Json(json!(state.machine.snapshot().await.current_heater_values))
}

async fn pause<H: HalAccess>(State(state): State<AppState<H>>) -> Response {
    if state.machine.pause_system().await {
        Json(json!({
            "success": true,
            "message": "system paused successfully",
            "current_state": state.machine.snapshot().await.current_state,
        }))
        .into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({ "detail": "failed to pause system" }))).into_response()
    }
}

#[derive(Debug, Deserialize, Default)]
struct ResumeRequest {
    #[serde(default)]
    target_state: Option<String>,
}

async fn resume<H: HalAccess>(
    State(state): State<AppState<H>>,
    Json(request): Json<ResumeRequest>,
) -> Response {
    if state.machine.resume_system(request.target_state).await {
        Json(json!({
            "success": true,
            "message": format!("system resumed to {}", state.machine.snapshot().await.current_state),
            "current_state": state.machine.snapshot().await.current_state,
        }))
        .into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({ "detail": "failed to resume system" }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct HeaterSetForm {
    heater_name: String,
    value: f64,
}

async fn set_heater<H: HalAccess>(
    State(state): State<AppState<H>>,
    Form(request): Form<HeaterSetForm>,
) -> Response {
    if state.machine.set_heater_value(&request.heater_name, request.value).await {
        Html(format!(
            r#"<!DOCTYPE html><html><body>
<p>Heater {} set to {}</p>
<p><a href="/heater/set">&larr; Back to Heater Control</a> | <a href="/">&larr; Back to Main Page</a></p>
</body></html>"#,
            request.heater_name, request.value
        ))
        .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": format!("failed to set heater {}", request.heater_name) })),
        )
            .into_response()
    }
}

async fn heater_control_page<H: HalAccess>(State(state): State<AppState<H>>) -> Html<String> {
    let snapshot = state.machine.snapshot().await;
    let forms: String = state
        .machine
        .heater_names()
        .into_iter()
        .map(|name| {
            let current = snapshot.current_heater_values.get(&name).copied().unwrap_or(0.0);
            format!(
                r#"<p><strong>Heater: {name}</strong></p>
<p>Current value: {current}</p>
<form action="/heater/set" method="post">
  <input type="hidden" name="heater_name" value="{name}">
  <label>New Value: <input type="number" step="0.1" name="value" required></label>
  <input type="submit" value="Set Value">
</form><br>"#
            )
        })
        .collect();

    Html(format!(
        r#"<!DOCTYPE html><html><body>
<h3>Heater Control</h3>
<p><a href="/">&larr; Back to main page</a></p>
{forms}
</body></html>"#
    ))
}

async fn control_page<H: HalAccess>(State(state): State<AppState<H>>) -> Html<String> {
    let current = state.machine.snapshot().await.current_state;
    if state.machine.state_change_password().is_some() {
        let options: String = state
            .machine
            .available_states()
            .into_iter()
            .map(|s| format!(r#"<option value="{s}">{s}</option>"#))
            .collect();
        Html(format!(
            r#"<!DOCTYPE html><html><body>
<h3>FridgeOS State Control</h3>
<p>Current state: <strong>{current}</strong></p>
<p>Password required for state changes.</p>
<form action="/control/set" method="post">
  <label>New State: <select name="state">{options}</select></label>
  <label>Password: <input type="password" name="password"></label>
  <input type="submit" value="Change State">
</form>
</body></html>"#
        ))
    } else {
        let links: String = state
            .machine
            .available_states()
            .into_iter()
            .map(|s| format!(r#"<li><a href="/control/{s}">{s}</a></li>"#))
            .collect();
        Html(format!(
            r#"<!DOCTYPE html><html><body>
<h3>FridgeOS State Control</h3>
<p>Current state: <strong>{current}</strong></p>
<ul>{links}</ul>
</body></html>"#
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ControlSetForm {
    state: String,
    password: String,
}

async fn control_set<H: HalAccess>(
    State(state): State<AppState<H>>,
    Form(request): Form<ControlSetForm>,
) -> Response {
    if validate_password(&state.machine, Some(request.password.as_str())).is_err() {
        log::warn!("invalid password provided for state change to {} via web form", request.state);
        return (
            StatusCode::UNAUTHORIZED,
            Html("<p>Error: Invalid password</p><p><a href=\"/control\">&larr; Back</a></p>".to_string()),
        )
            .into_response();
    }

    if state.machine.make_transition(&request.state).await {
        Html(format!(
            r#"<p>State changed to <strong>{}</strong></p><p><a href="/control">&larr; Back to control page</a></p>"#,
            request.state
        ))
        .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Html(format!(r#"<p>Error: Invalid state <strong>{}</strong></p>"#, request.state)),
        )
            .into_response()
    }
}

async fn control_link<H: HalAccess>(
    State(state): State<AppState<H>>,
    Path(target_state): Path<String>,
) -> Response {
    if state.machine.state_change_password().is_some() {
        return (
            StatusCode::UNAUTHORIZED,
            Html("<p>Error: Password required. Use the <a href=\"/control\">control form</a>.</p>".to_string()),
        )
            .into_response();
    }

    if state.machine.make_transition(&target_state).await {
        Html(format!(
            r#"<p>State changed to <strong>{target_state}</strong></p><p><a href="/control">&larr; Back to control page</a></p>"#
        ))
        .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Html(format!(r#"<p>Error: Invalid state <strong>{target_state}</strong></p>"#)),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, SmConfig};
    use crate::engine::HalAccess;
    use crate::model::{HeaterMode, HeaterSpec, State as SmState};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use indexmap::IndexMap;
    use std::collections::HashMap;
    use tower::ServiceExt;

    struct FakeHal;

    #[async_trait]
    impl HalAccess for FakeHal {
        async fn get_temperatures(&self) -> anyhow::Result<HashMap<String, Option<f64>>> {
            Ok(HashMap::new())
        }
        async fn get_heater_values(&self) -> anyhow::Result<HashMap<String, f64>> {
            Ok(HashMap::new())
        }
        async fn set_heater_value(&self, _name: &str, _value: f64) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn test_state() -> AppState<FakeHal> {
        let mut states = IndexMap::new();
        states.insert(
            "WARM".to_string(),
            SmState {
                name: "WARM".to_string(),
                targets: HashMap::new(),
            },
        );
        states.insert(
            crate::model::PAUSED.to_string(),
            SmState {
                name: crate::model::PAUSED.to_string(),
                targets: HashMap::new(),
            },
        );

        let config = SmConfig {
            settings: Settings {
                fridge_name: "Test".to_string(),
                polling_interval: 5.0,
                state_change_password: Some("hunter2".to_string()),
            },
            heaters: vec![HeaterSpec {
                name: "H".to_string(),
                mode: HeaterMode::Direct,
            }],
            states,
            transitions: vec![],
        };

        AppState {
            machine: Arc::new(crate::engine::StateMachine::new(config, FakeHal)),
        }
    }

    #[tokio::test]
    async fn state_change_without_password_is_unauthorized() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/state")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"state": "WARM"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn state_change_with_correct_password_succeeds() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/state")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"state": "WARM", "password": "hunter2"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
