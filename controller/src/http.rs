use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use thermocktat_common::{wait_for_shutdown, Snapshot, ThermostatError, ThermostatService};

#[derive(Clone)]
struct AppState {
    service: Arc<dyn ThermostatService>,
    device_id: Arc<str>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct SnapshotView<'a> {
    device_id: &'a str,
    #[serde(flatten)]
    snapshot: Snapshot,
}

#[derive(Debug, Deserialize)]
struct ValueRequest<T> {
    value: Option<T>,
}

pub fn router(service: Arc<dyn ThermostatService>, device_id: &str) -> Router {
    let state = AppState {
        service,
        device_id: Arc::from(device_id),
    };

    Router::new()
        .route("/v1", get(handle_get))
        .route("/v1/enabled", post(handle_set_enabled))
        .route("/v1/temperature_setpoint", post(handle_set_setpoint))
        .route("/v1/temperature_setpoint_min", post(handle_set_min))
        .route("/v1/temperature_setpoint_max", post(handle_set_max))
        .route("/v1/mode", post(handle_set_mode))
        .route("/v1/fan_speed", post(handle_set_fan_speed))
        .route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until shutdown is signalled, then drains in-flight requests.
pub async fn serve(
    listener: TcpListener,
    service: Arc<dyn ThermostatService>,
    device_id: &str,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("http controller listening on http://{addr}");
    }

    axum::serve(listener, router(service, device_id))
        .with_graceful_shutdown(async move { wait_for_shutdown(&mut shutdown).await })
        .await?;

    info!("http controller stopped");
    Ok(())
}

async fn handle_get(State(state): State<AppState>) -> Response {
    snapshot_response(&state)
}

async fn handle_set_enabled(State(state): State<AppState>, body: Bytes) -> Response {
    apply_value(&state, &body, |service, on: bool| {
        service.set_enabled(on);
        Ok(())
    })
}

async fn handle_set_setpoint(State(state): State<AppState>, body: Bytes) -> Response {
    apply_value(&state, &body, |service, value: f64| {
        service.set_setpoint(value)
    })
}

async fn handle_set_min(State(state): State<AppState>, body: Bytes) -> Response {
    apply_value(&state, &body, |service, value: f64| service.set_min(value))
}

async fn handle_set_max(State(state): State<AppState>, body: Bytes) -> Response {
    apply_value(&state, &body, |service, value: f64| service.set_max(value))
}

async fn handle_set_mode(State(state): State<AppState>, body: Bytes) -> Response {
    apply_value(&state, &body, |service, value: String| {
        service.set_mode(value.parse()?)
    })
}

async fn handle_set_fan_speed(State(state): State<AppState>, body: Bytes) -> Response {
    apply_value(&state, &body, |service, value: String| {
        service.set_fan_speed(value.parse()?)
    })
}

fn apply_value<T, F>(state: &AppState, body: &[u8], apply: F) -> Response
where
    T: DeserializeOwned,
    F: FnOnce(&dyn ThermostatService, T) -> Result<(), ThermostatError>,
{
    let request = match serde_json::from_slice::<ValueRequest<T>>(body) {
        Ok(request) => request,
        Err(err) => {
            warn!("rejecting http command: {err}");
            return error_response(StatusCode::BAD_REQUEST, "invalid json");
        }
    };
    let Some(value) = request.value else {
        return error_response(StatusCode::BAD_REQUEST, "missing field 'value'");
    };

    if let Err(err) = apply(state.service.as_ref(), value) {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }
    snapshot_response(state)
}

fn snapshot_response(state: &AppState) -> Response {
    Json(SnapshotView {
        device_id: &state.device_id,
        snapshot: state.service.get(),
    })
    .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
