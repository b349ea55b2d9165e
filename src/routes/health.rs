use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

const PING_TIMEOUT: Duration = Duration::from_secs(2);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/info", get(info))
        .route("/live", get(live))
        .route("/ready", get(ready))
}

#[derive(Serialize)]
struct CompatHealthResponse {
    status: &'static str,
    database: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthInfoResponse {
    service: &'static str,
    version: &'static str,
    store: &'static str,
    start_time: String,
    uptime: u64,
}

#[derive(Serialize)]
struct LivenessResponse {
    status: &'static str,
    timestamp: String,
    uptime: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessResponse {
    status: &'static str,
    timestamp: String,
    uptime: u64,
    store: &'static str,
    database: &'static str,
    database_latency_ms: Option<u64>,
}

enum StoreCheck {
    Connected { latency_ms: u64 },
    Timeout,
    Disconnected,
}

async fn store_check(state: &AppState) -> StoreCheck {
    let started = Instant::now();
    match tokio::time::timeout(PING_TIMEOUT, state.store().ping()).await {
        Ok(Ok(())) => StoreCheck::Connected {
            latency_ms: started.elapsed().as_millis() as u64,
        },
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "store ping failed");
            StoreCheck::Disconnected
        }
        Err(_) => StoreCheck::Timeout,
    }
}

async fn root(State(state): State<AppState>) -> Response {
    let ok = matches!(store_check(&state).await, StoreCheck::Connected { .. });

    let response = CompatHealthResponse {
        status: if ok { "ok" } else { "degraded" },
        database: if ok { "connected" } else { "disconnected" },
        timestamp: now_iso(),
    };

    let status_code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response)).into_response()
}

async fn info(State(state): State<AppState>) -> Response {
    let start_time: chrono::DateTime<chrono::Utc> = state.started_at_system().into();

    Json(HealthInfoResponse {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        store: state.store().backend(),
        start_time: start_time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        uptime: state.uptime_seconds(),
    })
    .into_response()
}

async fn live(State(state): State<AppState>) -> Response {
    Json(LivenessResponse {
        status: "healthy",
        timestamp: now_iso(),
        uptime: state.uptime_seconds(),
    })
    .into_response()
}

async fn ready(State(state): State<AppState>) -> Response {
    let (status, database, latency) = match store_check(&state).await {
        StoreCheck::Connected { latency_ms } => ("healthy", "connected", Some(latency_ms)),
        StoreCheck::Timeout => ("degraded", "timeout", None),
        StoreCheck::Disconnected => ("unhealthy", "disconnected", None),
    };

    let response = ReadinessResponse {
        status,
        timestamp: now_iso(),
        uptime: state.uptime_seconds(),
        store: state.store().backend(),
        database,
        database_latency_ms: latency,
    };

    let status_code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status_code, Json(response)).into_response()
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
