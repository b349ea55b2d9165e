mod health;
mod practice;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::response::json_error;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let healthcheck_endpoint = normalize_healthcheck_endpoint(
        std::env::var("HEALTHCHECK_ENDPOINT")
            .ok()
            .as_deref()
            .unwrap_or("/health"),
    );

    let mut app = Router::new().nest("/api/practice", practice::router());

    let mut health_paths = vec!["/health".to_string()];
    if healthcheck_endpoint != "/health" {
        health_paths.push(healthcheck_endpoint);
    }
    for path in &health_paths {
        app = app.nest(path.as_str(), health::router());
    }

    app.fallback(fallback_handler).with_state(state)
}

fn normalize_healthcheck_endpoint(value: &str) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/health".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "route not found").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_healthcheck_endpoint() {
        assert_eq!(normalize_healthcheck_endpoint(""), "/health");
        assert_eq!(normalize_healthcheck_endpoint("status/"), "/status");
        assert_eq!(normalize_healthcheck_endpoint("/healthz"), "/healthz");
    }
}
