//! API layer -- axum routes, handlers, and middleware.

pub mod auth;
mod routes;
pub mod state;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use self::state::AppState;
use crate::dispatch::DispatchError;

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            DispatchError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.clone()),
            DispatchError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.clone()),
            DispatchError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized".to_string())
            }
            DispatchError::Upstream(e) => {
                tracing::error!(error = %format!("{:#}", e), "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "upstream_failure",
                    "internal error, see server logs".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": { "code": code, "message": message } }))).into_response()
    }
}
