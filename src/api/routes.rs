//! API route definitions.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::{authorize_operator, authorize_scheduler};
use super::state::AppState;
use crate::dispatch::{parse_date, DispatchError, LogFilter, RunOutcome, StatusQuery};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/cron/notify", get(cron_notify).post(cron_notify))
        .route("/notifications/run", post(run_now))
        .route("/notifications/status", get(notification_status))
        .route("/notifications/resend", post(resend))
        .route("/notifications/logs", get(list_logs))
}

fn optional_date(field: &str, raw: Option<&str>) -> Result<Option<chrono::NaiveDate>, DispatchError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_date(field, s).map(Some),
    }
}

fn outcome_response(outcome: RunOutcome) -> Response {
    let status = if outcome.is_error() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(json!({ "data": outcome }))).into_response()
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }
    }))
}

/// Platform scheduler entry point. Idempotent per target date.
async fn cron_notify(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, DispatchError> {
    authorize_scheduler(&headers, &state.access)?;
    Ok(outcome_response(state.dispatcher.run_once().await))
}

/// Operator-triggered run; always dispatches.
async fn run_now(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, DispatchError> {
    authorize_operator(&headers, &state.access)?;
    Ok(outcome_response(state.dispatcher.run().await))
}

#[derive(Debug, Deserialize)]
struct StatusParams {
    date: Option<String>,
    execution_date: Option<String>,
}

async fn notification_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<StatusParams>,
) -> Result<Json<Value>, DispatchError> {
    authorize_operator(&headers, &state.access)?;
    let query = StatusQuery {
        date: optional_date("date", params.date.as_deref())?,
        execution_date: optional_date("execution_date", params.execution_date.as_deref())?,
    };
    let report = state.dispatcher.status(&query)?;
    Ok(Json(json!({ "data": report })))
}

#[derive(Debug, Deserialize)]
struct ResendBody {
    date: Option<String>,
    room: Option<String>,
}

async fn resend(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ResendBody>,
) -> Result<Json<Value>, DispatchError> {
    authorize_operator(&headers, &state.access)?;
    let date = optional_date("date", body.date.as_deref())?
        .ok_or_else(|| DispatchError::Validation("date is required".to_string()))?;
    let room = body
        .room
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| DispatchError::Validation("room is required".to_string()))?;

    let outcome = state.dispatcher.resend(date, &room).await?;
    Ok(Json(json!({ "data": outcome })))
}

#[derive(Debug, Deserialize)]
struct LogParams {
    date: Option<String>,
    job_name: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn list_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<LogParams>,
) -> Result<Json<Value>, DispatchError> {
    authorize_operator(&headers, &state.access)?;
    let filter = LogFilter {
        date: optional_date("date", params.date.as_deref())?,
        job_name: params.job_name.filter(|j| !j.trim().is_empty()),
        page: params.page,
        page_size: params.page_size,
    };
    let page = state.dispatcher.logs().list(&filter)?;
    Ok(Json(json!({
        "data": page.rows,
        "meta": {
            "total": page.total,
            "page": page.page,
            "page_size": page.page_size
        }
    })))
}
