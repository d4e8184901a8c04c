//! Trigger authorization.
//!
//! Two callers exist: the hosting platform's scheduler (marker header or the
//! shared cron secret as a bearer token) and operators (bearer token from the
//! configured operator set).

use axum::http::{header, HeaderMap};
use tracing::warn;

use crate::config::AccessConfig;
use crate::dispatch::DispatchError;

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn marker_set(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true"))
        .unwrap_or(false)
}

/// Compare without short-circuiting on the first differing byte.
fn secret_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Accept the platform scheduler marker or the cron secret.
pub fn authorize_scheduler(headers: &HeaderMap, access: &AccessConfig) -> Result<(), DispatchError> {
    if let Some(name) = access.scheduler_header.as_deref() {
        if marker_set(headers, name) {
            return Ok(());
        }
    }
    if let (Some(secret), Some(token)) = (access.cron_secret.as_deref(), bearer(headers)) {
        if !secret.is_empty() && secret_eq(secret, token) {
            return Ok(());
        }
    }
    warn!("rejected scheduler trigger");
    Err(DispatchError::Unauthorized)
}

/// Accept any configured operator token.
pub fn authorize_operator(headers: &HeaderMap, access: &AccessConfig) -> Result<(), DispatchError> {
    let Some(token) = bearer(headers) else {
        return Err(DispatchError::Unauthorized);
    };
    if access.operator_tokens.iter().any(|t| !t.is_empty() && secret_eq(t, token)) {
        Ok(())
    } else {
        warn!("rejected operator request");
        Err(DispatchError::Unauthorized)
    }
}
