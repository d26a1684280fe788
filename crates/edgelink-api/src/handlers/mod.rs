//! API handlers organized by domain.

pub mod basic;
pub mod commands;
pub mod discovery;

pub use crate::server::ServerState;

/// Header carrying the caller's correlation id.
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Correlation id of the request, or a fresh one.
pub(crate) fn correlation_id(headers: &axum::http::HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
