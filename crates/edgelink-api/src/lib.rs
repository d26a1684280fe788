//! HTTP surface of an EdgeLink device service.
//!
//! Routes live under `/api/v3`: device commands, discovery, profile scan and
//! the common ping/version/config/metrics endpoints. Errors are returned as
//! [`models::ErrorResponse`] bodies whose status follows the error kind.

pub mod handlers;
pub mod models;
pub mod server;

pub use models::{ApiResult, ErrorResponse};
pub use server::{create_router_with_state, run, ServerState, API_BASE};
