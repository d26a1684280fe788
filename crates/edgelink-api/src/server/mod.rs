//! HTTP server for a device service.

pub mod router;
pub mod types;

pub use router::{create_router_with_state, API_BASE};
pub use types::{ServerState, MAX_REQUEST_BODY_SIZE};

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Serves the API on `bind` until `shutdown` fires.
pub async fn run(
    state: ServerState,
    bind: SocketAddr,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, create_router_with_state(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("HTTP server stopped");
    Ok(())
}
