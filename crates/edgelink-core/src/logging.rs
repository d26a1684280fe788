//! Tracing subscriber bootstrap shared by binaries and embedders.

use tracing_subscriber::EnvFilter;

use crate::config::env_vars;

/// Returns true when JSON log output was requested through the environment.
pub fn json_requested() -> bool {
    std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false)
}

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` wins over `level` when set. Calling this twice is harmless; the
/// second installation attempt is ignored.
pub fn init(level: tracing::Level, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("edgelink={level}"))
            .add_directive(level.into())
    });

    let result = if json || json_requested() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
