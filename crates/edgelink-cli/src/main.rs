//! Command-line entry point of an EdgeLink device service.
//!
//! Runs the service runtime with the simulated driver, serving the REST API
//! on the configured host and port until interrupted.

mod simulator;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use edgelink_api::ServerState;
use edgelink_core::config::{defaults, env_vars, MessageBusType, MetadataType};
use edgelink_core::messaging::MemoryMessageBus;
use edgelink_core::{MessageBus, ServiceConfig};
use edgelink_devices::{DeviceService, InMemoryMetadata, MetadataClient};

use simulator::SimulatedDriver;

/// EdgeLink device service.
#[derive(Parser, Debug)]
#[command(name = "edgelink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform. Defaults to `run`.
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file.
    #[arg(short, long, global = true, env = env_vars::CONFIG_FILE, default_value = defaults::CONFIG_FILE)]
    config: PathBuf,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the device service.
    Run,
    /// Print the effective configuration, overrides applied.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    edgelink_core::logging::init(args.log_level, args.log_json);

    let config = ServiceConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn message_bus(config: &ServiceConfig) -> Result<Arc<dyn MessageBus>> {
    let section = &config.message_bus;
    match section.bus_type {
        MessageBusType::Memory => Ok(Arc::new(MemoryMessageBus::new())),
        MessageBusType::Mqtt => {
            let client_id = if section.client_id.is_empty() {
                config.service.name.as_str()
            } else {
                section.client_id.as_str()
            };
            info!(host = %section.host, port = section.port, client_id, "Connecting to MQTT broker");
            Ok(Arc::new(edgelink_core::messaging::MqttMessageBus::connect(
                client_id,
                &section.host,
                section.port,
            )))
        }
    }
}

fn metadata_client(config: &ServiceConfig) -> Result<Arc<dyn MetadataClient>> {
    match config.metadata.metadata_type {
        MetadataType::Memory => Ok(Arc::new(InMemoryMetadata::new())),
        MetadataType::Http => {
            let client = edgelink_devices::HttpMetadataClient::new(
                config.metadata.base_url.clone(),
                config.request_timeout()?,
            )?;
            Ok(Arc::new(client))
        }
    }
}

async fn run(config: ServiceConfig) -> Result<()> {
    let bind: SocketAddr = format!("{}:{}", bind_host(&config.service.host), config.service.port)
        .parse()
        .context("invalid service host or port")?;

    let service = Arc::new(DeviceService::new(
        config.clone(),
        Arc::new(SimulatedDriver::new()),
        message_bus(&config)?,
        metadata_client(&config)?,
    )?);
    service.start().await?;

    let shutdown = CancellationToken::new();
    let mut server = tokio::spawn(edgelink_api::run(
        ServerState::new(service.clone()),
        bind,
        shutdown.clone(),
    ));

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("Interrupt received, shutting down");
            shutdown.cancel();
            server.await
        }
        finished = &mut server => finished,
    };
    match finished {
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task panicked"),
        Ok(Ok(())) => {}
    }
    service.shutdown(false).await?;
    Ok(())
}

/// `localhost` is not a socket address; bind it on loopback.
fn bind_host(host: &str) -> &str {
    if host.eq_ignore_ascii_case("localhost") {
        "127.0.0.1"
    } else {
        host
    }
}
