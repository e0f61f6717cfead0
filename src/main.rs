mod actuator;
mod broker;
mod command;
mod config;
mod credentials;
mod supervisor;
mod transport;

use actuator::{
    AnimationRunner, ConsoleSink, PatternController, PatternSink, RemoteActuator,
    RendererRegistry,
};
use anyhow::{Context, Result};
use broker::BrokerSession;
use clap::Parser;
use command::CommandExecutor;
use config::Cli;
use std::sync::Arc;
use std::time::Duration;
use supervisor::Supervisor;
use tokio_util::sync::CancellationToken;
use transport::MqttConnector;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    cli.validate().context("invalid configuration")?;
    let identity = cli.identity();

    info!("Edge device starting: {}", identity);
    info!(
        "  Bridge: {}:{} ({} tokens, {} min)",
        cli.mqtt_bridge_hostname,
        cli.mqtt_bridge_port,
        cli.algorithm,
        cli.token_validity_minutes()
    );
    info!("  Periodic publish: {}", cli.message_type);

    // Fail fast on a bad key rather than inside the reconnect loop
    let credentials = cli.credentials();
    credentials
        .refresh()
        .context("cannot issue a session token with the configured key")?;

    let shutdown = CancellationToken::new();

    let sink: Arc<dyn PatternSink> = match &cli.actuator_url {
        Some(url) => {
            info!("  Actuator: remote at {}", url);
            let remote = RemoteActuator::new(url.as_str(), &identity, Duration::from_secs(5))
                .context("failed to build actuator HTTP client")?;
            Arc::new(remote)
        }
        None => {
            let registry =
                RendererRegistry::builtin().context("built-in pattern table is invalid")?;
            info!(
                "  Actuator: local, {} pixels, {} patterns: {}",
                cli.pixel_count,
                registry.len(),
                registry.names().collect::<Vec<_>>().join(", ")
            );
            let strip = Arc::new(ConsoleSink::new(cli.pixel_count));
            let runner = AnimationRunner::new(strip, cli.runner_config(), shutdown.clone());
            Arc::new(PatternController::new(runner, registry, &identity))
        }
    };

    let connector = Arc::new(MqttConnector::new(cli.mqtt_config()));
    let session = BrokerSession::new(
        cli.session_config(),
        credentials,
        connector,
        shutdown.clone(),
    );
    let executor = CommandExecutor::new(sink);
    let supervisor = Supervisor::new(
        cli.supervisor_config(),
        session,
        executor,
        shutdown.clone(),
    );

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                ctrl_c.cancel();
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    let result = supervisor.run().await;
    if let Err(e) = &result {
        error!("Fatal: {:#}", e);
    }
    result
}
