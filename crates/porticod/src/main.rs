//! Portico Gateway Daemon
//!
//! Usage:
//!   # Single embedded database
//!   porticod --database-url data/app.db
//!
//!   # sqld primary plus replicas
//!   porticod --sqld-url http://primary:8080 --sqld-url http://replica:8080
//!
//!   # Full configuration file
//!   porticod --config /etc/portico/gateway.json

mod cli;

use clap::Parser;
use cli::Cli;
use portico_server::GatewayServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            std::process::exit(1);
        }
    };

    print_banner(&config);

    let server = GatewayServer::new(config).await?;
    server
        .start_with_shutdown(async {
            wait_for_shutdown_signal().await;
            tracing::info!("Shutdown signal received, draining connections...");
        })
        .await?;

    tracing::info!("Goodbye!");
    Ok(())
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

fn print_banner(config: &portico_server::GatewayConfig) {
    let engines: Vec<String> = config
        .adapters
        .iter()
        .map(|a| a.kind().to_string())
        .collect();

    eprintln!(
        r#"
 ____            _   _
|  _ \ ___  _ __| |_(_) ___ ___
| |_) / _ \| '__| __| |/ __/ _ \
|  __/ (_) | |  | |_| | (_| (_) |
|_|   \___/|_|   \__|_|\___\___/

Multi-Backend Multi-Tenant Database Gateway

  Bind:      {}:{}
  Engines:   {}
  Tenancy:   {}
"#,
        config.bind_address,
        config.port,
        engines.join(", "),
        if config.tenancy.enabled {
            "enabled"
        } else {
            "disabled"
        },
    );
}
