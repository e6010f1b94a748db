//! Gateway server assembly.

use anyhow::Context;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::GatewayConfig;
use crate::http::{router, AppState};
use crate::pipeline::PipelineEngine;
use crate::registry::Registry;

/// The assembled gateway: registry, pipeline engine, HTTP listener.
///
/// The listener is bound in [`GatewayServer::new`] so callers (tests in
/// particular) can bind port 0 and read the real address before starting.
pub struct GatewayServer {
    listener: TcpListener,
    state: Arc<AppState>,
    idle_timeout: Duration,
}

impl GatewayServer {
    /// Validate configuration, connect the backends, and bind the listener.
    pub async fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let registry = Arc::new(Registry::from_config(&config).await?);
        let state = Arc::new(AppState {
            pipeline: PipelineEngine::new(registry),
            tenant_header: config.tenancy.header.clone(),
        });

        let addr = format!("{}:{}", config.bind_address, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(addr = %listener.local_addr()?, "gateway listening");

        Ok(Self {
            listener,
            state,
            idle_timeout: Duration::from_secs(config.session_idle_timeout_secs),
        })
    }

    /// The bound listener address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the process is killed.
    pub async fn start(self) -> anyhow::Result<()> {
        self.start_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then drain gracefully.
    pub async fn start_with_shutdown(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        spawn_idle_sweep(Arc::clone(&self.state), self.idle_timeout);

        axum::serve(self.listener, router(Arc::clone(&self.state)))
            .with_graceful_shutdown(shutdown)
            .await
            .context("gateway server failed")?;

        self.state.pipeline.registry().close().await;
        Ok(())
    }
}

/// Periodic reaper for idle sessions; liveness only, never correctness.
fn spawn_idle_sweep(state: Arc<AppState>, timeout: Duration) {
    let period = (timeout / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            state.pipeline.sessions().sweep_idle(timeout).await;
        }
    });
}
