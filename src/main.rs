// src/main.rs
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use least_conn_lb::{
    config,
    health::HealthChecker,
    load_balancer::LeastConnections,
    proxy::{BackendRegistry, Proxy},
    server::{RequestHandler, ServerBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("least_conn_lb=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    let registry = Arc::new(BackendRegistry::load(
        &config.backends,
        config.health_check.assume_healthy_on_start,
    )?);

    // Start health checker
    let checker = Arc::new(HealthChecker::new(
        config.health_check.clone(),
        registry.clone(),
    )?);
    let prober = tokio::spawn(checker.clone().run());

    let proxy = Arc::new(Proxy::new(
        registry.clone(),
        Arc::new(LeastConnections::new()),
        &config.proxy,
    ));

    let addr: SocketAddr = ([0, 0, 0, 0], config.listen_port).into();
    info!("Load balancer is running on {}", addr);

    ServerBuilder::new(addr)
        .with_handler(RequestHandler::new(proxy.clone()))
        .with_shutdown(shutdown_signal())
        .serve()
        .await?;

    checker.shutdown();
    if let Err(e) = prober.await {
        warn!("Health checker task failed: {}", e);
    }

    info!(
        requests_served = proxy.requests_served(),
        "Load balancer stopped"
    );
    Ok(())
}

// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
