// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::proxy::BackendRegistry;
use anyhow::{ensure, Context, Result};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

/// Background liveness prober. Only ever writes health flags, never
/// connection counts.
pub struct HealthChecker {
    config: HealthCheckConfig,
    registry: Arc<BackendRegistry>,
    client: Client,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub backend: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig, registry: Arc<BackendRegistry>) -> Result<Self> {
        ensure!(config.interval_secs > 0, "health check interval must be greater than zero");
        ensure!(config.timeout_secs > 0, "health check timeout must be greater than zero");

        let client = Client::builder()
            .timeout(config.timeout())
            .no_proxy()
            .build()
            .context("Failed to create health check HTTP client")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            registry,
            client,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Probe on every tick until `shutdown` is called. The first tick fires
    /// immediately.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            interval = ?self.config.interval(),
            path = %self.config.path,
            "Starting health checker"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One sweep: probe every backend concurrently and record each result
    /// as it arrives. No lock is held while a probe is in flight.
    pub async fn check_all(&self) -> Vec<HealthCheckResult> {
        let probes = self
            .registry
            .probe_targets()
            .into_iter()
            .map(|(index, name, address)| self.check_backend(index, name, address));

        let results = futures::future::join_all(probes).await;

        let healthy_count = results.iter().filter(|r| r.healthy).count();
        debug!(
            healthy = healthy_count,
            unhealthy = results.len() - healthy_count,
            "Health check complete"
        );

        results
    }

    async fn check_backend(&self, index: usize, name: String, address: Url) -> HealthCheckResult {
        let start = std::time::Instant::now();

        let outcome = match probe_url(&address, &self.config.path) {
            Ok(url) => {
                match timeout(self.config.timeout(), self.client.get(url).send()).await {
                    Ok(Ok(response)) if response.status() == StatusCode::OK => Ok(()),
                    Ok(Ok(response)) => Err(format!("HTTP {}", response.status())),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err("probe timed out".to_string()),
                }
            }
            Err(e) => Err(e.to_string()),
        };

        let response_time_ms = start.elapsed().as_millis() as u64;
        let healthy = outcome.is_ok();
        let was_healthy = self.registry.set_health(index, healthy);

        // at most one line per backend per sweep
        match (&outcome, was_healthy) {
            (Ok(()), Some(false)) => {
                info!(backend = %name, response_time_ms, "Backend is healthy again")
            }
            (Ok(()), _) => debug!(backend = %name, response_time_ms, "Health check passed"),
            (Err(reason), Some(true)) => {
                warn!(backend = %name, %reason, response_time_ms, "Backend marked unhealthy")
            }
            (Err(reason), _) => warn!(backend = %name, %reason, response_time_ms, "Health check failed"),
        }

        HealthCheckResult {
            backend: name,
            healthy,
            response_time_ms,
            error: outcome.err(),
        }
    }
}

/// `<backend address><path>`, keeping any base path on the address.
pub fn probe_url(address: &Url, path: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{}{}", address.as_str().trim_end_matches('/'), path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            interval_secs: 1,
            timeout_secs: 1,
            ..HealthCheckConfig::default()
        }
    }

    fn registry(urls: &[(&str, String)]) -> Arc<BackendRegistry> {
        let descriptors: Vec<_> = urls
            .iter()
            .map(|(name, url)| BackendConfig::new(*name, url.clone()))
            .collect();
        Arc::new(BackendRegistry::load(&descriptors, true).unwrap())
    }

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}", port)
    }

    #[test]
    fn probe_url_appends_path() {
        let base = Url::parse("http://127.0.0.1:8081").unwrap();
        assert_eq!(
            probe_url(&base, "/healthcheck").unwrap().as_str(),
            "http://127.0.0.1:8081/healthcheck"
        );
        let base = Url::parse("http://127.0.0.1:8081/svc/").unwrap();
        assert_eq!(
            probe_url(&base, "/healthcheck").unwrap().as_str(),
            "http://127.0.0.1:8081/svc/healthcheck"
        );
    }

    #[tokio::test]
    async fn failing_probe_marks_only_that_backend_unhealthy() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/healthcheck")
            .with_status(200)
            .with_body("HealthCheck OK")
            .create_async()
            .await;

        let registry = registry(&[("up", server.url()), ("down", closed_port_url())]);
        let checker = HealthChecker::new(config(), registry.clone()).unwrap();

        let results = checker.check_all().await;
        ok.assert_async().await;

        assert_eq!(results.len(), 2);
        assert!(results[0].healthy);
        assert!(!results[1].healthy);
        assert!(results[1].error.is_some());
        // bounded by the 1s probe timeout
        assert!(results.iter().all(|r| r.response_time_ms < 2_000));

        let snapshot = registry.snapshot();
        assert!(snapshot[0].healthy);
        assert!(!snapshot[1].healthy);
        assert!(snapshot.iter().all(|s| s.last_probe.is_some()));
    }

    #[tokio::test]
    async fn non_200_status_counts_as_failure() {
        let mut server = mockito::Server::new_async().await;
        let _no_content = server
            .mock("GET", "/healthcheck")
            .with_status(204)
            .create_async()
            .await;

        let registry = registry(&[("a", server.url())]);
        let checker = HealthChecker::new(config(), registry.clone()).unwrap();
        let results = checker.check_all().await;

        assert_eq!(results[0].error.as_deref(), Some("HTTP 204 No Content"));
        assert!(!registry.snapshot()[0].healthy);
    }

    #[tokio::test]
    async fn backend_recovers_after_a_later_success() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/healthcheck")
            .with_status(500)
            .create_async()
            .await;

        let registry = registry(&[("a", server.url())]);
        let checker = HealthChecker::new(config(), registry.clone()).unwrap();

        checker.check_all().await;
        assert!(!registry.snapshot()[0].healthy);

        failing.remove_async().await;
        let _ok = server
            .mock("GET", "/healthcheck")
            .with_status(200)
            .create_async()
            .await;

        checker.check_all().await;
        assert!(registry.snapshot()[0].healthy);
    }

    #[tokio::test]
    async fn probing_leaves_connection_counts_alone() {
        let registry = registry(&[("a", closed_port_url())]);
        let guard = registry
            .acquire(&crate::load_balancer::LeastConnections)
            .unwrap();

        let checker = HealthChecker::new(config(), registry.clone()).unwrap();
        checker.check_all().await;

        let status = registry.status("a").unwrap();
        assert!(!status.healthy);
        assert_eq!(status.active_connections, 1);
        drop(guard);
    }

    #[test]
    fn zero_interval_or_timeout_is_rejected() {
        let registry = registry(&[("a", "http://127.0.0.1:9".to_string())]);

        let zero_interval = HealthCheckConfig {
            interval_secs: 0,
            ..config()
        };
        assert!(HealthChecker::new(zero_interval, registry.clone()).is_err());

        let zero_timeout = HealthCheckConfig {
            timeout_secs: 0,
            ..config()
        };
        assert!(HealthChecker::new(zero_timeout, registry).is_err());
    }

    #[tokio::test]
    async fn run_marks_failing_backend_unhealthy_on_its_own() {
        let mut server = mockito::Server::new_async().await;
        let _failing = server
            .mock("GET", "/healthcheck")
            .with_status(500)
            .create_async()
            .await;

        let registry = registry(&[("a", server.url())]);
        assert!(registry.snapshot()[0].healthy);
        let checker = Arc::new(HealthChecker::new(config(), registry.clone()).unwrap());
        let task = tokio::spawn(checker.clone().run());

        let mut flipped = false;
        for _ in 0..300 {
            if !registry.snapshot()[0].healthy {
                flipped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(flipped, "run() never recorded the failing check");

        checker.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("health checker did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let registry = registry(&[("a", closed_port_url())]);
        let checker = Arc::new(HealthChecker::new(config(), registry).unwrap());

        let task = tokio::spawn(checker.clone().run());
        checker.shutdown();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("health checker did not stop")
            .unwrap();
    }
}
