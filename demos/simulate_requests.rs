//! demos/simulate_requests.rs
//! Fires a burst of concurrent GETs at the balancer and logs where each one landed.
//! Run: cargo run --example simulate_requests -- [target_url] [count]

use hyper::{Body, Client, Uri};
use std::time::Instant;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("simulate_requests=info".parse()?),
        )
        .init();

    let target: Uri = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:8080/".into())
        .parse()?;
    let count: usize = std::env::args()
        .nth(2)
        .unwrap_or_else(|| "5".into())
        .parse()?;

    let client: Client<_, Body> = Client::new();
    let started = Instant::now();

    let requests = (0..count).map(|id| {
        let client = client.clone();
        let target = target.clone();
        async move {
            let response = match client.get(target).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(id, error = %e, "Request failed");
                    return None;
                }
            };
            let status = response.status();
            match hyper::body::to_bytes(response.into_body()).await {
                Ok(body) => {
                    info!(id, %status, body = %String::from_utf8_lossy(&body).trim_end(), "Response");
                }
                Err(e) => warn!(id, %status, error = %e, "Failed to read response body"),
            }
            Some(status)
        }
    });

    let results = futures::future::join_all(requests).await;

    let answered = results.iter().flatten().count();
    let succeeded = results.iter().flatten().filter(|s| s.is_success()).count();
    info!(
        sent = count,
        answered,
        succeeded,
        failed = count - succeeded,
        elapsed = ?started.elapsed(),
        "All requests completed"
    );
    Ok(())
}
