//! demos/test_backend.rs
//! Stand-in backend for exercising the balancer by hand.
//! Run: cargo run --example test_backend -- <port> [name]
//! Set HEALTHY=false to make the liveness route fail.

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use rand::Rng;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;
use tracing::info;

#[derive(Clone)]
struct BackendState {
    name: String,
    req_counter: Arc<AtomicU64>,
    healthy: bool,
}

async fn handle(req: Request<Body>, state: BackendState) -> Result<Response<Body>, Infallible> {
    if req.method() == Method::GET && req.uri().path() == "/healthcheck" {
        info!(backend = %state.name, "HealthCheck request");
        let response = if state.healthy {
            Response::new(Body::from("HealthCheck OK"))
        } else {
            let mut response = Response::new(Body::from("Unhealthy"));
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            response
        };
        return Ok(response);
    }

    let n = state.req_counter.fetch_add(1, Ordering::SeqCst) + 1;
    info!(backend = %state.name, total = n, "Received a request");

    // Simulate variable processing time
    let delay = rand::thread_rng().gen_range(100..600);
    sleep(Duration::from_millis(delay)).await;

    Ok(Response::new(Body::from(format!(
        "Hello from {} (Processing time: {}ms)\n",
        state.name, delay
    ))))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("test_backend=info".parse()?),
        )
        .init();

    let port: u16 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "8081".into())
        .parse()?;
    let name = std::env::args()
        .nth(2)
        .unwrap_or_else(|| format!("backend-{port}"));
    let healthy = std::env::var("HEALTHY")
        .map(|v| v != "false")
        .unwrap_or(true);

    let state = BackendState {
        name: name.clone(),
        req_counter: Arc::new(AtomicU64::new(0)),
        healthy,
    };

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let make_svc = make_service_fn(move |_conn| {
        let st = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, st.clone()))) }
    });

    info!("{} is running on http://{} (healthy={})", name, addr, healthy);

    Server::try_bind(&addr)?.serve(make_svc).await?;
    Ok(())
}
