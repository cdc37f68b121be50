// ────────────────────────────────
// src/proxy/proxy.rs
// Per-request dispatch: pick a backend, forward, relay, release.
// ────────────────────────────────

use super::registry::BackendRegistry;
use crate::config::ProxyConfig;
use crate::load_balancer::LoadBalancer;
use futures::StreamExt;
use hyper::client::HttpConnector;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Body, Client, Request, Response, StatusCode, Uri, Version};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn, Instrument};
use url::Url;
use uuid::Uuid;

pub struct Proxy {
    registry: Arc<BackendRegistry>,
    balancer: Arc<dyn LoadBalancer>,
    client: Client<HttpConnector, Body>,
    request_timeout: Duration,
    requests_served: AtomicU64,
}

impl Proxy {
    pub fn new(
        registry: Arc<BackendRegistry>,
        balancer: Arc<dyn LoadBalancer>,
        config: &ProxyConfig,
    ) -> Self {
        Self {
            registry,
            balancer,
            client: Client::builder().build_http(),
            request_timeout: config.request_timeout(),
            requests_served: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Requests that got a response back from some backend.
    pub fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    /// Route one inbound request. Failures are turned into 503/502
    /// responses here, so this never errors.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let span = tracing::info_span!(
            "request",
            id = %Uuid::new_v4(),
            method = %req.method(),
            path = %req.uri().path(),
        );

        match self.dispatch(req).instrument(span).await {
            Ok(response) => response,
            Err(err) => err.into(),
        }
    }

    async fn dispatch(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let guard = self
            .registry
            .acquire(self.balancer.as_ref())
            .ok_or(ProxyError::NoHealthyBackend)?;

        debug!(
            backend = guard.name(),
            strategy = self.balancer.name(),
            active_connections = guard.active_at_acquire(),
            "Redirecting request"
        );

        let (mut parts, body) = req.into_parts();
        parts.uri = upstream_uri(guard.address(), &parts.uri)?;
        parts.version = Version::HTTP_11;
        strip_hop_by_hop(&mut parts.headers);
        let outgoing = Request::from_parts(parts, body);

        let response = match timeout(self.request_timeout, self.client.request(outgoing)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(backend = guard.name(), error = %e, "Backend request failed");
                return Err(ProxyError::BackendUnreachable {
                    backend: guard.name().to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(backend = guard.name(), after = ?self.request_timeout, "Backend request timed out");
                return Err(ProxyError::Timeout {
                    backend: guard.name().to_string(),
                    after: self.request_timeout,
                });
            }
        };

        self.requests_served.fetch_add(1, Ordering::Relaxed);
        debug!(backend = guard.name(), status = %response.status(), "Relaying response");

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        // The guard rides along with the body: the connection is counted until
        // the body has been relayed in full, or dropped because the client left.
        let body = Body::wrap_stream(body.map(move |chunk| {
            let _held = &guard;
            chunk
        }));

        Ok(Response::from_parts(parts, body))
    }
}

/// `<backend address><original path>?<original query>`. A base path on the
/// backend address is kept as a prefix.
pub fn upstream_uri(base: &Url, original: &Uri) -> Result<Uri, ProxyError> {
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("{}{}", base.as_str().trim_end_matches('/'), path_and_query);

    target
        .parse::<Uri>()
        .map_err(|e| ProxyError::InvalidUpstreamUri(format!("{}: {}", target, e)))
}

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove headers that only describe the current connection, including
/// any header the `Connection` header itself names.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy backends available")]
    NoHealthyBackend,

    #[error("Backend {backend} unreachable: {reason}")]
    BackendUnreachable { backend: String, reason: String },

    #[error("Backend {backend} timed out after {after:?}")]
    Timeout { backend: String, after: Duration },

    #[error("Invalid upstream URI: {0}")]
    InvalidUpstreamUri(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoHealthyBackend => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BackendUnreachable { .. }
            | ProxyError::Timeout { .. }
            | ProxyError::InvalidUpstreamUri(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let message = match err {
            ProxyError::NoHealthyBackend => "All servers are unavailable\n",
            _ => "Error connecting to the server\n",
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = err.status();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_keeps_path_and_query() {
        let base = Url::parse("http://127.0.0.1:8081").unwrap();
        let original: Uri = "/users/7?expand=true".parse().unwrap();
        assert_eq!(
            upstream_uri(&base, &original).unwrap(),
            "http://127.0.0.1:8081/users/7?expand=true"
        );

        let original: Uri = "http://lb.local".parse().unwrap();
        assert_eq!(upstream_uri(&base, &original).unwrap(), "http://127.0.0.1:8081/");
    }

    #[test]
    fn upstream_prefixes_base_path() {
        let base = Url::parse("http://backend.local:9000/api/").unwrap();
        let original: Uri = "/v1/items".parse().unwrap();
        assert_eq!(
            upstream_uri(&base, &original).unwrap(),
            "http://backend.local:9000/api/v1/items"
        );
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-session-hint"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session-hint", HeaderValue::from_static("abc"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::HOST, HeaderValue::from_static("lb.local"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[header::HOST], "lb.local");
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn errors_map_to_gateway_statuses() {
        let unavailable: Response<Body> = ProxyError::NoHealthyBackend.into();
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);

        let unreachable: Response<Body> = ProxyError::BackendUnreachable {
            backend: "a".into(),
            reason: "connection refused".into(),
        }
        .into();
        assert_eq!(unreachable.status(), StatusCode::BAD_GATEWAY);

        let timed_out = ProxyError::Timeout {
            backend: "a".into(),
            after: Duration::from_secs(1),
        };
        assert_eq!(timed_out.status(), StatusCode::BAD_GATEWAY);
    }
}
