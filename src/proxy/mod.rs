//
// src/proxy/mod.rs
//
mod backend;
mod proxy;
mod registry;

pub use backend::{Backend, BackendStatus};
pub use proxy::{strip_hop_by_hop, upstream_uri, Proxy, ProxyError};
pub use registry::{BackendRegistry, ConnectionGuard};
