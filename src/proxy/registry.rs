//
// src/proxy/registry.rs
//

use super::backend::{Backend, BackendStatus};
use crate::config::{BackendConfig, ConfigError};
use crate::load_balancer::LoadBalancer;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

/// Every backend plus its runtime state, behind a single lock.
///
/// One lock for the whole set (rather than one per backend) is what lets
/// selection and the following increment happen as a single step.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: Mutex<Vec<Backend>>,
}

impl BackendRegistry {
    /// Build the registry from ordered descriptors. Order is preserved and
    /// is the tie-break order for selection.
    pub fn load(descriptors: &[BackendConfig], assume_healthy: bool) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut backends = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            let name = descriptor.name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if !seen.insert(name.to_string()) {
                return Err(ConfigError::DuplicateName(name.to_string()));
            }
            let address = parse_address(name, &descriptor.url)?;
            backends.push(Backend::new(name, address, assume_healthy));
        }

        tracing::info!(
            backends = backends.len(),
            assume_healthy,
            "Backend registry loaded"
        );

        Ok(Self {
            backends: Mutex::new(backends),
        })
    }

    /// Run `f` with exclusive access to every backend.
    ///
    /// The lock is released on every exit from `f`, unwinding included. A
    /// panic inside `f` poisons the mutex; the poison is cleared here so the
    /// registry stays usable.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut [Backend]) -> R) -> R {
        let mut backends = self.backends.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut backends)
    }

    pub fn len(&self) -> usize {
        self.with_lock(|backends| backends.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Select a backend and count the new connection against it in one
    /// critical section. The returned guard gives the connection back when
    /// dropped.
    pub fn acquire(self: &Arc<Self>, balancer: &dyn LoadBalancer) -> Option<ConnectionGuard> {
        let (index, name, address, active) = self.with_lock(|backends| {
            let index = balancer.select(backends)?;
            let backend = &mut backends[index];
            let active = backend.increment_connections();
            Some((index, backend.name().to_string(), backend.address().clone(), active))
        })?;

        Some(ConnectionGuard {
            registry: Arc::clone(self),
            index,
            name,
            address,
            active_at_acquire: active,
        })
    }

    fn release(&self, index: usize) {
        let released = self.with_lock(|backends| {
            backends
                .get_mut(index)
                .map(Backend::decrement_connections)
                .unwrap_or(false)
        });
        if !released {
            tracing::error!(index, "Connection released with no matching acquire");
        }
    }

    /// Store a probe result. Returns the previous health flag, or `None` if
    /// the index is out of range.
    pub fn set_health(&self, index: usize, healthy: bool) -> Option<bool> {
        self.with_lock(|backends| {
            backends
                .get_mut(index)
                .map(|backend| backend.update_health(healthy))
        })
    }

    /// Index, name and address of every backend, in registration order.
    pub fn probe_targets(&self) -> Vec<(usize, String, Url)> {
        self.with_lock(|backends| {
            backends
                .iter()
                .enumerate()
                .map(|(i, b)| (i, b.name().to_string(), b.address().clone()))
                .collect()
        })
    }

    /// Consistent copy of every backend's state, taken under one lock.
    pub fn snapshot(&self) -> Vec<BackendStatus> {
        self.with_lock(|backends| backends.iter().map(Backend::status).collect())
    }

    pub fn status(&self, name: &str) -> Option<BackendStatus> {
        self.with_lock(|backends| {
            backends
                .iter()
                .find(|b| b.name() == name)
                .map(Backend::status)
        })
    }
}

fn parse_address(name: &str, raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidAddress {
        name: name.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "http" {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("query and fragment are not allowed".to_string()));
    }
    Ok(url)
}

/// One in-flight request's claim on a backend.
///
/// Dropping the guard decrements the backend's connection count, so the
/// decrement runs exactly once whether the request completes, fails, or is
/// cancelled mid-flight.
#[derive(Debug)]
pub struct ConnectionGuard {
    registry: Arc<BackendRegistry>,
    index: usize,
    name: String,
    address: Url,
    active_at_acquire: usize,
}

impl ConnectionGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    /// Active connections on the backend right after this one was counted.
    pub fn active_at_acquire(&self) -> usize {
        self.active_at_acquire
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.release(self.index);
    }
}
