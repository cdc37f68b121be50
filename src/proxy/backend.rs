// src/proxy/backend.rs
use chrono::{DateTime, Utc};
use url::Url;

/// One routable destination. Name and address are fixed at load time; the
/// runtime fields are only ever touched while the registry lock is held.
#[derive(Debug)]
pub struct Backend {
    name: String,
    address: Url,

    // Runtime state
    active_connections: usize,
    healthy: bool,
    last_probe: Option<DateTime<Utc>>,
}

impl Backend {
    pub fn new(name: impl Into<String>, address: Url, healthy: bool) -> Self {
        Self {
            name: name.into(),
            address,
            active_connections: 0,
            healthy,
            last_probe: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub fn last_probe(&self) -> Option<DateTime<Utc>> {
        self.last_probe
    }

    pub(crate) fn increment_connections(&mut self) -> usize {
        self.active_connections += 1;
        self.active_connections
    }

    /// Returns `false` when there was nothing to release.
    pub(crate) fn decrement_connections(&mut self) -> bool {
        match self.active_connections.checked_sub(1) {
            Some(n) => {
                self.active_connections = n;
                true
            }
            None => false,
        }
    }

    /// Record a probe outcome, returning the previous health flag.
    pub(crate) fn update_health(&mut self, healthy: bool) -> bool {
        let was_healthy = self.healthy;
        self.healthy = healthy;
        self.last_probe = Some(Utc::now());
        was_healthy
    }

    pub fn status(&self) -> BackendStatus {
        BackendStatus {
            name: self.name.clone(),
            address: self.address.clone(),
            active_connections: self.active_connections,
            healthy: self.healthy,
            last_probe: self.last_probe,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_connections(mut self, n: usize) -> Self {
        self.active_connections = n;
        self
    }
}

/// Owned copy of a backend's state, safe to hold outside the lock.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendStatus {
    pub name: String,
    pub address: Url,
    pub active_connections: usize,
    pub healthy: bool,
    pub last_probe: Option<DateTime<Utc>>,
}
