// src/load_balancer/least_conn.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Backend;

/// Pick the healthy backend with the fewest active connections.
///
/// Ties go to the backend registered first, so a fixed input always
/// yields the same answer.
pub fn select_least_loaded(backends: &[Backend]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;

    for (index, backend) in backends.iter().enumerate() {
        if !backend.is_healthy() {
            continue;
        }
        let load = backend.active_connections();
        match best {
            Some((_, best_load)) if best_load <= load => {}
            _ => best = Some((index, load)),
        }
    }

    best.map(|(index, _)| index)
}

#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn select(&self, backends: &[Backend]) -> Option<usize> {
        select_least_loaded(backends)
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}
