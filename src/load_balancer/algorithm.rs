// src/load_balancer/algorithm.rs
use crate::proxy::Backend;

/// A routing policy. Implementations only read the slice they are handed;
/// the caller holds the registry lock for the whole decision.
pub trait LoadBalancer: Send + Sync {
    /// Index of the backend to route to, or `None` if nothing is eligible.
    fn select(&self, backends: &[Backend]) -> Option<usize>;

    fn name(&self) -> &'static str;
}
