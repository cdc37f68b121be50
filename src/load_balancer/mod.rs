// src/load_balancer/mod.rs
mod algorithm;
mod least_conn;

pub use algorithm::LoadBalancer; // trait
pub use least_conn::{select_least_loaded, LeastConnections};
