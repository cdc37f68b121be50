// src/health/mod.rs
mod checker;

pub use checker::{probe_url, HealthCheckResult, HealthChecker};
