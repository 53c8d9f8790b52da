//! Metrics collection and exposition.
//!
//! # Metrics
//! - `catalog_config_builds_total` (counter): configurations built
//! - `catalog_frontends` (gauge): frontends in the last build
//! - `catalog_backends` (gauge): backends in the last build
//! - `catalog_watched_services` (gauge): services with an active watch
//! - `catalog_rule_fallbacks_total` (counter): rule render failures
//! - `catalog_registry_errors_total` (counter): registry errors by kind
//! - `catalog_config_publishes_total` (counter): configurations handed to the proxy

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_config_build(frontends: usize, backends: usize) {
    counter!("catalog_config_builds_total").increment(1);
    gauge!("catalog_frontends").set(frontends as f64);
    gauge!("catalog_backends").set(backends as f64);
}

pub fn record_watched_services(count: usize) {
    gauge!("catalog_watched_services").set(count as f64);
}

pub fn record_rule_fallback() {
    counter!("catalog_rule_fallbacks_total").increment(1);
}

pub fn record_registry_error(kind: &'static str) {
    counter!("catalog_registry_errors_total", "kind" => kind).increment(1);
}

pub fn record_publish() {
    counter!("catalog_config_publishes_total").increment(1);
}
