//! Metrics collection and exposition.
//!
//! # Metrics
//! - `pod_breaker_cuts_total` (counter): pods cut, by service and strategy
//! - `pod_breaker_reactivations_total` (counter): pods given traffic back
//! - `pod_breaker_pauses_total` (counter): pods parked
//! - `pod_breaker_kills_total` (counter): pods deleted
//! - `pod_breaker_gc_strips_total` (counter): bookkeeping stripped by the GC
//! - `pod_breaker_tick_errors_total` (counter): abandoned ticks, by component
//! - `pod_breaker_violators` (gauge): violators found by the last evaluation

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(
            address = %addr,
            error = %e,
            "Failed to install metrics exporter"
        ),
    }
}

pub fn record_cut(service: &str, strategy: &str) {
    counter!(
        "pod_breaker_cuts_total",
        "service" => service.to_string(),
        "strategy" => strategy.to_string()
    )
    .increment(1);
}

pub fn record_reactivation(service: &str, activator: &str) {
    counter!(
        "pod_breaker_reactivations_total",
        "service" => service.to_string(),
        "activator" => activator.to_string()
    )
    .increment(1);
}

pub fn record_pause(service: &str, activator: &str) {
    counter!(
        "pod_breaker_pauses_total",
        "service" => service.to_string(),
        "activator" => activator.to_string()
    )
    .increment(1);
}

pub fn record_kill(service: &str, activator: &str) {
    counter!(
        "pod_breaker_kills_total",
        "service" => service.to_string(),
        "activator" => activator.to_string()
    )
    .increment(1);
}

pub fn record_gc_strip(service: &str) {
    counter!("pod_breaker_gc_strips_total", "service" => service.to_string()).increment(1);
}

pub fn record_tick_error(service: &str, component: &'static str) {
    counter!(
        "pod_breaker_tick_errors_total",
        "service" => service.to_string(),
        "component" => component
    )
    .increment(1);
}

pub fn record_violators(service: &str, strategy: &str, count: usize) {
    gauge!(
        "pod_breaker_violators",
        "service" => service.to_string(),
        "strategy" => strategy.to_string()
    )
    .set(count as f64);
}
