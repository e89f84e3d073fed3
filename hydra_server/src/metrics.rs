//! Prometheus metrics for the build-and-serve pipeline.

use metrics::{counter, gauge, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a submission state transition.
pub fn status_changed(status: &str) {
    counter!("hydra_submissions_total", "status" => status.to_string()).increment(1);
}

/// Record how long an external command ran.
pub fn command_duration(program: &str, duration_ms: u64) {
    histogram!("hydra_command_duration_ms", "program" => program.to_string())
        .record(duration_ms as f64);
}

/// Record a port allocation attempt.
pub fn port_allocation(outcome: &'static str) {
    counter!("hydra_port_allocations_total", "outcome" => outcome).increment(1);
}

/// Set current count of sites with a live listener.
pub fn active_sites(count: usize) {
    gauge!("hydra_active_sites").set(count as f64);
}

/// Record records reset by the startup sweep.
pub fn recovered(count: usize) {
    counter!("hydra_recovered_total").increment(count as u64);
}
