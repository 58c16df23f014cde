//! Observability setup: structured logging and metrics (Prometheus).

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kestrel=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Initialize the Prometheus metrics exporter on `listen_addr`.
pub fn init_metrics(listen_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// Record one scatter operation (execute or stream) against the router.
pub fn record_scatter_metrics(op: &str, duration_us: u64, shard_count: usize, success: bool) {
    metrics::counter!("kestrel_scatter_total", "op" => op.to_string(), "success" => success.to_string()).increment(1);
    metrics::histogram!("kestrel_scatter_duration_us", "op" => op.to_string()).record(duration_us as f64);
    metrics::histogram!("kestrel_scatter_shard_count", "op" => op.to_string()).record(shard_count as f64);
}

/// Record one per-shard gateway call outcome.
pub fn record_shard_call(op: &str, success: bool) {
    metrics::counter!("kestrel_shard_calls_total", "op" => op.to_string(), "success" => success.to_string()).increment(1);
}

/// Record a transaction coordination action (commit, rollback, release,
/// prepare).
pub fn record_txn_metrics(action: &str, success: bool) {
    metrics::counter!("kestrel_txn_total", "action" => action.to_string(), "success" => success.to_string()).increment(1);
}

/// Record the number of rows buffered by one result accumulation.
pub fn record_rows_gathered(rows: usize) {
    metrics::histogram!("kestrel_rows_gathered").record(rows as f64);
}
