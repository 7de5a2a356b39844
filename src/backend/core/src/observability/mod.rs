//! Observability: structured logging and Prometheus metrics.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize logging and, when enabled, the Prometheus recorder.
///
/// `RUST_LOG` takes precedence over the configured level. Returns the handle
/// that renders `GET /metrics`.
pub fn init(config: &ObservabilityConfig) -> anyhow::Result<Option<PrometheusHandle>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    if config.json_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?;
    }

    if !config.metrics_enabled {
        return Ok(None);
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(Some(handle))
}

/// Register metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "agora_guard_decisions_total",
        "Authorization decisions by outcome"
    );
    describe_counter!(
        "agora_guard_cache_lookups_total",
        "Role cache lookups by result (hit, miss, corrupt, error)"
    );
    describe_histogram!(
        "agora_guard_decision_seconds",
        "Time spent deciding one authorization"
    );
    describe_histogram!(
        "agora_store_query_seconds",
        "Authorization store query latency"
    );
    describe_counter!("agora_errors_total", "Service errors by code and category");
    describe_counter!("auth_errors_total", "Rejected authentication attempts");
    describe_counter!("auth_success_total", "Accepted authentication attempts");
    describe_counter!("cache_hits_total", "Cache backend hits");
    describe_counter!("cache_misses_total", "Cache backend misses");
    describe_counter!("cache_sets_total", "Cache backend writes");
    describe_counter!("cache_deletes_total", "Cache backend deletions");
    describe_counter!("cache_evictions_total", "Entries evicted for capacity");
}
