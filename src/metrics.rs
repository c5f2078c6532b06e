// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use std::time::Duration;

/// Initializes the descriptions for all the metrics in the SDK.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_counter!(
        "price_source_fetches_total",
        Unit::Count,
        "Upstream price source fetches, labeled by source and outcome (ok, error)."
    );
    describe_histogram!(
        "price_source_fetch_seconds",
        "Latency of one upstream price source fetch, including timeouts."
    );
    describe_gauge!("aggregated_prices", "Tokens priced by the last aggregation.");
    describe_gauge!("unresolved_mirrors", "MIRROR tokens left unresolved by the last aggregation.");

    describe_gauge!("liquidity_graph_tokens", "Tokens in the current liquidity graph snapshot.");
    describe_gauge!("liquidity_graph_edges", "Edges in the current liquidity graph snapshot.");
    describe_counter!(
        "liquidity_graph_excluded_edges_total",
        Unit::Count,
        "Pools excluded from the liquidity graph, labeled by reason (zero_reserve, stale)."
    );
    describe_counter!(
        "graph_resolutions_total",
        Unit::Count,
        "Multi-hop price resolutions, labeled by outcome (ok, not_found)."
    );

    describe_gauge!("lp_dependency_levels", "Distinct dependency levels among POOL tokens.");
    describe_gauge!("lp_dependency_cyclic", "POOL tokens on a dependency cycle.");
    describe_histogram!("lp_batch_duration_seconds", "Duration of one level-ordered LP batch.");
    describe_gauge!("lp_batch_valued", "POOL tokens valued by the last LP batch.");
    describe_gauge!("lp_batch_failed", "POOL tokens that could not be valued in the last LP batch.");
    describe_counter!(
        "pricing_failures_total",
        Unit::Count,
        "Per-token pricing failures, labeled by error kind."
    );
    describe_counter!(
        "lp_quote_fallbacks_total",
        Unit::Count,
        "LP valuations that fell back from a redemption quote to the reserve ratio."
    );
    describe_counter!(
        "lp_method_divergence_alerts_total",
        Unit::Count,
        "LP valuations whose methods disagreed beyond the configured threshold."
    );
    describe_histogram!("pricing_cycle_duration_seconds", "Duration of one full pricing cycle.");
}

/// Installs the Prometheus exporter on `0.0.0.0:port`. Requires a running tokio runtime.
#[cfg(feature = "observability")]
pub fn install_prometheus_exporter(port: u16) -> anyhow::Result<()> {
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus exporter: {}", e))?;
    describe_metrics();
    Ok(())
}

// --- Helper functions to update metrics ---

pub fn record_source_fetch(source: &str, ok: bool, duration: Duration) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("price_source_fetches_total", 1, "source" => source.to_string(), "outcome" => outcome);
    histogram!("price_source_fetch_seconds", duration.as_secs_f64(), "source" => source.to_string());
}

pub fn set_aggregation_result(priced: usize, unresolved_mirrors: usize) {
    gauge!("aggregated_prices", priced as f64);
    gauge!("unresolved_mirrors", unresolved_mirrors as f64);
}

pub fn set_graph_size(tokens: usize, edges: usize) {
    gauge!("liquidity_graph_tokens", tokens as f64);
    gauge!("liquidity_graph_edges", edges as f64);
}

pub fn increment_excluded_edges(reason: &'static str, count: usize) {
    counter!("liquidity_graph_excluded_edges_total", count as u64, "reason" => reason);
}

pub fn increment_graph_resolutions(found: bool) {
    let outcome = if found { "ok" } else { "not_found" };
    counter!("graph_resolutions_total", 1, "outcome" => outcome);
}

pub fn set_dependency_stats(levels: usize, cyclic: usize) {
    gauge!("lp_dependency_levels", levels as f64);
    gauge!("lp_dependency_cyclic", cyclic as f64);
}

pub fn record_lp_batch(duration: Duration, valued: usize, failed: usize) {
    histogram!("lp_batch_duration_seconds", duration.as_secs_f64());
    gauge!("lp_batch_valued", valued as f64);
    gauge!("lp_batch_failed", failed as f64);
}

pub fn increment_pricing_failures(kind: &'static str) {
    counter!("pricing_failures_total", 1, "kind" => kind);
}

pub fn increment_quote_fallbacks() {
    counter!("lp_quote_fallbacks_total", 1);
}

pub fn increment_divergence_alerts() {
    counter!("lp_method_divergence_alerts_total", 1);
}

pub fn record_cycle_duration(duration: Duration) {
    histogram!("pricing_cycle_duration_seconds", duration.as_secs_f64());
}
