//! Metric emission and the `/metrics` scrape endpoint. Uses the `metrics`
//! facade crate, backed by `metrics-exporter-prometheus` at the binary
//! edge.

use metrics_exporter_prometheus::PrometheusBuilder;

/// Bucket boundaries (seconds) for `crl_updater_ticks`, as specified.
pub const TICK_HISTOGRAM_BUCKETS: &[f64] = &[
    0.01, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0,
];

/// Installs the global Prometheus recorder with the tick-histogram
/// buckets and returns an axum router serving `/metrics`. Must be called
/// at most once per process, before any `metrics::*!` call.
pub fn install_recorder_and_router() -> axum::Router<()> {
    let handle = PrometheusBuilder::new()
        .set_buckets(TICK_HISTOGRAM_BUCKETS)
        .expect("crl_updater_ticks buckets are a non-empty, finite, sorted slice")
        .install_recorder()
        .expect("failed to install prometheus recorder");

    axum::Router::new()
        .route("/metrics", axum::routing::get(prometheus_metrics))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(handle)
}

#[tracing::instrument(skip_all)]
async fn prometheus_metrics(
    axum::extract::State(handle): axum::extract::State<metrics_exporter_prometheus::PrometheusHandle>,
) -> String {
    handle.render()
}

/// Records one `crl_updater_ticks` observation. `issuer` is the issuer's
/// common name for per-shard and per-issuer observations (suffixed with
/// `" (Overall)"` for the latter by the caller), or `"all"` for the
/// whole-tick observation.
pub fn record_tick_duration(issuer: &str, result: &'static str, elapsed: std::time::Duration) {
    metrics::histogram!("crl_updater_ticks", "issuer" => issuer.to_owned(), "result" => result)
        .record(elapsed.as_secs_f64());
}

/// Increments `crl_updater_generated`, once per completed shard.
pub fn record_shard_generated(result: &'static str) {
    metrics::counter!("crl_updater_generated", "result" => result).increment(1);
}

/// Sets `crl_updater_secs_since_success` for `issuer`. This implementation
/// resets it to `0` immediately after a successful per-issuer tick and
/// otherwise leaves it alone, letting an external scrape derive staleness
/// from `time_since_scrape + gauge_value`.
pub fn record_secs_since_success(issuer: &str, value: f64) {
    metrics::gauge!("crl_updater_secs_since_success", "issuer" => issuer.to_owned()).set(value);
}
