//! The overall tick: iterates issuers serially, calling `tick_issuer` for
//! each. A per-issuer failure is logged at error severity but does not
//! stop processing of later issuers.

use std::time::Instant;

use crate::issuer::IssuerMap;
use crate::issuer_tick::tick_issuer;
use crate::metrics;
use crate::pipeline::ShardContext;
use crate::time::UnixNanos;

/// Runs one full tick: every issuer, every shard. Never returns an error
/// itself — per-issuer failures are logged and folded into the `"all"`
/// tick metric's result label, but do not abort the loop.
pub async fn tick(ctx: &ShardContext, issuers: &IssuerMap, at_time: UnixNanos) {
    let tick_start = Instant::now();
    let mut any_failed = false;

    for issuer in issuers.values() {
        let issuer_start = Instant::now();
        let result = tick_issuer(ctx, at_time, issuer).await;
        let elapsed = issuer_start.elapsed();
        let overall_label = format!("{} (Overall)", issuer.common_name);

        match result {
            Ok(()) => {
                metrics::record_tick_duration(&overall_label, "success", elapsed);
                metrics::record_secs_since_success(&issuer.common_name, 0.0);
            }
            Err(err) => {
                any_failed = true;
                metrics::record_tick_duration(&overall_label, "failed", elapsed);
                tracing::error!(
                    issuer = %issuer.common_name,
                    timestamp = %humantime::format_rfc3339_nanos(std::time::SystemTime::now()),
                    error = %err,
                    "issuer tick failed"
                );
            }
        }
    }

    let overall_result = if any_failed { "failed" } else { "success" };
    metrics::record_tick_duration("all", overall_result, tick_start.elapsed());
}
