//! Pure shard-boundary arithmetic, isolated from all I/O so it can be
//! property-tested exhaustively. See `UpdaterConfig` for how `windowWidth`,
//! `shardWidth`, and `lookbackPeriod` are derived.

use crate::config::UpdaterConfig;
use crate::time::{floor_mod, UnixNanos};

/// Returns the `[start, end)` expiration window for `shardIdx` at `atTime`:
/// the leftmost repetition of that shard index overlapping
/// `[atTime - lookbackPeriod, atTime + lookforwardPeriod)`.
///
/// Pure function of `(config, atTime, shardIdx)`; bit-identical for
/// identical inputs regardless of process start time or call history.
pub fn shard_boundaries(
    config: &UpdaterConfig,
    at_time: UnixNanos,
    shard_idx: u64,
) -> (UnixNanos, UnixNanos) {
    let num_shards = config.num_shards;
    let shard_idx = shard_idx % num_shards;

    let window_width_ns = config.window_width().as_nanos() as i128;
    let shard_width_ns = config.shard_width().as_nanos() as i128;

    let at_time_offset = floor_mod(at_time.0, window_width_ns);
    let zero_start = at_time.0 - at_time_offset;

    let mut shard_start = zero_start + (shard_idx as i128) * shard_width_ns;
    let mut shard_end = shard_start + shard_width_ns;

    let live_window_start = at_time.checked_sub_duration(config.lookback_period()).0;
    if shard_end < live_window_start {
        shard_start += window_width_ns;
        shard_end += window_width_ns;
    }

    (UnixNanos(shard_start), UnixNanos(shard_end))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::UpdaterConfigParams;
    use pretty_assertions::assert_eq;
    use quickcheck::{Arbitrary, Gen, TestResult};
    use quickcheck_macros::quickcheck;
    use std::time::Duration;

    fn scenario_one_config() -> UpdaterConfig {
        UpdaterConfig::new(UpdaterConfigParams {
            num_shards: 10,
            cert_lifetime: Duration::from_secs(90 * 24 * 3600),
            update_period: Duration::from_secs(3600),
            update_offset: Duration::ZERO,
            max_parallelism: 8,
        })
        .unwrap()
    }

    #[test]
    fn scenario_two_boundary_for_shard_zero() {
        let cfg = scenario_one_config();
        let at_time = UnixNanos(1_704_067_200_000_000_000); // 2024-01-01T00:00:00Z
        let (start, end) = shard_boundaries(&cfg, at_time, 0);

        assert_eq!(
            (end.0 - start.0) as u128,
            cfg.shard_width().as_nanos()
        );

        let window_width = cfg.window_width().as_nanos() as i128;
        assert_eq!(floor_mod(start.0, window_width), 0);
    }

    #[test]
    fn scenario_three_single_shard_spans_whole_window() {
        let cfg = UpdaterConfig::new(UpdaterConfigParams {
            num_shards: 1,
            cert_lifetime: Duration::from_secs(90 * 24 * 3600),
            update_period: Duration::from_secs(3600),
            update_offset: Duration::ZERO,
            max_parallelism: 8,
        })
        .unwrap();
        let at_time = UnixNanos::now();
        let (start, end) = shard_boundaries(&cfg, at_time, 0);
        assert_eq!(
            (end.0 - start.0) as u128,
            cfg.window_width().as_nanos()
        );
    }

    #[derive(Debug, Clone, Copy)]
    struct SmallConfig {
        num_shards: u64,
        update_period_secs: u64,
        cert_lifetime_secs: u64,
    }

    impl Arbitrary for SmallConfig {
        fn arbitrary(g: &mut Gen) -> Self {
            let num_shards = 1 + (u64::arbitrary(g) % 50);
            let update_period_secs = 1 + (u64::arbitrary(g) % 3600);
            let cert_lifetime_secs = 1 + (u64::arbitrary(g) % (365 * 24 * 3600));
            SmallConfig {
                num_shards,
                update_period_secs,
                cert_lifetime_secs,
            }
        }
    }

    fn build(cfg: SmallConfig) -> Option<UpdaterConfig> {
        UpdaterConfig::new(UpdaterConfigParams {
            num_shards: cfg.num_shards,
            cert_lifetime: Duration::from_secs(cfg.cert_lifetime_secs),
            update_period: Duration::from_secs(cfg.update_period_secs),
            update_offset: Duration::ZERO,
            max_parallelism: 1,
        })
        .ok()
    }

    #[quickcheck]
    fn property_1_shard_width_exact(cfg: SmallConfig, at_time_secs: i64, shard_idx: u64) -> TestResult {
        let Some(cfg) = build(cfg) else {
            return TestResult::discard();
        };
        let at_time = UnixNanos(at_time_secs as i128 * 1_000_000_000);
        let (start, end) = shard_boundaries(&cfg, at_time, shard_idx);
        TestResult::from_bool((end.0 - start.0) as u128 == cfg.shard_width().as_nanos())
    }

    #[quickcheck]
    fn property_4_leftmost_selection(cfg: SmallConfig, at_time_secs: i64, shard_idx: u64) -> TestResult {
        let Some(cfg) = build(cfg) else {
            return TestResult::discard();
        };
        let at_time = UnixNanos(at_time_secs as i128 * 1_000_000_000);
        let (start, end) = shard_boundaries(&cfg, at_time, shard_idx);
        let live_window_start = at_time.checked_sub_duration(cfg.lookback_period()).0;

        if end.0 < live_window_start {
            return TestResult::failed();
        }
        let window_width = cfg.window_width().as_nanos() as i128;
        let prior_end = end.0 - window_width;
        TestResult::from_bool(start.0 <= live_window_start || prior_end <= live_window_start)
    }

    #[quickcheck]
    fn property_3_shard_stability_across_one_window_width(
        cfg: SmallConfig,
        at_time_secs: i64,
        shard_idx: u64,
    ) -> TestResult {
        let Some(cfg) = build(cfg) else {
            return TestResult::discard();
        };
        let window_width = cfg.window_width().as_nanos() as i128;
        let at_time = UnixNanos(at_time_secs as i128 * 1_000_000_000);
        let shifted = UnixNanos(at_time.0 + window_width);

        let a = shard_boundaries(&cfg, at_time, shard_idx);
        let b = shard_boundaries(&cfg, shifted, shard_idx);

        TestResult::from_bool(b.0 .0 - a.0 .0 == window_width && b.1 .0 - a.1 .0 == window_width)
    }

    #[quickcheck]
    fn property_2_window_coverage_is_contiguous(cfg: SmallConfig, at_time_secs: i64) -> TestResult {
        let Some(cfg) = build(cfg) else {
            return TestResult::discard();
        };
        let at_time = UnixNanos(at_time_secs as i128 * 1_000_000_000);
        let mut intervals: Vec<(i128, i128)> = (0..cfg.num_shards)
            .map(|idx| {
                let (s, e) = shard_boundaries(&cfg, at_time, idx);
                (s.0, e.0)
            })
            .collect();
        intervals.sort();

        for w in intervals.windows(2) {
            if w[0].1 != w[1].0 {
                return TestResult::failed();
            }
        }
        let span = intervals.last().unwrap().1 - intervals.first().unwrap().0;
        TestResult::from_bool(span as u128 == cfg.window_width().as_nanos())
    }
}
