//! Validated configuration and derived scheduling parameters.

use std::time::Duration;

const SEVEN_DAYS: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("numShards must be at least 1")]
    NumShardsZero,
    #[error("certLifetime must be greater than zero")]
    CertLifetimeZero,
    #[error("updatePeriod ({0:?}) must be less than 168h")]
    UpdatePeriodTooLong(Duration),
    #[error("updateOffset ({offset:?}) must be less than updatePeriod ({period:?})")]
    UpdateOffsetOutOfRange { offset: Duration, period: Duration },
}

/// Raw, unvalidated inputs to [`UpdaterConfig::new`]. Mirrors the `Args`
/// struct's field set one-to-one, but lives in the library so it can be
/// constructed directly from tests without going through `clap`.
#[derive(Debug, Clone)]
pub struct UpdaterConfigParams {
    pub num_shards: u64,
    pub cert_lifetime: Duration,
    pub update_period: Duration,
    pub update_offset: Duration,
    /// Values `<= 0` are silently coerced to `1`; callers pass an `i64` so
    /// that a misconfigured negative flag doesn't panic on parse.
    pub max_parallelism: i64,
}

/// Immutable, validated configuration plus the parameters derived from it.
/// Constructed once via [`UpdaterConfig::new`] and never mutated afterward.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub num_shards: u64,
    pub cert_lifetime: Duration,
    pub update_period: Duration,
    pub update_offset: Duration,
    pub max_parallelism: u32,

    lookback_period: Duration,
    lookforward_period: Duration,
    window_width: Duration,
    shard_width: Duration,
}

impl UpdaterConfig {
    pub fn new(p: UpdaterConfigParams) -> Result<Self, ConfigError> {
        if p.num_shards == 0 {
            return Err(ConfigError::NumShardsZero);
        }
        if p.cert_lifetime.is_zero() {
            return Err(ConfigError::CertLifetimeZero);
        }
        if p.update_period >= SEVEN_DAYS {
            return Err(ConfigError::UpdatePeriodTooLong(p.update_period));
        }
        if p.update_offset >= p.update_period {
            return Err(ConfigError::UpdateOffsetOutOfRange {
                offset: p.update_offset,
                period: p.update_period,
            });
        }
        let max_parallelism = if p.max_parallelism <= 0 {
            1
        } else {
            p.max_parallelism as u32
        };

        let lookback_period = p.update_period * 4;

        let lookback_ns = lookback_period.as_nanos();
        let cert_lifetime_ns = p.cert_lifetime.as_nanos();
        let num_shards = p.num_shards as u128;

        let raw_lookforward_ns =
            cert_lifetime_ns + 4 * ((lookback_ns + cert_lifetime_ns) / num_shards);
        let raw_window_ns = lookback_ns + raw_lookforward_ns;
        let remainder = raw_window_ns % num_shards;
        let lookforward_ns = if remainder == 0 {
            raw_lookforward_ns
        } else {
            raw_lookforward_ns + (num_shards - remainder)
        };

        let lookforward_period = Duration::from_nanos(lookforward_ns as u64);
        let window_width = lookback_period + lookforward_period;
        let shard_width = Duration::from_nanos((window_width.as_nanos() / num_shards) as u64);

        Ok(UpdaterConfig {
            num_shards: p.num_shards,
            cert_lifetime: p.cert_lifetime,
            update_period: p.update_period,
            update_offset: p.update_offset,
            max_parallelism,
            lookback_period,
            lookforward_period,
            window_width,
            shard_width,
        })
    }

    pub fn lookback_period(&self) -> Duration {
        self.lookback_period
    }

    pub fn lookforward_period(&self) -> Duration {
        self.lookforward_period
    }

    pub fn window_width(&self) -> Duration {
        self.window_width
    }

    pub fn shard_width(&self) -> Duration {
        self.shard_width
    }
}
