//! The run loop: waits for wall-clock alignment, then ticks every
//! `updatePeriod` until cancelled.

use std::sync::Arc;
use std::time::Duration;

use crate::issuer::IssuerMap;
use crate::pipeline::ShardContext;
use crate::tick::tick;
use crate::time::{floor_mod, UnixNanos};

pub struct Scheduler {
    ctx: ShardContext,
    issuers: Arc<IssuerMap>,
}

impl Scheduler {
    pub fn new(ctx: ShardContext, issuers: Arc<IssuerMap>) -> Self {
        Self { ctx, issuers }
    }

    /// Blocks until `ctx.cancellation` fires, running one full [`tick`] at
    /// the next wall-clock instant aligned to `updateOffset` and every
    /// `updatePeriod` after that.
    pub async fn run(&self) {
        let wait = self.initial_wait();
        tokio::select! {
            biased;
            () = self.ctx.cancellation.cancelled() => return,
            () = tokio::time::sleep(wait) => {}
        }

        // Anchored before the first tick runs, so a long first tick
        // doesn't push subsequent fires later than `updatePeriod`
        // multiples of the alignment instant.
        let mut ticker = tokio::time::interval(self.ctx.config.update_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick of a fresh interval always fires immediately

        loop {
            tick(&self.ctx, &self.issuers, UnixNanos::now()).await;

            tokio::select! {
                biased;
                () = self.ctx.cancellation.cancelled() => return,
                _ = ticker.tick() => {}
            }
        }
    }

    /// Computes the wait until the next wall-clock instant `T` satisfying
    /// `T mod updatePeriod == updateOffset`.
    fn initial_wait(&self) -> Duration {
        let now_ns = UnixNanos::now().0;
        let period_ns = self.ctx.config.update_period.as_nanos() as i128;
        let offset_ns = self.ctx.config.update_offset.as_nanos() as i128;

        let curr_offset = floor_mod(now_ns, period_ns);
        let wait_ns = if curr_offset <= offset_ns {
            offset_ns - curr_offset
        } else {
            period_ns - curr_offset + offset_ns
        };

        Duration::from_nanos(wait_ns as u64)
    }
}
