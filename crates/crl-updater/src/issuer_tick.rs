//! Fans all `numShards` shards of one issuer out across a bounded worker
//! pool, joins results, and fails fast on the first error while letting
//! stragglers run to completion.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::issuer::Issuer;
use crate::pipeline::{tick_shard, ShardContext, ShardError};
use crate::time::UnixNanos;

#[derive(Debug, thiserror::Error)]
#[error("updating shard {shard_idx}: {source}")]
pub struct IssuerTickError {
    pub shard_idx: u64,
    #[source]
    pub source: ShardError,
}

/// Runs all `numShards` shards for one issuer with at most
/// `config.max_parallelism` concurrent shard pipelines.
///
/// `maxParallelism` worker tasks pull indices from a shared input queue
/// pre-filled with `0..numShards` and then closed; the coordinator reads
/// exactly `numShards` results and returns on the first failure. Workers
/// are spawned as independent tokio tasks (mirroring
/// `automations::server::serve`'s per-task `tokio::spawn`) so that a
/// straggler keeps running to completion even after this function has
/// already returned the first error to its caller.
pub async fn tick_issuer(
    ctx: &ShardContext,
    at_time: UnixNanos,
    issuer: &Issuer,
) -> Result<(), IssuerTickError> {
    let num_shards = ctx.config.num_shards;
    let parallelism = (ctx.config.max_parallelism as u64).min(num_shards.max(1)) as usize;

    // `tokio::sync::mpsc::Receiver` has a single consumer; sharing it
    // across worker tasks goes through an `Arc<Mutex<_>>`, the standard
    // multi-consumer adaptation for an otherwise SPSC/MPSC channel.
    let (idx_tx, idx_rx) = mpsc::channel::<u64>(num_shards.max(1) as usize);
    for idx in 0..num_shards {
        // Capacity equals `num_shards`, so this can never block.
        idx_tx.try_send(idx).expect("input channel sized to num_shards");
    }
    drop(idx_tx);
    let idx_rx = Arc::new(Mutex::new(idx_rx));

    let (result_tx, mut result_rx) = mpsc::channel::<(u64, Result<(), ShardError>)>(num_shards.max(1) as usize);

    for _ in 0..parallelism {
        let idx_rx = idx_rx.clone();
        let result_tx = result_tx.clone();
        let ctx = ctx.clone();
        let issuer = issuer.clone();

        tokio::spawn(async move {
            loop {
                if ctx.cancellation.is_cancelled() {
                    return;
                }
                let idx = {
                    let mut rx = idx_rx.lock().await;
                    match rx.recv().await {
                        Some(idx) => idx,
                        None => return,
                    }
                };

                let result = tick_shard(&ctx, at_time, &issuer, idx)
                    .await
                    .map(|_outcome| ());
                if result_tx.send((idx, result)).await.is_err() {
                    return;
                }
            }
        });
    }
    drop(result_tx);

    let mut remaining = num_shards;
    let mut first_error = None;
    while remaining > 0 {
        match result_rx.recv().await {
            Some((idx, Err(source))) => {
                remaining -= 1;
                if first_error.is_none() {
                    first_error = Some(IssuerTickError { shard_idx: idx, source });
                }
            }
            Some((_, Ok(()))) => {
                remaining -= 1;
            }
            None => break,
        }
        if let Some(err) = first_error {
            // Leave any not-yet-finished workers running; they were
            // `tokio::spawn`ed and outlive this function returning.
            return Err(err);
        }
    }

    Ok(())
}
