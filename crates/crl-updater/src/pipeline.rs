//! Single-shard execution: storage authority stream → CA signer stream →
//! publisher stream, with a SHA-256/byte-count side channel for logging.

use std::time::Instant;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::boundary::shard_boundaries;
use crate::clients::{BoxStream, CaSignerClient, ClientError, PublisherClient, StorageAuthorityClient};
use crate::config::UpdaterConfig;
use crate::issuer::{Issuer, IssuerNameId};
use crate::metrics;
use crate::time::UnixNanos;
use crl_proto::{
    generate_crl_request, upload_crl_request, CrlChunk, CrlMetadata, GenerateCrlRequest,
    GetRevokedCertsRequest, RevokedCertificate, UploadCrlMetadata, UploadCrlRequest,
};

/// Bound on how many frames may be queued ahead of the receiving RPC, for
/// both the SA→CA and CA→publisher relays. Just enough to keep the sender
/// from blocking on every single frame without letting an unresponsive
/// receiver cause unbounded buffering.
const RELAY_CHANNEL_CAPACITY: usize = 16;

/// Identifies one shard's CRL production within one tick. `crl_number` is
/// the tick's `atTime` in nanoseconds, giving each tick's output a
/// monotonic, reproducible identifier.
#[derive(Debug, Clone, Copy)]
pub struct CrlId {
    pub issuer_name_id: IssuerNameId,
    pub crl_number: i64,
    pub shard_idx: u64,
}

impl std::fmt::Display for CrlId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "issuer={} crl={} shard={}",
            self.issuer_name_id, self.crl_number, self.shard_idx
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("connecting to storage authority for {crl_id}: {source}")]
    StorageAuthorityConnect {
        crl_id: CrlId,
        #[source]
        source: ClientError,
    },
    #[error("reading revoked certificate from storage authority for {crl_id}: {source}")]
    StorageAuthorityRead {
        crl_id: CrlId,
        #[source]
        source: ClientError,
    },
    #[error("opening CA signing stream for {crl_id}: {source}")]
    CaSignerConnect {
        crl_id: CrlId,
        #[source]
        source: ClientError,
    },
    #[error("receiving signed CRL chunk from CA signer for {crl_id}: {source}")]
    CaSignerRead {
        crl_id: CrlId,
        #[source]
        source: ClientError,
    },
    #[error("uploading CRL bytes for {crl_id}: {source}")]
    Publisher {
        crl_id: CrlId,
        #[source]
        source: ClientError,
    },
    #[error("cancelled while updating {crl_id}")]
    Cancelled { crl_id: CrlId },
}

impl ShardError {
    pub fn crl_id(&self) -> CrlId {
        match self {
            ShardError::StorageAuthorityConnect { crl_id, .. }
            | ShardError::StorageAuthorityRead { crl_id, .. }
            | ShardError::CaSignerConnect { crl_id, .. }
            | ShardError::CaSignerRead { crl_id, .. }
            | ShardError::Publisher { crl_id, .. }
            | ShardError::Cancelled { crl_id } => *crl_id,
        }
    }
}

/// Non-fatal outcome of a completed shard, used for the success log line
/// and for `Property 6` assertions in tests.
#[derive(Debug, Clone, Copy)]
pub struct ShardOutcome {
    pub byte_len: u64,
    pub sha256: [u8; 32],
}

/// Everything one shard pipeline needs, held as `Arc`s so a context can be
/// cheaply cloned into a spawned worker task: stragglers must be able to
/// keep running after `tick_issuer` has already returned the first error.
#[derive(Clone)]
pub struct ShardContext {
    pub config: std::sync::Arc<UpdaterConfig>,
    pub storage_authority: std::sync::Arc<dyn StorageAuthorityClient>,
    pub ca_signer: std::sync::Arc<dyn CaSignerClient>,
    pub publisher: std::sync::Arc<dyn PublisherClient>,
    pub cancellation: CancellationToken,
}

/// Runs one complete CRL production for one shard, then records the
/// `crl_updater_ticks`/`crl_updater_generated` metrics and (on success)
/// the structured success log line. `issuer` supplies both the wire
/// `IssuerNameID` and the common name used as the per-shard metric
/// label.
pub async fn tick_shard(
    ctx: &ShardContext,
    at_time: UnixNanos,
    issuer: &Issuer,
    shard_idx: u64,
) -> Result<ShardOutcome, ShardError> {
    let start = Instant::now();
    let result = tick_shard_inner(ctx, at_time, issuer.name_id, shard_idx).await;
    let elapsed = start.elapsed();

    match &result {
        Ok(outcome) => {
            let crl_id = CrlId {
                issuer_name_id: issuer.name_id,
                crl_number: at_time.as_i64(),
                shard_idx,
            };
            tracing::info!(
                %crl_id,
                byte_len = outcome.byte_len,
                sha256 = %hex::encode(outcome.sha256),
                "issued CRL shard"
            );
            metrics::record_tick_duration(&issuer.common_name, "success", elapsed);
            metrics::record_shard_generated("success");
        }
        Err(_) => {
            metrics::record_tick_duration(&issuer.common_name, "failed", elapsed);
            metrics::record_shard_generated("failed");
        }
    }

    result
}

/// The pipeline sequence proper, isolated from the metrics/logging
/// wrapper in [`tick_shard`] so the happy path and every early-return
/// error path are all measured uniformly.
async fn tick_shard_inner(
    ctx: &ShardContext,
    at_time: UnixNanos,
    issuer_name_id: IssuerNameId,
    shard_idx: u64,
) -> Result<ShardOutcome, ShardError> {
    let crl_id = CrlId {
        issuer_name_id,
        crl_number: at_time.as_i64(),
        shard_idx,
    };

    if ctx.cancellation.is_cancelled() {
        return Err(ShardError::Cancelled { crl_id });
    }

    let (expires_after, expires_before) = shard_boundaries(&ctx.config, at_time, shard_idx);

    let sa_req = GetRevokedCertsRequest {
        issuer_name_id: issuer_name_id.0,
        expires_after: expires_after.as_i64(),
        expires_before: expires_before.as_i64(),
        revoked_before: at_time.as_i64(),
    };
    let sa_stream = tokio::select! {
        biased;
        () = ctx.cancellation.cancelled() => return Err(ShardError::Cancelled { crl_id }),
        result = ctx.storage_authority.get_revoked_certs(sa_req) => {
            result.map_err(|source| ShardError::StorageAuthorityConnect { crl_id, source })?
        }
    };

    let ca_metadata = CrlMetadata {
        issuer_name_id: issuer_name_id.0,
        this_update: at_time.as_i64(),
        shard_idx: shard_idx as i64,
    };

    // The CA bidi-stream's response headers can resolve well before the
    // outbound entry stream is fully drained by the underlying transport,
    // so an SA read error can't be detected by checking a side channel
    // once `generate_crl` returns. Instead the forward loop is driven by
    // our own task, sending into a channel the CA is reading from, and
    // joined against the `generate_crl` call so both outcomes are known
    // at the same point before anything downstream is trusted.
    let (entry_tx, entry_rx) = mpsc::channel::<GenerateCrlRequest>(RELAY_CHANNEL_CAPACITY);
    let ca_outbound: BoxStream<GenerateCrlRequest> = Box::pin(ReceiverStream::new(entry_rx));
    let ca_call = ctx.ca_signer.generate_crl(ca_outbound);
    let forward = forward_sa_entries_to_ca(sa_stream, ca_metadata, entry_tx, &ctx.cancellation);

    let (ca_result, forward_result) = tokio::select! {
        biased;
        () = ctx.cancellation.cancelled() => return Err(ShardError::Cancelled { crl_id }),
        joined = futures::future::join(ca_call, forward) => joined,
    };
    let ca_stream = ca_result.map_err(|source| ShardError::CaSignerConnect { crl_id, source })?;
    match forward_result {
        Ok(()) => {}
        Err(ForwardFailure::Cancelled) => return Err(ShardError::Cancelled { crl_id }),
        Err(ForwardFailure::Read(source)) => {
            return Err(ShardError::StorageAuthorityRead { crl_id, source })
        }
    }

    let publisher_metadata = UploadCrlMetadata {
        issuer_name_id: issuer_name_id.0,
        number: at_time.as_i64(),
        shard_idx: shard_idx as i64,
    };

    let (hash, byte_len) = tokio::select! {
        biased;
        () = ctx.cancellation.cancelled() => return Err(ShardError::Cancelled { crl_id }),
        result = relay_to_publisher(publisher_metadata, ca_stream, ctx.publisher.as_ref(), crl_id, &ctx.cancellation) => result?,
    };

    Ok(ShardOutcome {
        byte_len,
        sha256: hash,
    })
}

/// Why the SA→CA forward loop in [`forward_sa_entries_to_ca`] stopped
/// before the SA stream ran out on its own.
enum ForwardFailure {
    Cancelled,
    Read(ClientError),
}

/// Sends one metadata frame, then forwards each SA entry to `tx` as it
/// arrives, stopping as soon as the SA stream errors (reported via the
/// return value, not a side channel) or `tx`'s receiver is gone (meaning
/// the CA side already ended the call). Never buffers more than one
/// entry at a time.
async fn forward_sa_entries_to_ca(
    mut sa_stream: crate::clients::TryBoxStream<RevokedCertificate>,
    metadata: CrlMetadata,
    tx: mpsc::Sender<GenerateCrlRequest>,
    cancellation: &CancellationToken,
) -> Result<(), ForwardFailure> {
    let metadata_frame = GenerateCrlRequest {
        body: Some(generate_crl_request::Body::Metadata(metadata)),
    };
    if tx.send(metadata_frame).await.is_err() {
        return Ok(());
    }

    loop {
        let next = tokio::select! {
            biased;
            () = cancellation.cancelled() => return Err(ForwardFailure::Cancelled),
            item = sa_stream.next() => item,
        };
        match next {
            Some(Ok(entry)) => {
                let frame = GenerateCrlRequest {
                    body: Some(generate_crl_request::Body::Entry(entry)),
                };
                let sent = tokio::select! {
                    biased;
                    () = cancellation.cancelled() => return Err(ForwardFailure::Cancelled),
                    result = tx.send(frame) => result,
                };
                if sent.is_err() {
                    return Ok(());
                }
            }
            Some(Err(source)) => return Err(ForwardFailure::Read(source)),
            None => return Ok(()),
        }
    }
}

/// Why the CA→publisher relay in [`relay_to_publisher`] stopped before
/// the CA stream ran out on its own.
enum RelayFailure {
    Cancelled,
    Read(ClientError),
}

/// Relays signed CRL chunks from the CA stream to the publisher as they
/// arrive, never buffering the whole CRL body in memory: the forwarding
/// loop sends into a channel the publisher is reading from concurrently,
/// joined against the `upload_crl` call so a CA read error is detected at
/// the same point as a publisher failure rather than racing it. Returns
/// the running SHA-256 hash and byte count accumulated along the way,
/// purely for the success log line — the publisher never sees the hash.
async fn relay_to_publisher(
    metadata: UploadCrlMetadata,
    mut ca_stream: crate::clients::TryBoxStream<CrlChunk>,
    publisher: &dyn PublisherClient,
    crl_id: CrlId,
    cancellation: &CancellationToken,
) -> Result<([u8; 32], u64), ShardError> {
    let (tx, rx) = mpsc::channel::<UploadCrlRequest>(RELAY_CHANNEL_CAPACITY);
    let outbound: BoxStream<UploadCrlRequest> = Box::pin(ReceiverStream::new(rx));

    let relay = async move {
        let mut hasher = Sha256::new();
        let mut byte_len = 0u64;

        let metadata_frame = UploadCrlRequest {
            body: Some(upload_crl_request::Body::Metadata(metadata)),
        };
        if tx.send(metadata_frame).await.is_err() {
            return Ok((hasher, byte_len));
        }

        loop {
            let next = tokio::select! {
                biased;
                () = cancellation.cancelled() => return Err(RelayFailure::Cancelled),
                item = ca_stream.next() => item,
            };
            match next {
                Some(Ok(chunk)) => {
                    hasher.update(&chunk.chunk);
                    byte_len += chunk.chunk.len() as u64;
                    let frame = UploadCrlRequest {
                        body: Some(upload_crl_request::Body::Chunk(chunk)),
                    };
                    let sent = tokio::select! {
                        biased;
                        () = cancellation.cancelled() => return Err(RelayFailure::Cancelled),
                        result = tx.send(frame) => result,
                    };
                    if sent.is_err() {
                        return Ok((hasher, byte_len));
                    }
                }
                Some(Err(source)) => return Err(RelayFailure::Read(source)),
                None => return Ok((hasher, byte_len)),
            }
        }
    };
    let upload = publisher.upload_crl(outbound);

    let (relay_result, upload_result) = futures::future::join(relay, upload).await;

    if let Err(RelayFailure::Cancelled) = relay_result {
        return Err(ShardError::Cancelled { crl_id });
    }
    upload_result.map_err(|source| ShardError::Publisher { crl_id, source })?;
    let (hasher, byte_len) = match relay_result {
        Ok(v) => v,
        Err(RelayFailure::Read(source)) => return Err(ShardError::CaSignerRead { crl_id, source }),
        Err(RelayFailure::Cancelled) => unreachable!("handled above"),
    };

    Ok((hasher.finalize().into(), byte_len))
}
