//! Abstractions over the three external gRPC services. Production code
//! talks to real `tonic` channels; tests substitute `#[cfg(test)]` fakes,
//! mirroring the `BuildsRootService` trait + `MockSuccess`/`MockFailures`
//! pattern used elsewhere in this codebase for external collaborators that
//! are awkward to stand up as a full in-process server.

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use url::Url;

use crl_proto::{
    ca_signer_client::CaSignerClient as GrpcCaSignerClient,
    publisher_client::PublisherClient as GrpcPublisherClient,
    storage_authority_client::StorageAuthorityClient as GrpcStorageAuthorityClient,
    CrlChunk, GenerateCrlRequest, GetRevokedCertsRequest, RevokedCertificate, UploadCrlRequest,
    UploadCrlResponse,
};

/// Channel connect timeout for all three external services.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connecting to {service}: {source}")]
    Connect {
        service: &'static str,
        #[source]
        source: tonic::transport::Error,
    },
    #[error(transparent)]
    Grpc(#[from] tonic::Status),
}

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;
pub type TryBoxStream<T> = Pin<Box<dyn Stream<Item = Result<T, ClientError>> + Send + 'static>>;

#[async_trait::async_trait]
pub trait StorageAuthorityClient: Send + Sync {
    async fn get_revoked_certs(
        &self,
        req: GetRevokedCertsRequest,
    ) -> Result<TryBoxStream<RevokedCertificate>, ClientError>;
}

#[async_trait::async_trait]
pub trait CaSignerClient: Send + Sync {
    /// `requests` carries exactly one metadata frame followed by zero or
    /// more entry frames; it ends (half-closes) when the stream is
    /// exhausted, which the relay loop in `pipeline` arranges for by
    /// stopping the stream on the first forwarding error.
    async fn generate_crl(
        &self,
        requests: BoxStream<GenerateCrlRequest>,
    ) -> Result<TryBoxStream<CrlChunk>, ClientError>;
}

#[async_trait::async_trait]
pub trait PublisherClient: Send + Sync {
    async fn upload_crl(
        &self,
        requests: BoxStream<UploadCrlRequest>,
    ) -> Result<UploadCrlResponse, ClientError>;
}

async fn connect(service: &'static str, addr: &Url) -> Result<tonic::transport::Channel, ClientError> {
    tonic::transport::Channel::from_shared(addr.to_string())
        .expect("URL was already validated by clap's `Url` parser")
        .connect_timeout(CONNECT_TIMEOUT)
        .connect()
        .await
        .map_err(|source| ClientError::Connect { service, source })
}

pub struct GrpcStorageAuthority {
    inner: GrpcStorageAuthorityClient<tonic::transport::Channel>,
}

impl GrpcStorageAuthority {
    pub async fn connect(addr: &Url) -> Result<Self, ClientError> {
        let channel = connect("storage authority", addr).await?;
        Ok(Self {
            inner: GrpcStorageAuthorityClient::new(channel),
        })
    }
}

#[async_trait::async_trait]
impl StorageAuthorityClient for GrpcStorageAuthority {
    async fn get_revoked_certs(
        &self,
        req: GetRevokedCertsRequest,
    ) -> Result<TryBoxStream<RevokedCertificate>, ClientError> {
        let mut client = self.inner.clone();
        let stream = client.get_revoked_certs(req).await?.into_inner();
        Ok(Box::pin(futures::StreamExt::map(stream, |item| {
            item.map_err(ClientError::from)
        })))
    }
}

pub struct GrpcCaSigner {
    inner: GrpcCaSignerClient<tonic::transport::Channel>,
}

impl GrpcCaSigner {
    pub async fn connect(addr: &Url) -> Result<Self, ClientError> {
        let channel = connect("CA signer", addr).await?;
        Ok(Self {
            inner: GrpcCaSignerClient::new(channel),
        })
    }
}

#[async_trait::async_trait]
impl CaSignerClient for GrpcCaSigner {
    async fn generate_crl(
        &self,
        requests: BoxStream<GenerateCrlRequest>,
    ) -> Result<TryBoxStream<CrlChunk>, ClientError> {
        let mut client = self.inner.clone();
        let stream = client.generate_crl(requests).await?.into_inner();
        Ok(Box::pin(futures::StreamExt::map(stream, |item| {
            item.map_err(ClientError::from)
        })))
    }
}

pub struct GrpcPublisher {
    inner: GrpcPublisherClient<tonic::transport::Channel>,
}

impl GrpcPublisher {
    pub async fn connect(addr: &Url) -> Result<Self, ClientError> {
        let channel = connect("publisher", addr).await?;
        Ok(Self {
            inner: GrpcPublisherClient::new(channel),
        })
    }
}

#[async_trait::async_trait]
impl PublisherClient for GrpcPublisher {
    async fn upload_crl(
        &self,
        requests: BoxStream<UploadCrlRequest>,
    ) -> Result<UploadCrlResponse, ClientError> {
        let mut client = self.inner.clone();
        Ok(client.upload_crl(requests).await?.into_inner())
    }
}

#[cfg(test)]
pub mod fake {
    //! In-memory stand-ins for the three services, driven entirely by
    //! channels so tests can observe ordering, counts, and timing without
    //! a real network stack.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Records how many `generate_crl` calls are concurrently open, so
    /// tests can assert the issuer tick never exceeds `maxParallelism`.
    #[derive(Clone, Default)]
    pub struct Concurrency {
        current: Arc<AtomicUsize>,
        pub max_observed: Arc<AtomicUsize>,
    }

    impl Concurrency {
        pub fn enter(&self) -> ConcurrencyGuard {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(now, Ordering::SeqCst);
            ConcurrencyGuard {
                current: self.current.clone(),
            }
        }
    }

    pub struct ConcurrencyGuard {
        current: Arc<AtomicUsize>,
    }

    impl Drop for ConcurrencyGuard {
        fn drop(&mut self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Yields a fixed set of revoked certificates, ignoring the request's
    /// boundaries (tests construct configs where that doesn't matter).
    pub struct FakeStorageAuthority {
        pub entries: Vec<RevokedCertificate>,
    }

    #[async_trait::async_trait]
    impl StorageAuthorityClient for FakeStorageAuthority {
        async fn get_revoked_certs(
            &self,
            _req: GetRevokedCertsRequest,
        ) -> Result<TryBoxStream<RevokedCertificate>, ClientError> {
            let entries = self.entries.clone();
            Ok(Box::pin(tokio_stream::iter(entries.into_iter().map(Ok))))
        }
    }

    /// Yields `entries` successfully, then a single read error, for the "SA
    /// stream errors mid-read" scenario.
    pub struct FailingStorageAuthority {
        pub entries: Vec<RevokedCertificate>,
    }

    #[async_trait::async_trait]
    impl StorageAuthorityClient for FailingStorageAuthority {
        async fn get_revoked_certs(
            &self,
            _req: GetRevokedCertsRequest,
        ) -> Result<TryBoxStream<RevokedCertificate>, ClientError> {
            let ok_items = self.entries.clone().into_iter().map(Ok);
            let err_item = std::iter::once(Err(ClientError::Grpc(tonic::Status::internal(
                "fake storage authority read failure",
            ))));
            Ok(Box::pin(tokio_stream::iter(ok_items.chain(err_item))))
        }
    }

    /// Buffers every entry it receives, then (on half-close) echoes each
    /// entry back as a one-chunk-per-entry CRL body, recording the
    /// observed sequence for `Property 6` assertions. Holds a concurrency
    /// permit for the whole call so tests can bound `Property 5`.
    pub struct FakeCaSigner {
        pub observed: Arc<Mutex<Vec<GenerateCrlRequest>>>,
        pub concurrency: Concurrency,
    }

    #[async_trait::async_trait]
    impl CaSignerClient for FakeCaSigner {
        async fn generate_crl(
            &self,
            mut requests: BoxStream<GenerateCrlRequest>,
        ) -> Result<TryBoxStream<CrlChunk>, ClientError> {
            let _guard = self.concurrency.enter();
            let observed = self.observed.clone();
            let mut entries = Vec::new();
            while let Some(req) = futures::StreamExt::next(&mut requests).await {
                observed.lock().await.push(req.clone());
                if let Some(crl_proto::generate_crl_request::Body::Entry(e)) = req.body {
                    entries.push(e);
                }
            }
            let chunks: Vec<_> = entries
                .into_iter()
                .map(|e| CrlChunk { chunk: e.serial })
                .collect();
            Ok(Box::pin(tokio_stream::iter(chunks.into_iter().map(Ok))))
        }
    }

    /// Records every chunk it receives and always acks.
    pub struct FakePublisher {
        pub observed: Arc<Mutex<Vec<UploadCrlRequest>>>,
    }

    #[async_trait::async_trait]
    impl PublisherClient for FakePublisher {
        async fn upload_crl(
            &self,
            mut requests: BoxStream<UploadCrlRequest>,
        ) -> Result<UploadCrlResponse, ClientError> {
            while let Some(req) = futures::StreamExt::next(&mut requests).await {
                self.observed.lock().await.push(req);
            }
            Ok(UploadCrlResponse { ok: true })
        }
    }

    /// A publisher that fails on the Nth chunk it receives (1-indexed),
    /// for scenario 5 ("CA's 3rd chunk send to publisher fails").
    pub struct FailingPublisher {
        pub fail_on_nth_chunk: usize,
    }

    #[async_trait::async_trait]
    impl PublisherClient for FailingPublisher {
        async fn upload_crl(
            &self,
            mut requests: BoxStream<UploadCrlRequest>,
        ) -> Result<UploadCrlResponse, ClientError> {
            let mut chunk_count = 0usize;
            while let Some(req) = futures::StreamExt::next(&mut requests).await {
                if matches!(req.body, Some(crl_proto::upload_crl_request::Body::Chunk(_))) {
                    chunk_count += 1;
                    if chunk_count == self.fail_on_nth_chunk {
                        return Err(ClientError::Grpc(tonic::Status::internal(
                            "fake publisher failure",
                        )));
                    }
                }
            }
            Ok(UploadCrlResponse { ok: true })
        }
    }
}
