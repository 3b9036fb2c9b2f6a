//! Certificate Revocation List updater: periodically asks the storage
//! authority which certificates have been revoked, has the CA sign a CRL
//! covering each shard of the issuer's certificate population, and
//! publishes the result.

pub mod boundary;
pub mod clients;
pub mod config;
pub mod issuer;
pub mod issuer_tick;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod tick;
pub mod time;

use std::sync::Arc;

use url::Url;

use clients::{ClientError, GrpcCaSigner, GrpcPublisher, GrpcStorageAuthority};
use config::UpdaterConfig;
use issuer::{build_issuer_map, IssuerMap};
use pipeline::ShardContext;
use scheduler::Scheduler;
use tokio_util::sync::CancellationToken;

/// Endpoints of the three external services the updater depends on.
pub struct Endpoints {
    pub storage_authority: Url,
    pub ca_signer: Url,
    pub publisher: Url,
}

/// Bundles a validated config, the issuer map, and connected clients into
/// a [`Scheduler`] ready to run.
pub struct Updater {
    ctx: ShardContext,
    issuers: Arc<IssuerMap>,
}

impl Updater {
    /// Connects to all three external services and builds the issuer map
    /// from their configured common names. Returns before any RPC other
    /// than channel setup is made.
    pub async fn connect(
        config: UpdaterConfig,
        endpoints: &Endpoints,
        issuer_common_names: &[String],
        cancellation: CancellationToken,
    ) -> Result<Self, ClientError> {
        let storage_authority = GrpcStorageAuthority::connect(&endpoints.storage_authority).await?;
        let ca_signer = GrpcCaSigner::connect(&endpoints.ca_signer).await?;
        let publisher = GrpcPublisher::connect(&endpoints.publisher).await?;

        let ctx = ShardContext {
            config: Arc::new(config),
            storage_authority: Arc::new(storage_authority),
            ca_signer: Arc::new(ca_signer),
            publisher: Arc::new(publisher),
            cancellation,
        };
        let issuers = Arc::new(build_issuer_map(issuer_common_names));

        Ok(Self { ctx, issuers })
    }

    /// Runs the scheduler until its cancellation token fires.
    pub async fn run(self) {
        Scheduler::new(self.ctx, self.issuers).run().await;
    }
}
