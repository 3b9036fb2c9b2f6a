use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crl_cli_common::{LogArgs, OrBail};
use crl_updater::config::{UpdaterConfig, UpdaterConfigParams};
use crl_updater::{Endpoints, Updater};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Periodically issues signed, sharded CRLs for a set of certificate
/// issuers: storage authority revocations in, CA-signed CRL bytes out,
/// published to a storage backend.
#[derive(clap::Parser, Debug)]
#[command(about, version)]
struct Args {
    #[command(flatten)]
    logging: LogArgs,

    /// Number of stable shards each issuer's certificate population is
    /// partitioned into.
    #[arg(long = "num-shards", env = "CRL_NUM_SHARDS")]
    num_shards: u64,
    /// The maximum lifetime of a certificate issued under any configured
    /// issuer.
    #[arg(long = "cert-lifetime", env = "CRL_CERT_LIFETIME", value_parser = humantime::parse_duration)]
    cert_lifetime: Duration,
    /// How often a full tick (every issuer, every shard) runs.
    #[arg(
        long = "update-period",
        env = "CRL_UPDATE_PERIOD",
        value_parser = humantime::parse_duration,
        default_value = "6h"
    )]
    update_period: Duration,
    /// Wall-clock offset within each `update-period` that ticks are
    /// aligned to.
    #[arg(
        long = "update-offset",
        env = "CRL_UPDATE_OFFSET",
        value_parser = humantime::parse_duration,
        default_value = "0s"
    )]
    update_offset: Duration,
    /// Maximum number of shard pipelines run concurrently within one
    /// issuer's tick.
    #[arg(long = "max-parallelism", env = "CRL_MAX_PARALLELISM", default_value_t = 8)]
    max_parallelism: i64,

    /// Address of the storage authority gRPC service.
    #[arg(long = "storage-authority-addr", env = "CRL_SA_ADDR")]
    storage_authority_addr: Url,
    /// Address of the CA signing gRPC service.
    #[arg(long = "ca-addr", env = "CRL_CA_ADDR")]
    ca_addr: Url,
    /// Address of the publisher gRPC service.
    #[arg(long = "publisher-addr", env = "CRL_PUBLISHER_ADDR")]
    publisher_addr: Url,

    /// Common name of a certificate issuer to produce CRLs for. May be
    /// repeated; at least one is required.
    #[arg(long = "issuer", env = "CRL_ISSUERS", value_delimiter = ',', required = true)]
    issuer: Vec<String>,

    /// Bind address for the Prometheus `/metrics` HTTP endpoint.
    #[arg(long = "metrics-addr", env = "CRL_METRICS_ADDR", default_value = "0.0.0.0:9090")]
    metrics_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("failed to install default crypto provider");

    let args = Args::parse();
    crl_cli_common::init_logging(&args.logging);

    let config = UpdaterConfig::new(UpdaterConfigParams {
        num_shards: args.num_shards,
        cert_lifetime: args.cert_lifetime,
        update_period: args.update_period,
        update_offset: args.update_offset,
        max_parallelism: args.max_parallelism,
    })
    .context("validating updater configuration")?;

    let endpoints = Endpoints {
        storage_authority: args.storage_authority_addr,
        ca_signer: args.ca_addr,
        publisher: args.publisher_addr,
    };

    let cancellation = CancellationToken::new();
    let ctrl_c_token = cancellation.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(?err, "error subscribing to shutdown signal");
            return;
        }
        tracing::info!("caught shutdown signal, stopping updater...");
        ctrl_c_token.cancel();
    });

    let updater = Updater::connect(config, &endpoints, &args.issuer, cancellation.clone())
        .await
        .context("connecting to external services")?;

    let metrics_router = crl_updater::metrics::install_recorder_and_router();
    let metrics_listener = tokio::net::TcpListener::bind(args.metrics_addr)
        .await
        .with_context(|| format!("binding metrics listener on {}", args.metrics_addr))?;
    tokio::spawn(async move {
        axum::serve(metrics_listener, metrics_router)
            .await
            .or_bail("metrics server failed");
    });

    tracing::info!(issuers = ?args.issuer, metrics_addr = %args.metrics_addr, "crl-updater starting");
    updater.run().await;
    tracing::info!("crl-updater shut down cleanly");

    Ok(())
}
