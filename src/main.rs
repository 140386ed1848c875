use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;
use crl_monitor::{
    checker::Checker,
    churner::{self, cutoff},
    config::Config,
    expiry::CaApiOracle,
    issuer::IssuerRegistry,
    serial::SerialKey,
    storage::FsBlobStore,
    telemetry,
    tracker::{CertificateTracker, MemoryTracker, RedisTracker},
};
use time::OffsetDateTime;
use tracing::{error, info, warn};

/// Watch a CA's published CRLs for early removals and missing revocations.
#[derive(Parser, Debug)]
#[command(name = "crl-monitor", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check one CRL shard against its previous version.
    Check {
        /// Object path, `<issuer name id>/<shard>.crl`
        object: String,

        /// Stored version to check instead of the latest.
        #[arg(long = "object-version")]
        object_version: Option<String>,
    },

    /// Check the latest version of every shard of every configured issuer.
    CheckAll,

    /// Report tracked certificates that never appeared in a CRL.
    CheckMissing,
}

async fn tracker(config: &Config) -> color_eyre::Result<Arc<dyn CertificateTracker>> {
    match &config.tracker.redis {
        Some(redis) => {
            let conn = redis.start().await?;
            Ok(Arc::new(RedisTracker::new(conn, config.tracker.table.clone())))
        }
        None => {
            warn!("no redis configured, tracked certificates are kept in memory only");
            Ok(Arc::new(MemoryTracker::default()))
        }
    }
}

async fn checker(config: &Config) -> color_eyre::Result<Checker> {
    let storage = FsBlobStore::new(&config.storage.root).with_page_size(config.storage.page_size);
    let oracle = CaApiOracle::new(
        &config.oracle.base_url,
        config.oracle.timeout(),
        config.oracle.schedule(),
    )?;
    let issuers = IssuerRegistry::load(config.checker.issuer_paths.as_slice()).await?;

    Ok(Checker::new(
        Arc::new(storage),
        tracker(config).await?,
        Arc::new(oracle),
        issuers,
        config.checker.validator(),
        config.checker.checker_config(),
    ))
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let cli = Cli::parse();
    let config = Config::load()?;
    let bucket = config.checker.bucket.as_str();

    match cli.command {
        Command::Check {
            object,
            object_version,
        } => {
            let report = checker(&config)
                .await?
                .check(bucket, &object, object_version.as_deref())
                .await?;
            info!(?report, "check passed");
        }
        Command::CheckAll => {
            let reports = checker(&config)
                .await?
                .check_all(bucket, config.checker.shards)
                .await?;
            info!(checked = reports.len(), "all shards passed");
        }
        Command::CheckMissing => {
            let tracker = tracker(&config).await?;
            let deadline = config
                .churner
                .churner_config(config.checker.crl_age_limit_secs)
                .revoke_deadline;
            let missed =
                churner::check_missing(tracker.as_ref(), cutoff(deadline, OffsetDateTime::now_utc()))
                    .await?;
            for cert in &missed {
                error!(
                    serial = %SerialKey::from_bytes(&cert.serial_number),
                    revocation_time = %cert.revocation_time,
                    "revoked certificate never appeared in a CRL"
                );
            }
            if !missed.is_empty() {
                return Err(eyre!("{} revoked certificates missing from CRLs", missed.len()));
            }
            info!("no missing revocations");
        }
    }
    Ok(())
}
