//! Per-shard CRL check.
//!
//! A check walks through the stages of [`CheckStage`]:
//! - fetch the current CRL version and resolve its issuer from the object path
//! - validate the CRL against the issuer
//! - diff against the previous version and look for early removals
//! - stop tracking certificates this CRL shows as revoked
//!
//! The first failing stage ends the check. Distribution point mismatches and
//! tracker delete failures are collected instead and reported together.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use x509_parser::num_bigint::BigUint;

use crate::crl::{CrlError, RevocationList, ValidationError, Validator};
use crate::earlyremoval::{self, EarlyRemoval, EarlyRemovalError};
use crate::expiry::ExpirationOracle;
use crate::issuer::{IssuerError, IssuerRegistry};
use crate::serial::SerialKey;
use crate::storage::{BlobVersionedStore, StorageError};
use crate::tracker::{CertificateTracker, TrackerError};

/// Default number of early removals listed in an error
pub const DEFAULT_MAX_REPORTED_REMOVALS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStage {
    Fetching,
    Validating,
    Diffing,
    ReconcilingTracker,
    Done,
}

impl fmt::Display for CheckStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckStage::Fetching => "fetching",
            CheckStage::Validating => "validating",
            CheckStage::Diffing => "diffing",
            CheckStage::ReconcilingTracker => "reconciling tracker",
            CheckStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("error parsing current CRL: {0}")]
    ParseCurrent(#[source] CrlError),

    #[error("error parsing previous CRL: {0}")]
    ParsePrevious(#[source] CrlError),

    #[error(transparent)]
    Issuer(#[from] IssuerError),

    #[error("CRL failed validation: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    EarlyRemovalCheck(#[from] EarlyRemovalError),

    #[error("early removal of {count} certificates detected! {}", list_removals(.shown))]
    EarlyRemoval {
        count: usize,
        /// The first removals found, capped at the configured maximum
        shown: Vec<EarlyRemoval>,
    },

    #[error(
        "serial {serial} has CRLDistributionPoint {tracked} but was seen in CRL with IssuingDistributionPoint {idp}"
    )]
    DistributionPointMismatch {
        serial: SerialKey,
        tracked: String,
        idp: String,
    },

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("checking {object}: {source}")]
    InObject {
        object: String,
        #[source]
        source: Box<CheckError>,
    },

    #[error("{}", join_lines(.0))]
    Joined(Vec<CheckError>),
}

impl CheckError {
    /// Combine collected errors. Returns `None` if there are none.
    pub fn join(mut errors: Vec<CheckError>) -> Option<CheckError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(CheckError::Joined(errors)),
        }
    }

    /// The collected errors, or just this one if it is not a joined error.
    pub fn errors(&self) -> Vec<&CheckError> {
        match self {
            CheckError::Joined(errors) => errors.iter().collect(),
            other => vec![other],
        }
    }
}

fn list_removals(removals: &[EarlyRemoval]) -> String {
    removals
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_lines(errors: &[CheckError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Upper bound on oracle lookups per check, 0 for no limit
    pub max_fetch: usize,
    /// If set, a CRL stored at `{object}` must have the IssuingDistributionPoint
    /// `{idp_base_url}/{object}`
    pub idp_base_url: Option<String>,
    pub max_reported_removals: usize,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            max_fetch: 0,
            idp_base_url: None,
            max_reported_removals: DEFAULT_MAX_REPORTED_REMOVALS,
        }
    }
}

impl CheckerConfig {
    /// Whether CRLs are matched against the location they are stored at
    pub fn checks_idp(&self) -> bool {
        self.idp_base_url.is_some()
    }
}

/// Summary of a successful check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub object: String,
    pub version: String,
    /// `None` when this was the first version of the shard
    pub previous_version: Option<String>,
    pub number: BigUint,
    pub entries: usize,
    /// Tracked certificates found in this CRL and no longer tracked
    pub seen: usize,
}

pub struct Checker {
    storage: Arc<dyn BlobVersionedStore>,
    tracker: Arc<dyn CertificateTracker>,
    oracle: Arc<dyn ExpirationOracle>,
    issuers: IssuerRegistry,
    validator: Validator,
    config: CheckerConfig,
}

impl Checker {
    pub fn new(
        storage: Arc<dyn BlobVersionedStore>,
        tracker: Arc<dyn CertificateTracker>,
        oracle: Arc<dyn ExpirationOracle>,
        issuers: IssuerRegistry,
        validator: Validator,
        config: CheckerConfig,
    ) -> Self {
        if !config.checks_idp() {
            warn!("idp_base_url not set, CRLs are not checked against their storage location");
        }
        Self {
            storage,
            tracker,
            oracle,
            issuers,
            validator,
            config,
        }
    }

    /// Check one version of a CRL shard, or the latest if `version` is `None`.
    #[instrument(skip(self))]
    pub async fn check(
        &self,
        bucket: &str,
        object: &str,
        version: Option<&str>,
    ) -> Result<CheckReport, CheckError> {
        enter(CheckStage::Fetching);
        let current = self.storage.fetch(bucket, object, version).await?;
        let crl = RevocationList::from_der(current.data).map_err(CheckError::ParseCurrent)?;
        let issuer = self.issuers.resolve_object(object)?;
        info!(
            version = %current.version,
            number = %crl.number,
            entries = crl.len(),
            "loaded CRL"
        );

        enter(CheckStage::Validating);
        let expected_idp = self
            .config
            .idp_base_url
            .as_deref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), object));
        self.validator
            .validate(&crl, issuer, expected_idp.as_deref())?;

        enter(CheckStage::Diffing);
        let previous_version = match self.storage.previous(bucket, object, &current.version).await
        {
            Ok(previous) => Some(previous),
            Err(StorageError::NoPreviousVersion { .. }) => {
                info!("no previous version, skipping early removal check");
                None
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(previous_version) = &previous_version {
            let previous = self
                .storage
                .fetch(bucket, object, Some(previous_version))
                .await?;
            let prev = RevocationList::from_der(previous.data).map_err(CheckError::ParsePrevious)?;
            debug!(
                previous_version = %previous.version,
                number = %prev.number,
                entries = prev.len(),
                "loaded previous CRL"
            );
            self.look_for_early_removal(&prev, &crl).await?;
        }

        enter(CheckStage::ReconcilingTracker);
        let (seen, errors) = self.look_for_seen_certificates(&crl).await;

        enter(CheckStage::Done);
        if let Some(err) = CheckError::join(errors) {
            return Err(err);
        }
        Ok(CheckReport {
            object: object.to_string(),
            version: current.version,
            previous_version,
            number: crl.number.clone(),
            entries: crl.len(),
            seen,
        })
    }

    /// Check the latest version of every shard of every known issuer.
    ///
    /// Shards that don't exist in storage are skipped. Failures don't stop the
    /// sweep; they are returned together at the end.
    pub async fn check_all(&self, bucket: &str, shards: u32) -> Result<Vec<CheckReport>, CheckError> {
        let mut name_ids: Vec<_> = self.issuers.name_ids().collect();
        name_ids.sort_unstable();

        let mut reports = Vec::new();
        let mut errors = Vec::new();
        for name_id in name_ids {
            for shard in 0..shards {
                let object = format!("{name_id}/{shard}.crl");
                match self.check(bucket, &object, None).await {
                    Ok(report) => reports.push(report),
                    Err(CheckError::Storage(StorageError::ObjectNotFound { .. })) => {
                        debug!(object = %object, "shard not found, skipping");
                    }
                    Err(e) => {
                        error!(object = %object, error = %e, "check failed");
                        errors.push(CheckError::InObject {
                            object,
                            source: Box::new(e),
                        });
                    }
                }
            }
        }

        info!(
            checked = reports.len(),
            failed = errors.len(),
            "finished checking all shards"
        );
        match CheckError::join(errors) {
            Some(err) => Err(err),
            None => Ok(reports),
        }
    }

    async fn look_for_early_removal(
        &self,
        prev: &RevocationList,
        crl: &RevocationList,
    ) -> Result<(), CheckError> {
        let early =
            earlyremoval::check(self.oracle.as_ref(), prev, crl, self.config.max_fetch).await?;
        if early.is_empty() {
            return Ok(());
        }

        let count = early.len();
        let shown: Vec<EarlyRemoval> = early
            .into_iter()
            .take(self.config.max_reported_removals)
            .collect();
        for removal in &shown {
            error!(%removal, "early removal");
        }
        error!(count, "early removal detected");
        Err(CheckError::EarlyRemoval { count, shown })
    }

    /// Delete every tracked certificate that appears in `crl`. Returns how
    /// many were deleted and any errors encountered.
    async fn look_for_seen_certificates(&self, crl: &RevocationList) -> (usize, Vec<CheckError>) {
        let tracked = match self.tracker.get_all().await {
            Ok(tracked) => tracked,
            Err(e) => return (0, vec![CheckError::Tracker(e)]),
        };

        let mut errors = Vec::new();
        let mut seen = Vec::new();
        for entry in &crl.entries {
            let key = SerialKey::from_biguint(&entry.serial);
            let Some(cert) = tracked.get(&key) else {
                continue;
            };
            match &cert.crl_distribution_point {
                Some(dp) if *dp != crl.idp_url => {
                    warn!(serial = %key, tracked = %dp, idp = %crl.idp_url, "distribution point mismatch");
                    errors.push(CheckError::DistributionPointMismatch {
                        serial: key,
                        tracked: dp.clone(),
                        idp: crl.idp_url.clone(),
                    });
                }
                _ => seen.push(cert.serial_number.clone()),
            }
        }

        info!(seen = seen.len(), tracked = tracked.len(), "removing seen certificates from tracker");
        if let Err(e) = self.tracker.delete_many(&seen).await {
            errors.push(CheckError::Tracker(e));
            return (0, errors);
        }
        (seen.len(), errors)
    }
}

fn enter(stage: CheckStage) {
    debug!(%stage, "entering check stage");
}
