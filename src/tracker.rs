//! Persistent set of revoked certificates waiting to show up in a CRL.

use std::collections::HashMap;

use ::redis::RedisError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ::time::OffsetDateTime;
use tracing::debug;
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::*;

use crate::serial::{SerialKey, serial_bytes};

mod memory;
mod redis;

pub use memory::MemoryTracker;
pub use redis::RedisTracker;

/// Default name of the table (Redis hash) holding tracked certificates
pub const DEFAULT_TABLE: &str = "unseen-certificates";

type Result<T> = std::result::Result<T, TrackerError>;

/// Error type for tracker operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker backend error: {0}")]
    Backend(#[from] RedisError),

    #[error("decoding tracked certificate: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("parsing certificate: {0}")]
    Certificate(#[from] X509Error),

    #[error("certificate {serial} has {count} CRLDistributionPoints, at most one is supported")]
    TooManyDistributionPoints { serial: SerialKey, count: usize },
}

/// A revoked certificate we expect to find in a future CRL.
///
/// Revocation times are stored with one second resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedCertificate {
    pub serial_number: Vec<u8>,
    #[serde(with = "::time::serde::timestamp")]
    pub revocation_time: OffsetDateTime,
    /// If set, only a CRL with this IssuingDistributionPoint may count as
    /// having seen the certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crl_distribution_point: Option<String>,
}

impl TrackedCertificate {
    pub fn new(
        serial_number: &[u8],
        revocation_time: OffsetDateTime,
        crl_distribution_point: Option<&str>,
    ) -> Self {
        Self {
            serial_number: serial_number.to_vec(),
            revocation_time: truncate_to_seconds(revocation_time),
            crl_distribution_point: crl_distribution_point.map(str::to_string),
        }
    }

    pub fn key(&self) -> SerialKey {
        SerialKey::from_bytes(&self.serial_number)
    }
}

pub(crate) fn truncate_to_seconds(t: OffsetDateTime) -> OffsetDateTime {
    t.replace_nanosecond(0).unwrap_or(t)
}

/// Abstract interface for tracker storage backends.
#[async_trait]
pub trait CertificateTracker: Send + Sync {
    /// Start tracking a revoked certificate. Re-adding a serial replaces it.
    async fn add(
        &self,
        serial_number: &[u8],
        revocation_time: OffsetDateTime,
        crl_distribution_point: Option<&str>,
    ) -> Result<()>;

    /// Stop tracking the given serials. Unknown serials and empty input are
    /// not errors.
    async fn delete_many(&self, serial_numbers: &[Vec<u8>]) -> Result<()>;

    /// Load every tracked certificate, keyed by [`SerialKey`].
    async fn get_all(&self) -> Result<HashMap<SerialKey, TrackedCertificate>>;
}

/// CRL distribution point URLs listed in a certificate.
pub(crate) fn crl_distribution_points(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut urls = Vec::new();
    for ext in cert.extensions() {
        let ParsedExtension::CRLDistributionPoints(points) = ext.parsed_extension() else {
            continue;
        };
        for point in &points.points {
            if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                urls.extend(names.iter().filter_map(|name| match name {
                    GeneralName::URI(uri) => Some(uri.to_string()),
                    _ => None,
                }));
            }
        }
    }
    urls
}

/// Track a DER encoded certificate revoked at `revocation_time`.
///
/// The certificate's CRL distribution point, if any, is recorded so the
/// certificate is only considered seen in the matching CRL shard. More than
/// one distribution point is an error.
pub async fn track_certificate(
    tracker: &dyn CertificateTracker,
    certificate_der: &[u8],
    revocation_time: OffsetDateTime,
) -> Result<()> {
    let (_, cert) = X509Certificate::from_der(certificate_der).map_err(X509Error::from)?;
    let serial = serial_bytes(&cert.tbs_certificate.serial);

    let points = crl_distribution_points(&cert);
    if points.len() > 1 {
        return Err(TrackerError::TooManyDistributionPoints {
            serial: SerialKey::from_bytes(&serial),
            count: points.len(),
        });
    }
    let point = points.first().map(String::as_str);

    debug!(
        serial = %SerialKey::from_bytes(&serial),
        crl_distribution_point = ?point,
        "tracking revoked certificate"
    );
    tracker.add(&serial, revocation_time, point).await
}
