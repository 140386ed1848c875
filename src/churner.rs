//! Canary certificates: issue, revoke, and wait for them to show up in a CRL.
//!
//! Every churn issues a fresh certificate, makes sure the CRLs it points at
//! are reachable and valid, revokes it, and starts tracking it. The checker
//! stops tracking it once a CRL lists it. Anything still tracked long after
//! its revocation was missed by the CA.

use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::Report;
use reqwest::Client;
use thiserror::Error;
use ::time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use x509_parser::prelude::*;

use crate::crl::{CrlError, RevocationList, ValidationError, Validator};
use crate::issuer::{IssuerCertificate, IssuerError};
use crate::retry::{self, FetchError, RetrySchedule};
use crate::serial::SerialKey;
use crate::tracker::{
    CertificateTracker, TrackedCertificate, TrackerError, crl_distribution_points,
    track_certificate,
};

#[derive(Debug, Error)]
pub enum ChurnError {
    #[error("issuing canary certificate: {0}")]
    Issue(Report),

    #[error("revoking canary certificate {serial}: {error}")]
    Revoke { serial: SerialKey, error: Report },

    #[error("parsing canary certificate: {0}")]
    Certificate(#[from] X509Error),

    #[error(transparent)]
    Issuer(#[from] IssuerError),

    #[error("fetching CRL {url:?} from CRLDistributionPoint of certificate {serial}: {source}")]
    FetchCrl {
        url: String,
        serial: SerialKey,
        #[source]
        source: FetchError,
    },

    #[error("parsing CRL {url:?} from CRLDistributionPoint of certificate {serial}: {source}")]
    ParseCrl {
        url: String,
        serial: SerialKey,
        #[source]
        source: CrlError,
    },

    #[error("CRL {url:?} failed validation: {source}")]
    InvalidCrl {
        url: String,
        #[source]
        source: ValidationError,
    },

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// A certificate and the certificate of its issuer, both DER encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub certificate_der: Vec<u8>,
    pub issuer_der: Vec<u8>,
}

/// The CA account used to obtain and revoke canary certificates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CanaryIssuer: Send + Sync {
    /// Obtain a certificate for `domains`.
    async fn issue(&self, domains: &[String]) -> color_eyre::Result<IssuedCertificate>;

    /// Revoke a certificate previously returned by [`issue`](Self::issue).
    async fn revoke(&self, certificate: &IssuedCertificate) -> color_eyre::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ChurnerConfig {
    /// Canary names are issued under this domain
    pub base_domain: String,
    /// How long a revoked certificate may take to appear in a CRL
    pub revoke_deadline: Duration,
    /// Maximum age of the CRLs checked before revoking
    pub crl_age_limit: Duration,
}

impl ChurnerConfig {
    pub fn new(base_domain: impl Into<String>) -> Self {
        Self {
            base_domain: base_domain.into(),
            revoke_deadline: Duration::hours(24),
            crl_age_limit: Duration::hours(24),
        }
    }
}

pub struct Churner {
    issuer: Arc<dyn CanaryIssuer>,
    tracker: Arc<dyn CertificateTracker>,
    client: Client,
    schedule: RetrySchedule,
    config: ChurnerConfig,
}

impl Churner {
    pub fn new(
        issuer: Arc<dyn CanaryIssuer>,
        tracker: Arc<dyn CertificateTracker>,
        config: ChurnerConfig,
    ) -> Self {
        Self {
            issuer,
            tracker,
            client: Client::new(),
            schedule: RetrySchedule::default(),
            config,
        }
    }

    /// Use a specific HTTP client and retry schedule for CRL fetches
    pub fn with_http(mut self, client: Client, schedule: RetrySchedule) -> Self {
        self.client = client;
        self.schedule = schedule;
        self
    }

    /// Issue a canary certificate, revoke it and start tracking it.
    ///
    /// Returns the serial of the tracked certificate.
    pub async fn churn(&self) -> Result<SerialKey, ChurnError> {
        let domains = rand_domains(&self.config.base_domain);
        let issued = self
            .issuer
            .issue(&domains)
            .await
            .map_err(ChurnError::Issue)?;

        let (_, cert) =
            X509Certificate::from_der(&issued.certificate_der).map_err(X509Error::from)?;
        let serial = SerialKey::from_biguint(&cert.tbs_certificate.serial);
        let issuer = IssuerCertificate::from_der(&issued.issuer_der)?;
        info!(serial = %serial, domains = ?domains, "issued canary certificate");

        // Only check the CRLs can be fetched and validated. The revocation
        // below won't show up in them for a while.
        let validator = Validator::new(self.config.crl_age_limit);
        for url in crl_distribution_points(&cert) {
            let body = retry::get(&self.client, &url, &self.schedule)
                .await
                .map_err(|source| ChurnError::FetchCrl {
                    url: url.clone(),
                    serial: serial.clone(),
                    source,
                })?;
            let crl = RevocationList::from_der(body).map_err(|source| ChurnError::ParseCrl {
                url: url.clone(),
                serial: serial.clone(),
                source,
            })?;
            validator
                .validate(&crl, &issuer, Some(url.as_str()))
                .map_err(|source| ChurnError::InvalidCrl {
                    url: url.clone(),
                    source,
                })?;
        }

        self.issuer
            .revoke(&issued)
            .await
            .map_err(|error| ChurnError::Revoke {
                serial: serial.clone(),
                error,
            })?;
        info!(serial = %serial, "revoked canary certificate");

        track_certificate(
            self.tracker.as_ref(),
            &issued.certificate_der,
            OffsetDateTime::now_utc(),
        )
        .await?;
        Ok(serial)
    }

    /// Tracked certificates revoked longer than the deadline ago.
    pub async fn check_missing(&self) -> Result<Vec<TrackedCertificate>, TrackerError> {
        check_missing(
            self.tracker.as_ref(),
            cutoff(self.config.revoke_deadline, OffsetDateTime::now_utc()),
        )
        .await
    }
}

/// The revocation time before which a tracked certificate counts as missed.
pub fn cutoff(revoke_deadline: Duration, now: OffsetDateTime) -> OffsetDateTime {
    now - revoke_deadline
}

/// Return every tracked certificate revoked strictly before `cutoff`.
///
/// Each of them should have appeared in a CRL by now.
pub async fn check_missing(
    tracker: &dyn CertificateTracker,
    cutoff: OffsetDateTime,
) -> Result<Vec<TrackedCertificate>, TrackerError> {
    let mut missed: Vec<TrackedCertificate> = tracker
        .get_all()
        .await?
        .into_values()
        .filter(|cert| cert.revocation_time < cutoff)
        .collect();
    missed.sort_by_key(|cert| cert.revocation_time);

    if !missed.is_empty() {
        warn!(count = missed.len(), %cutoff, "revoked certificates missing from CRLs");
    }
    Ok(missed)
}

/// A single random name under `base_domain`, unique per call.
pub fn rand_domains(base_domain: &str) -> Vec<String> {
    vec![format!(
        "r{}z{:x}.{}",
        OffsetDateTime::now_utc().unix_timestamp(),
        rand::random::<u32>(),
        base_domain
    )]
}

#[cfg(test)]
mod tests {
    use axum::{Router, routing::get};
    use rcgen::{
        Certificate, CertificateParams, CertificateRevocationList,
        CertificateRevocationListParams, CrlDistributionPoint, CrlIssuingDistributionPoint,
        CrlScope, DistinguishedName, DnType, KeyIdMethod, KeyUsagePurpose, SerialNumber,
    };
    use tokio::net::TcpListener;

    use super::*;
    use crate::tracker::MemoryTracker;

    struct Pki {
        ca: Certificate,
        crl_url: String,
    }

    impl Pki {
        fn new(port: u16) -> Self {
            let mut params = CertificateParams::new(Vec::<String>::new());
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, "Canary Issuer");
            params.distinguished_name = dn;
            params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
            params.key_usages = vec![KeyUsagePurpose::CrlSign, KeyUsagePurpose::KeyCertSign];
            Self {
                ca: Certificate::from_params(params).unwrap(),
                crl_url: format!("http://127.0.0.1:{port}/1/0.crl"),
            }
        }

        fn issue(&self, domains: &[String]) -> IssuedCertificate {
            let mut params = CertificateParams::new(domains.to_vec());
            params.serial_number = Some(SerialNumber::from_slice(&[0x42, 0x17]));
            params.crl_distribution_points = vec![CrlDistributionPoint {
                uris: vec![self.crl_url.clone()],
            }];
            let leaf = Certificate::from_params(params).unwrap();
            IssuedCertificate {
                certificate_der: leaf.serialize_der_with_signer(&self.ca).unwrap(),
                issuer_der: self.ca.serialize_der().unwrap(),
            }
        }

        fn crl(&self, this_update: OffsetDateTime) -> Vec<u8> {
            let params = CertificateRevocationListParams {
                this_update,
                next_update: this_update + Duration::hours(24),
                crl_number: SerialNumber::from_slice(&[7]),
                issuing_distribution_point: Some(CrlIssuingDistributionPoint {
                    distribution_point: CrlDistributionPoint {
                        uris: vec![self.crl_url.clone()],
                    },
                    scope: Some(CrlScope::UserCertsOnly),
                }),
                revoked_certs: Vec::new(),
                alg: &rcgen::PKCS_ECDSA_P256_SHA256,
                key_identifier_method: KeyIdMethod::Sha256,
            };
            CertificateRevocationList::from_params(params)
                .unwrap()
                .serialize_der_with_signer(&self.ca)
                .unwrap()
        }
    }

    /// Serve `crl` at `/1/0.crl` and return the PKI that signed it.
    async fn serve_crl(crl_age: Duration) -> Arc<Pki> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let pki = Arc::new(Pki::new(port));
        let crl = pki.crl(OffsetDateTime::now_utc() - crl_age);

        let app = Router::new().route("/1/0.crl", get(move || async move { crl.clone() }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        pki
    }

    fn churner(issuer: MockCanaryIssuer, tracker: MemoryTracker) -> Churner {
        Churner::new(
            Arc::new(issuer),
            Arc::new(tracker),
            ChurnerConfig::new("canary.example"),
        )
        .with_http(Client::new(), RetrySchedule::immediate(1))
    }

    #[tokio::test]
    async fn test_churn_tracks_revoked_certificate() {
        let pki = serve_crl(Duration::hours(1)).await;
        let tracker = MemoryTracker::default();

        let mut issuer = MockCanaryIssuer::new();
        let issuing_pki = pki.clone();
        issuer
            .expect_issue()
            .times(1)
            .returning(move |domains| Ok(issuing_pki.issue(domains)));
        issuer.expect_revoke().times(1).returning(|_| Ok(()));

        let serial = churner(issuer, tracker.clone()).churn().await.unwrap();

        let tracked = tracker.get_all().await.unwrap();
        assert_eq!(tracked.len(), 1);
        let cert = &tracked[&serial];
        assert_eq!(cert.serial_number, vec![0x42, 0x17]);
        assert_eq!(cert.crl_distribution_point.as_deref(), Some(pki.crl_url.as_str()));
    }

    #[tokio::test]
    async fn test_churn_refuses_to_revoke_with_stale_crl() {
        let pki = serve_crl(Duration::hours(48)).await;
        let tracker = MemoryTracker::default();

        let mut issuer = MockCanaryIssuer::new();
        issuer
            .expect_issue()
            .returning(move |domains| Ok(pki.issue(domains)));
        issuer.expect_revoke().never();

        let err = churner(issuer, tracker.clone()).churn().await.unwrap_err();
        assert!(matches!(
            err,
            ChurnError::InvalidCrl {
                source: ValidationError::TooOld { .. },
                ..
            }
        ));
        assert!(tracker.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_churn_issue_failure() {
        let mut issuer = MockCanaryIssuer::new();
        issuer
            .expect_issue()
            .returning(|_| Err(color_eyre::eyre::eyre!("rate limited")));
        issuer.expect_revoke().never();

        let err = churner(issuer, MemoryTracker::default())
            .churn()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_check_missing() {
        let tracker = MemoryTracker::default();
        let now = OffsetDateTime::now_utc();
        tracker
            .add(&[0x0a], now - Duration::hours(25), None)
            .await
            .unwrap();
        tracker.add(&[0x0b], now, None).await.unwrap();

        let missed = check_missing(&tracker, cutoff(Duration::hours(24), now))
            .await
            .unwrap();
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].serial_number, vec![0x0a]);

        let churner = Churner::new(
            Arc::new(MockCanaryIssuer::new()),
            Arc::new(tracker),
            ChurnerConfig::new("canary.example"),
        );
        assert_eq!(churner.check_missing().await.unwrap().len(), 1);
    }

    #[test]
    fn test_rand_domains() {
        let first = rand_domains("canary.example");
        let second = rand_domains("canary.example");
        assert_eq!(first.len(), 1);
        assert!(first[0].starts_with('r'));
        assert!(first[0].ends_with(".canary.example"));
        assert!(first[0].contains('z'));
        assert_ne!(first, second);
    }
}
