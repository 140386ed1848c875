use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::errors::CrlError;
use super::types::RevocationList;
use crate::issuer::{IssuerCertificate, IssuerError};

/// Reasons a CRL is rejected before it is compared with its predecessor
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Crl(#[from] CrlError),

    #[error(transparent)]
    Issuer(#[from] IssuerError),

    #[error("CRL issuer name does not match issuer certificate subject")]
    IssuerNameMismatch,

    #[error("CRL authority key identifier {crl} does not match issuer subject key identifier {issuer}")]
    KeyIdMismatch { crl: String, issuer: String },

    #[error("CRL has no DER encoding to verify")]
    NotSigned,

    #[error("CRL signature verification failed: {0}")]
    Signature(String),

    #[error("CRL has no nextUpdate")]
    MissingNextUpdate,

    #[error("CRL nextUpdate {next_update} is not after thisUpdate {this_update}")]
    InvalidValidityWindow {
        this_update: OffsetDateTime,
        next_update: OffsetDateTime,
    },

    #[error("CRL is too old: thisUpdate {this_update} is more than {limit} before {now}")]
    TooOld {
        this_update: OffsetDateTime,
        now: OffsetDateTime,
        limit: Duration,
    },

    #[error("CRL has IssuingDistributionPoint {actual}, expected {expected}")]
    UnexpectedDistributionPoint { expected: String, actual: String },
}

/// Checks that a CRL was issued by the expected issuer and is fresh.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    pub age_limit: Duration,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            age_limit: Duration::hours(24),
        }
    }
}

impl Validator {
    pub fn new(age_limit: Duration) -> Self {
        Self { age_limit }
    }

    pub fn validate(
        &self,
        crl: &RevocationList,
        issuer: &IssuerCertificate,
        expected_idp: Option<&str>,
    ) -> Result<(), ValidationError> {
        self.validate_at(crl, issuer, expected_idp, OffsetDateTime::now_utc())
    }

    /// Validate `crl` as if the current time were `now`.
    ///
    /// A thisUpdate in the future is accepted; only the age is bounded.
    pub fn validate_at(
        &self,
        crl: &RevocationList,
        issuer: &IssuerCertificate,
        expected_idp: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<(), ValidationError> {
        if crl.issuer_name != issuer.subject {
            return Err(ValidationError::IssuerNameMismatch);
        }

        if let Some(key_id) = &issuer.key_id
            && *key_id != crl.issuer_key_id
        {
            return Err(ValidationError::KeyIdMismatch {
                crl: hex::encode(&crl.issuer_key_id),
                issuer: hex::encode(key_id),
            });
        }

        if crl.raw.is_empty() {
            return Err(ValidationError::NotSigned);
        }
        let parsed = crl.parse()?;
        let cert = issuer.parse()?;
        x509_parser::verify::verify_signature(
            &cert.tbs_certificate.subject_pki,
            &parsed.signature_algorithm,
            &parsed.signature_value,
            parsed.tbs_cert_list.as_ref(),
        )
        .map_err(|e| ValidationError::Signature(e.to_string()))?;

        let next_update = crl.next_update.ok_or(ValidationError::MissingNextUpdate)?;
        if next_update <= crl.this_update {
            return Err(ValidationError::InvalidValidityWindow {
                this_update: crl.this_update,
                next_update,
            });
        }

        if now - crl.this_update > self.age_limit {
            return Err(ValidationError::TooOld {
                this_update: crl.this_update,
                now,
                limit: self.age_limit,
            });
        }

        if let Some(expected) = expected_idp
            && expected != crl.idp_url
        {
            return Err(ValidationError::UnexpectedDistributionPoint {
                expected: expected.to_string(),
                actual: crl.idp_url.clone(),
            });
        }

        debug!(
            number = %crl.number,
            idp = %crl.idp_url,
            "CRL passed validation"
        );
        Ok(())
    }
}
