use std::sync::Arc;

use ::time::OffsetDateTime;
use x509_parser::num_bigint::BigUint;
use x509_parser::prelude::*;

use super::errors::{CrlError, CrlResult};
use super::idp;

/// A single revoked certificate listed in a CRL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedEntry {
    pub serial: BigUint,
    pub revocation_time: OffsetDateTime,
}

impl RevokedEntry {
    pub fn new(serial: impl Into<BigUint>, revocation_time: OffsetDateTime) -> Self {
        Self {
            serial: serial.into(),
            revocation_time,
        }
    }
}

/// An issuer's list of revoked certificates at a point in time.
///
/// Lists built with [`RevocationList::from_der`] keep the signed DER bytes so
/// the signature can be checked later. Lists built by hand (e.g. in tests)
/// have an empty `raw` buffer and can only be diffed, not validated.
#[derive(Debug, Clone)]
pub struct RevocationList {
    /// Key identifier from the AuthorityKeyIdentifier extension
    pub issuer_key_id: Vec<u8>,
    /// DER encoding of the issuer name
    pub issuer_name: Vec<u8>,
    pub number: BigUint,
    pub this_update: OffsetDateTime,
    pub next_update: Option<OffsetDateTime>,
    pub entries: Vec<RevokedEntry>,
    /// URL from the IssuingDistributionPoint extension
    pub idp_url: String,
    pub raw: Arc<Vec<u8>>,
}

impl RevocationList {
    /// Parse a DER encoded CRL.
    ///
    /// The CRL must carry a CRL number, an authority key identifier and a
    /// single IssuingDistributionPoint URL.
    pub fn from_der(der: impl Into<Vec<u8>>) -> CrlResult<Self> {
        let der = der.into();
        let mut list = Self::parse_fields(&der)?;
        list.raw = Arc::new(der);
        Ok(list)
    }

    fn parse_fields(der: &[u8]) -> CrlResult<Self> {
        let (_, crl) =
            CertificateRevocationList::from_der(der).map_err(|e| CrlError::Parse(e.into()))?;

        let number = crl.crl_number().cloned().ok_or(CrlError::MissingNumber)?;

        let issuer_key_id = crl
            .extensions()
            .iter()
            .find_map(|ext| match ext.parsed_extension() {
                ParsedExtension::AuthorityKeyIdentifier(aki) => {
                    aki.key_identifier.as_ref().map(|kid| kid.0.to_vec())
                }
                _ => None,
            })
            .ok_or(CrlError::MissingAuthorityKeyId)?;

        let idp_url = idp::get(crl.extensions())?;

        let entries = crl
            .iter_revoked_certificates()
            .map(|revoked| RevokedEntry {
                serial: revoked.user_certificate.clone(),
                revocation_time: revoked.revocation_date.to_datetime(),
            })
            .collect();

        Ok(Self {
            issuer_key_id,
            issuer_name: crl.tbs_cert_list.issuer.as_raw().to_vec(),
            number,
            this_update: crl.last_update().to_datetime(),
            next_update: crl.next_update().map(|t| t.to_datetime()),
            entries,
            idp_url,
            raw: Arc::new(Vec::new()),
        })
    }

    /// Re-parse the stored DER bytes
    pub(crate) fn parse(&self) -> CrlResult<CertificateRevocationList<'_>> {
        let (_, crl) = CertificateRevocationList::from_der(&self.raw)
            .map_err(|e| CrlError::Parse(e.into()))?;
        Ok(crl)
    }

    pub fn serials(&self) -> impl Iterator<Item = &BigUint> {
        self.entries.iter().map(|entry| &entry.serial)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
