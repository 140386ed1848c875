use thiserror::Error;
use x509_parser::prelude::X509Error;

use super::idp::IdpError;

/// CRL-related errors
#[derive(Error, Debug)]
pub enum CrlError {
    #[error("CRL parsing failed: {0}")]
    Parse(#[from] X509Error),

    #[error("CRL has no CRL number")]
    MissingNumber,

    #[error("CRL has no authority key identifier")]
    MissingAuthorityKeyId,

    #[error(transparent)]
    IssuingDistributionPoint(#[from] IdpError),

    #[error("CRLs were not issued by same issuer")]
    MismatchedIssuer,

    #[error("old CRL does not precede new CRL: {0}")]
    OutOfOrder(String),
}

/// Convenient Result type alias
pub type CrlResult<T> = Result<T, CrlError>;
