//! Sources of truth for certificate expiration times.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use time::OffsetDateTime;
use x509_parser::num_bigint::BigUint;

use crate::retry::FetchError;

mod ca_api;
mod static_oracle;

pub use ca_api::{CaApiOracle, parse_not_after};
pub use static_oracle::StaticOracle;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("unknown serial {0}")]
    NotFound(BigUint),

    #[error("expiration of serial {serial} unavailable: {source}")]
    Unreachable {
        serial: BigUint,
        #[source]
        source: FetchError,
    },

    #[error("error fetching certificate with serial {serial}: http status {status} ({body})")]
    Rejected {
        serial: BigUint,
        status: StatusCode,
        body: String,
    },

    #[error("malformed expiration response for serial {serial}: {reason}")]
    MalformedResponse { serial: BigUint, reason: String },

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid CA API base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
}

/// Looks up the notAfter time of a certificate by serial.
#[async_trait]
pub trait ExpirationOracle: Send + Sync {
    async fn fetch_not_after(&self, serial: &BigUint) -> Result<OffsetDateTime, OracleError>;
}
