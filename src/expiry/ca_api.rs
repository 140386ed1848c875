use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use ::time::OffsetDateTime;
use tracing::debug;
use url::Url;
use x509_parser::num_bigint::BigUint;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

use super::{ExpirationOracle, OracleError};
use crate::retry::{self, FetchError, RetrySchedule};
use crate::serial::SerialKey;

#[derive(Debug, Deserialize)]
struct NotAfterResponse {
    #[serde(rename = "notAfter", with = "::time::serde::rfc3339")]
    not_after: OffsetDateTime,
}

/// Fetches certificates from the CA's unauthenticated certificate endpoint.
///
/// Requests go to `{base_url}/{serial}` where the serial is zero-padded hex.
#[derive(Debug, Clone)]
pub struct CaApiOracle {
    client: Client,
    base_url: String,
    schedule: RetrySchedule,
}

impl CaApiOracle {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        schedule: RetrySchedule,
    ) -> Result<Self, OracleError> {
        let base_url = base_url.into();
        Url::parse(&base_url)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, schedule))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, schedule: RetrySchedule) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            schedule,
        }
    }

    pub fn url_for(&self, serial: &BigUint) -> String {
        format!("{}/{}", self.base_url, SerialKey::from_biguint(serial))
    }
}

#[async_trait]
impl ExpirationOracle for CaApiOracle {
    async fn fetch_not_after(&self, serial: &BigUint) -> Result<OffsetDateTime, OracleError> {
        let url = self.url_for(serial);
        debug!(%url, "fetching serial");

        let body = match retry::get(&self.client, &url, &self.schedule).await {
            Ok(body) => body,
            Err(FetchError::Status { status, .. }) if status == StatusCode::NOT_FOUND => {
                return Err(OracleError::NotFound(serial.clone()));
            }
            Err(FetchError::Status { status, body, .. }) if !status.is_server_error() => {
                return Err(OracleError::Rejected {
                    serial: serial.clone(),
                    status,
                    body,
                });
            }
            Err(source) => {
                return Err(OracleError::Unreachable {
                    serial: serial.clone(),
                    source,
                });
            }
        };

        parse_not_after(&body).map_err(|reason| OracleError::MalformedResponse {
            serial: serial.clone(),
            reason,
        })
    }
}

/// Extract notAfter from either a PEM certificate or a `{"notAfter": ...}`
/// JSON document.
pub fn parse_not_after(body: &[u8]) -> Result<OffsetDateTime, String> {
    if body.trim_ascii_start().starts_with(b"-----BEGIN") {
        let (_, pem) = parse_x509_pem(body).map_err(|e| e.to_string())?;
        let (_, cert) = X509Certificate::from_der(&pem.contents).map_err(|e| e.to_string())?;
        return Ok(cert.validity().not_after.to_datetime());
    }

    let response: NotAfterResponse = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    Ok(response.not_after)
}
