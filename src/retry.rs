//! HTTP GET with a fixed backoff schedule.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

pub const USER_AGENT: &str = "CRL-Monitor/0.1";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {status} from {url} ({body})")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
}

impl FetchError {
    /// Transport failures and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status { status, .. } => status.is_server_error(),
        }
    }
}

/// Delays slept after each failed attempt.
///
/// One attempt is made per entry. The final entry should be zero so the last
/// error is returned without sleeping first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from_millis(&[1000, 1000, 2000, 3000, 0])
    }
}

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_millis(millis: &[u64]) -> Self {
        Self::new(millis.iter().copied().map(Duration::from_millis).collect())
    }

    /// `attempts` tries with no sleeping in between
    pub fn immediate(attempts: usize) -> Self {
        Self::new(vec![Duration::ZERO; attempts.max(1)])
    }

    pub fn attempts(&self) -> usize {
        self.delays.len().max(1)
    }

    pub fn delay(&self, attempt: usize) -> Duration {
        self.delays.get(attempt).copied().unwrap_or_default()
    }
}

async fn get_body(client: &Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await?;

    let status = response.status();
    let body = response.bytes().await?;
    if status != StatusCode::OK {
        return Err(FetchError::Status {
            url: url.to_string(),
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }
    Ok(body.to_vec())
}

/// GET `url`, retrying transport errors and 5xx responses on `schedule`.
///
/// Any other non-200 status is returned immediately.
pub async fn get(
    client: &Client,
    url: &str,
    schedule: &RetrySchedule,
) -> Result<Vec<u8>, FetchError> {
    let attempts = schedule.attempts();
    let mut attempt = 0;
    loop {
        match get_body(client, url).await {
            Ok(body) => return Ok(body),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = schedule.delay(attempt);
                warn!(url, attempt, error = %e, "GET failed, retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(url, attempt, error = %e, "GET failed");
                return Err(e);
            }
        }
    }
}
