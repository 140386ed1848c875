use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use x509_parser::num_bigint::BigUint;

use super::{ExpirationOracle, OracleError};
use crate::serial::SerialKey;

/// An in-memory expiration oracle.
///
/// Useful for testing and development.
#[derive(Debug, Default, Clone)]
pub struct StaticOracle {
    not_after: Arc<DashMap<SerialKey, OffsetDateTime>>,
    lookups: Arc<AtomicUsize>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, serial: impl Into<BigUint>, not_after: OffsetDateTime) {
        self.not_after
            .insert(SerialKey::from_biguint(&serial.into()), not_after);
    }

    /// Chainable form of [`insert`](Self::insert)
    pub fn with(self, serial: impl Into<BigUint>, not_after: OffsetDateTime) -> Self {
        self.insert(serial, not_after);
        self
    }

    /// Number of lookups served so far, including failed ones
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ExpirationOracle for StaticOracle {
    async fn fetch_not_after(&self, serial: &BigUint) -> Result<OffsetDateTime, OracleError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.not_after
            .get(&SerialKey::from_biguint(serial))
            .map(|entry| *entry.value())
            .ok_or_else(|| OracleError::NotFound(serial.clone()))
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[tokio::test]
    async fn test_lookup() {
        let oracle = StaticOracle::new().with(444444u32, datetime!(2024-01-01 00:00 UTC));

        assert_eq!(
            oracle.fetch_not_after(&BigUint::from(444444u32)).await.unwrap(),
            datetime!(2024-01-01 00:00 UTC)
        );
        let err = oracle
            .fetch_not_after(&BigUint::from(3u32))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown serial 3");
        assert_eq!(oracle.lookups(), 2);
    }
}
