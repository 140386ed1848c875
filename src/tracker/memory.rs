use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use super::{CertificateTracker, Result, TrackedCertificate};
use crate::serial::SerialKey;

/// An in-memory certificate tracker.
///
/// Useful for testing and development.
#[derive(Debug, Default, Clone)]
pub struct MemoryTracker {
    certificates: Arc<DashMap<SerialKey, TrackedCertificate>>,
}

#[async_trait]
impl CertificateTracker for MemoryTracker {
    async fn add(
        &self,
        serial_number: &[u8],
        revocation_time: OffsetDateTime,
        crl_distribution_point: Option<&str>,
    ) -> Result<()> {
        let cert = TrackedCertificate::new(serial_number, revocation_time, crl_distribution_point);
        self.certificates.insert(cert.key(), cert);
        Ok(())
    }

    async fn delete_many(&self, serial_numbers: &[Vec<u8>]) -> Result<()> {
        for serial in serial_numbers {
            self.certificates.remove(&SerialKey::from_bytes(serial));
        }
        Ok(())
    }

    async fn get_all(&self) -> Result<HashMap<SerialKey, TrackedCertificate>> {
        Ok(self
            .certificates
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }
}
