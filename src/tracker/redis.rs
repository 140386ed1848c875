use std::collections::HashMap;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use time::OffsetDateTime;
use tracing::warn;

use super::{CertificateTracker, Result, TrackedCertificate};
use crate::serial::SerialKey;

/// A Redis certificate tracker.
///
/// All certificates live in one hash named after the table. Fields are
/// [`SerialKey`]s and values are JSON encoded [`TrackedCertificate`]s.
#[derive(Clone)]
pub struct RedisTracker {
    conn: ConnectionManager,
    table: String,
}

impl RedisTracker {
    /// Creates a new Redis tracker from a connection manager.
    pub fn new(conn: ConnectionManager, table: impl Into<String>) -> Self {
        Self {
            conn,
            table: table.into(),
        }
    }
}

#[async_trait]
impl CertificateTracker for RedisTracker {
    async fn add(
        &self,
        serial_number: &[u8],
        revocation_time: OffsetDateTime,
        crl_distribution_point: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let cert = TrackedCertificate::new(serial_number, revocation_time, crl_distribution_point);
        let value = serde_json::to_string(&cert)?;
        let _: () = conn.hset(&self.table, cert.key().as_str(), value).await?;
        Ok(())
    }

    async fn delete_many(&self, serial_numbers: &[Vec<u8>]) -> Result<()> {
        if serial_numbers.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let fields: Vec<String> = serial_numbers
            .iter()
            .map(|serial| SerialKey::from_bytes(serial).to_string())
            .collect();
        let _: usize = conn.hdel(&self.table, fields).await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<HashMap<SerialKey, TrackedCertificate>> {
        let mut conn = self.conn.clone();
        let entries: HashMap<String, String> = conn.hgetall(&self.table).await?;

        let mut certs = HashMap::with_capacity(entries.len());
        for (field, value) in entries {
            let cert: TrackedCertificate = serde_json::from_str(&value)?;
            let key = cert.key();
            if key.as_str() != field {
                warn!(field = %field, key = %key, "tracked certificate stored under unexpected field");
            }
            certs.insert(key, cert);
        }
        Ok(certs)
    }
}
