use std::{collections::HashMap, path::PathBuf, time::Duration};

use config::{Config as ConfigLib, ConfigError, Environment, File};
use redis::{
    Client as RedisClient, RedisResult,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::checker::CheckerConfig;
use crate::churner::ChurnerConfig;
use crate::crl::Validator;
use crate::retry::RetrySchedule;
use crate::tracker::DEFAULT_TABLE;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub checker: CheckerSettings,
    pub oracle: OracleSettings,
    pub storage: StorageSettings,
    pub tracker: TrackerSettings,
    pub churner: ChurnerSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckerSettings {
    pub bucket: String,
    /// PEM or DER files of every issuer whose CRLs are checked
    pub issuer_paths: Vec<PathBuf>,
    pub crl_age_limit_secs: u64,
    /// 0 looks up every removed serial
    pub max_fetch: usize,
    pub shards: u32,
    #[serde(default)]
    pub idp_base_url: Option<String>,
    pub max_reported_removals: usize,
}

impl CheckerSettings {
    pub fn validator(&self) -> Validator {
        Validator::new(seconds(self.crl_age_limit_secs))
    }

    pub fn checker_config(&self) -> CheckerConfig {
        CheckerConfig {
            max_fetch: self.max_fetch,
            idp_base_url: self.idp_base_url.clone(),
            max_reported_removals: self.max_reported_removals,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub backoff_ms: Vec<u64>,
}

impl OracleSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule::from_millis(&self.backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub root: PathBuf,
    pub page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerSettings {
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    pub table: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChurnerSettings {
    pub base_domain: String,
    pub revoke_deadline_secs: u64,
}

impl ChurnerSettings {
    pub fn churner_config(&self, crl_age_limit_secs: u64) -> ChurnerConfig {
        ChurnerConfig {
            base_domain: self.base_domain.clone(),
            revoke_deadline: seconds(self.revoke_deadline_secs),
            crl_age_limit: seconds(crl_age_limit_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub uri: SecretString,
}

impl RedisConfig {
    /// Establishes a new Redis connection based on the provided URI.
    ///
    /// - To enable TLS, the URI must use the `rediss://` scheme.
    /// - To enable insecure TLS, the URI must use the `rediss://` scheme and end with `/#insecure`.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn start(&self) -> RedisResult<ConnectionManager> {
        let client = RedisClient::open(self.uri.expose_secret())?;
        let config = ConnectionManagerConfig::new().set_connection_timeout(Duration::from_secs(60));
        client.get_connection_manager_with_config(config).await
    }
}

fn seconds(secs: u64) -> time::Duration {
    time::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("checker.bucket", "crls")?
            .set_default("checker.issuer_paths", Vec::<String>::new())?
            .set_default("checker.crl_age_limit_secs", 86400)?
            .set_default("checker.max_fetch", 0)?
            .set_default("checker.shards", 128)?
            .set_default("checker.max_reported_removals", 50)?
            .set_default("oracle.base_url", "http://localhost:4001/get/cert")?
            .set_default("oracle.timeout_secs", 30)?
            .set_default("oracle.backoff_ms", vec![1000, 1000, 2000, 3000, 0])?
            .set_default("storage.root", "data")?
            .set_default("storage.page_size", 1000)?
            .set_default("tracker.table", DEFAULT_TABLE)?
            .set_default("churner.base_domain", "churn.example")?
            .set_default("churner.revoke_deadline_secs", 86400)?
            .add_source(File::with_name("config/settings").required(false));

        // Explicit overrides replace the system environment so tests don't
        // see each other's variables
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // e.g. APP_CHECKER__BUCKET or APP_TRACKER__REDIS__URI
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("checker.issuer_paths")
                    .with_list_parse_key("oracle.backoff_ms")
                    .try_parsing(true),
            );
        }

        builder.build()?.try_deserialize()
    }
}
