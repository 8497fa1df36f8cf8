//! Store configuration.
//!
//! A plain serde structure. Loaders may parse it from TOML with
//! [`StoreConfig::from_toml_str`]; nothing here reads the environment.
//!
//! ```toml
//! region = "eu-west-1"
//! table = "app"
//! batch_write_chunk_size = 10
//!
//! [tables]
//! audit = "app-audit"
//!
//! [retry]
//! max_attempts = 8
//! base_delay_ms = 100
//! ```

use crate::batch::{MAX_BATCH_GET, MAX_BATCH_WRITE};
use crate::error::{StoreError, StoreResult};
use crate::pool::PoolKey;
use crate::retry::RetryPolicy;
use crate::transaction::MAX_TRANSACTION_ITEMS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tablecraft_model::{CodecOptions, MergePolicy};

/// Service name used in pool keys.
pub const SERVICE_NAME: &str = "dynamodb";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub region: Option<String>,
    /// Named credential profile; resolution is left to the client factory.
    pub profile: Option<String>,
    /// Endpoint override, e.g. a local emulator.
    pub endpoint: Option<String>,
    /// Table used by entity types without an entry in `tables`.
    pub table: Option<String>,
    /// Entity type to table name.
    pub tables: BTreeMap<String, String>,
    pub batch_write_chunk_size: usize,
    pub batch_get_chunk_size: usize,
    pub transaction_item_cap: usize,
    pub retry: RetryPolicy,
    pub merge_policy: MergePolicy,
    /// Per-call timeout handed to the client.
    pub timeout_ms: Option<u64>,
    pub codec: CodecOptions,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            endpoint: None,
            table: None,
            tables: BTreeMap::new(),
            batch_write_chunk_size: MAX_BATCH_WRITE,
            batch_get_chunk_size: MAX_BATCH_GET,
            transaction_item_cap: MAX_TRANSACTION_ITEMS,
            retry: RetryPolicy::default(),
            merge_policy: MergePolicy::default(),
            timeout_ms: None,
            codec: CodecOptions::default(),
        }
    }
}

impl StoreConfig {
    /// Parses and validates a TOML document. Missing keys take defaults.
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| StoreError::config(format!("cannot parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks limits the store enforces.
    pub fn validate(&self) -> StoreResult<()> {
        if !(1..=MAX_BATCH_WRITE).contains(&self.batch_write_chunk_size) {
            return Err(StoreError::config(format!(
                "batch_write_chunk_size must be between 1 and {MAX_BATCH_WRITE}, got {}",
                self.batch_write_chunk_size
            )));
        }
        if !(1..=MAX_BATCH_GET).contains(&self.batch_get_chunk_size) {
            return Err(StoreError::config(format!(
                "batch_get_chunk_size must be between 1 and {MAX_BATCH_GET}, got {}",
                self.batch_get_chunk_size
            )));
        }
        if !(1..=MAX_TRANSACTION_ITEMS).contains(&self.transaction_item_cap) {
            return Err(StoreError::config(format!(
                "transaction_item_cap must be between 1 and {MAX_TRANSACTION_ITEMS}, got {}",
                self.transaction_item_cap
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(StoreError::config("retry.max_attempts must be at least 1"));
        }
        if self.tables.values().chain(self.table.iter()).any(String::is_empty) {
            return Err(StoreError::config("table names must not be empty"));
        }
        Ok(())
    }

    /// Table for `entity_type`: its own entry, else the default table.
    pub fn table_for(&self, entity_type: &str) -> StoreResult<&str> {
        self.tables
            .get(entity_type)
            .or(self.table.as_ref())
            .map(String::as_str)
            .ok_or_else(|| StoreError::missing_parameter(format!("table for `{entity_type}`")))
    }

    /// The pool key for the client this configuration describes.
    #[must_use]
    pub fn pool_key(&self) -> PoolKey {
        PoolKey {
            service: SERVICE_NAME.to_string(),
            region: self.region.clone(),
            profile: self.profile.clone(),
            endpoint: self.endpoint.clone(),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
