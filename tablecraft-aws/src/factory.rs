//! Builds pooled DynamoDB clients.

use crate::transport::DynamoDbTransport;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client;
use aws_smithy_types::timeout::TimeoutConfig;
use aws_types::region::Region;
use std::sync::Arc;
use std::time::Duration;
use tablecraft_store::{HandleFactory, PoolKey, SharedTransport, StoreConfig, StoreResult};
use tracing::info;

/// [`HandleFactory`] producing [`DynamoDbTransport`]s.
///
/// Region, profile and endpoint come from the [`PoolKey`]; anything the key
/// leaves unset falls back to the SDK's default provider chains.
#[derive(Debug, Clone, Default)]
pub struct DynamoDbClientFactory {
    timeout: Option<Duration>,
}

impl DynamoDbClientFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `config`'s per-call timeout to every client built.
    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            timeout: config.timeout(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Loads the shared SDK configuration for `key` and builds a client.
    pub async fn client(&self, key: &PoolKey) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &key.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &key.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(endpoint) = &key.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(timeout) = self.timeout {
            loader = loader.timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build());
        }
        let sdk_config = loader.load().await;
        Client::new(&sdk_config)
    }
}

#[async_trait]
impl HandleFactory<SharedTransport> for DynamoDbClientFactory {
    async fn create(&self, key: &PoolKey) -> StoreResult<SharedTransport> {
        let client = self.client(key).await;
        info!(key = %key, "created DynamoDB client");
        Ok(Arc::new(DynamoDbTransport::from_client(client)))
    }
}
