//! DynamoDB adapter for tablecraft.
//!
//! [`DynamoDbTransport`] implements [`StoreTransport`](tablecraft_store::StoreTransport)
//! on the AWS SDK client and classifies SDK failures into
//! [`TransportError`](tablecraft_store::TransportError)s. [`DynamoDbClientFactory`]
//! plugs into the [`ConnectionPool`] so clients are built once per
//! region, profile and endpoint.
//!
//! ```no_run
//! # async fn run() -> tablecraft_store::StoreResult<()> {
//! use tablecraft_store::{StoreClient, StoreConfig};
//!
//! let config = StoreConfig::from_toml_str("region = \"eu-west-1\"\ntable = \"app\"")?;
//! let pool = tablecraft_aws::pool(&config);
//! let client = StoreClient::connect(&pool, config).await?;
//! # let _ = client;
//! # Ok(())
//! # }
//! ```

pub mod convert;
pub mod error;
mod factory;
mod transport;

pub use factory::DynamoDbClientFactory;
pub use transport::DynamoDbTransport;

use std::sync::Arc;
use tablecraft_store::{ConnectionPool, SharedTransport, StoreConfig};

/// A connection pool building DynamoDB clients with `config`'s timeout.
#[must_use]
pub fn pool(config: &StoreConfig) -> ConnectionPool<SharedTransport> {
    ConnectionPool::new(Arc::new(DynamoDbClientFactory::from_config(config)))
}
