//! Entry point tying configuration, the connection pool and the
//! coordinators together.

use crate::batch::{BatchCoordinator, BatchOperation, BatchResult};
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::pool::ConnectionPool;
use crate::table::EntityStore;
use crate::transaction::{
    TransactionCoordinator, TransactionOperation, TransactionOptions, TransactionResult,
};
use crate::transport::SharedTransport;
use std::fmt;
use std::sync::Arc;
use tablecraft_model::{Entity, EntitySchema};
use tracing::debug;

/// A configured client for one store endpoint.
#[derive(Clone)]
pub struct StoreClient {
    transport: SharedTransport,
    config: Arc<StoreConfig>,
}

impl fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreClient")
            .field("transport", &self.transport.name())
            .field("config", &self.config)
            .finish()
    }
}

impl StoreClient {
    /// Wraps a transport directly, bypassing the pool.
    pub fn new(transport: SharedTransport, config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            config: Arc::new(config),
        })
    }

    /// Takes the transport for `config`'s endpoint from `pool`, creating it
    /// on first use.
    pub async fn connect(pool: &ConnectionPool<SharedTransport>, config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let key = config.pool_key();
        let transport = pool.get_handle(&key).await?;
        debug!(key = %key, transport = transport.name(), "store client connected");
        Ok(Self {
            transport,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    pub fn batch(&self) -> BatchCoordinator {
        BatchCoordinator::new(Arc::clone(&self.transport)).with_retry(self.config.retry)
    }

    pub fn transactions(&self) -> TransactionCoordinator {
        TransactionCoordinator::new(Arc::clone(&self.transport))
            .with_retry(self.config.retry)
            .with_item_cap(self.config.transaction_item_cap)
    }

    /// Runs a batch with the configured chunk size: the write chunk size when
    /// there are writes, the get chunk size otherwise.
    pub async fn execute_batch(&self, operations: Vec<BatchOperation>) -> StoreResult<BatchResult> {
        let chunk_size = if operations.iter().any(BatchOperation::is_write) {
            self.config.batch_write_chunk_size
        } else {
            self.config.batch_get_chunk_size
        };
        self.batch().execute_batch(operations, chunk_size).await
    }

    pub async fn execute_transaction(
        &self,
        operations: Vec<TransactionOperation>,
        options: TransactionOptions,
    ) -> StoreResult<TransactionResult> {
        self.transactions().execute_transaction(operations, options).await
    }

    /// An [`EntityStore`] for `schema`'s entity type, in the table the
    /// configuration assigns to it.
    pub fn entities<E: Entity>(&self, schema: Arc<EntitySchema<E>>) -> StoreResult<EntityStore<E>> {
        let table = self.config.table_for(schema.entity_type())?.to_string();
        Ok(EntityStore::new(Arc::clone(&self.transport), schema, table)
            .with_retry(self.config.retry)
            .with_codec_options(self.config.codec)
            .with_merge_policy(self.config.merge_policy))
    }
}
