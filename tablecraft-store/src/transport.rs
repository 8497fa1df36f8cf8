//! Transport layer abstraction.
//!
//! Everything above this trait is store-agnostic: coordinators issue
//! requests and receive either the raw response or a classified
//! [`TransportError`]. The AWS adapter and [`MemoryStore`](crate::MemoryStore)
//! implement it.

use crate::error::TransportResult;
use crate::request::{
    BatchGet, BatchGetOutput, BatchWrite, BatchWriteOutput, DeleteItem, GetItem, PutItem, Query,
    QueryOutput, TransactGet, TransactWrite, UpdateItem,
};
use async_trait::async_trait;
use std::sync::Arc;
use tablecraft_types::Item;

/// A client for one store endpoint.
#[async_trait]
pub trait StoreTransport: Send + Sync {
    /// Short name used in logs, e.g. `dynamodb` or `memory`.
    fn name(&self) -> &'static str;

    async fn get_item(&self, request: GetItem) -> TransportResult<Option<Item>>;

    async fn put_item(&self, request: PutItem) -> TransportResult<()>;

    /// Returns the item as it is after the update.
    async fn update_item(&self, request: UpdateItem) -> TransportResult<Item>;

    /// Returns the deleted item, if there was one.
    async fn delete_item(&self, request: DeleteItem) -> TransportResult<Option<Item>>;

    async fn query(&self, request: Query) -> TransportResult<QueryOutput>;

    /// At most 100 keys per request.
    async fn batch_get(&self, request: BatchGet) -> TransportResult<BatchGetOutput>;

    /// At most 25 writes per request.
    async fn batch_write(&self, request: BatchWrite) -> TransportResult<BatchWriteOutput>;

    /// All-or-nothing. Cancellations arrive as
    /// [`TransportError::TransactionCanceled`](crate::TransportError::TransactionCanceled).
    async fn transact_write(&self, request: TransactWrite) -> TransportResult<()>;

    /// A consistent snapshot, positionally aligned with the requested keys.
    async fn transact_get(&self, request: TransactGet) -> TransportResult<Vec<Option<Item>>>;
}

/// Shared handle to a transport, as cached by the connection pool.
pub type SharedTransport = Arc<dyn StoreTransport>;
