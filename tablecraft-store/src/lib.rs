//! Store orchestration for tablecraft.
//!
//! Everything that talks to the store goes through the [`StoreTransport`]
//! trait:
//! - [`ConnectionPool`]: one client handle per endpoint configuration
//! - [`BatchCoordinator`]: chunked batch gets and writes with unprocessed-item recovery
//! - [`TransactionCoordinator`]: bounded atomic reads and writes with idempotency tokens
//! - [`EntityStore`]: typed single-item operations, merges and reindexing
//! - [`MemoryStore`]: an in-process store for tests and local development

mod batch;
mod client;
mod config;
mod error;
mod memory;
mod pool;
mod reindex;
mod request;
mod retry;
mod table;
mod transaction;
mod transport;

pub use batch::{BatchCoordinator, BatchOperation, BatchResult, MAX_BATCH_GET, MAX_BATCH_WRITE};
pub use client::StoreClient;
pub use config::{SERVICE_NAME, StoreConfig};
pub use error::{
    CancellationCode, CancellationReason, StoreError, StoreResult, TransportError, TransportResult,
};
pub use memory::{IDEMPOTENCY_WINDOW, MemoryStore, Operation, UnprocessedPredicate};
pub use pool::{ConnectionPool, HandleFactory, PoolKey, PoolStats};
pub use reindex::{ReindexOptions, ReindexPlan};
pub use request::{
    BatchGet, BatchGetOutput, BatchWrite, BatchWriteOutput, DeleteItem, GetItem, PutItem, Query,
    QueryOutput, TableItem, TableKey, TransactGet, TransactWrite, TransactWriteItem, UpdateItem,
    WriteRequest,
};
pub use retry::RetryPolicy;
pub use table::{EntityStore, QueryOptions, QueryPage};
pub use transaction::{
    MAX_TRANSACTION_ITEMS, TransactionCoordinator, TransactionOperation, TransactionOptions,
    TransactionResult,
};
pub use transport::{SharedTransport, StoreTransport};
