//! Chunked batch execution with unprocessed-item recovery.
//!
//! The store caps batch requests (25 writes, 100 gets) and may answer any
//! request with part of it left unprocessed. [`BatchCoordinator`] splits
//! operations into chunks, collects the unprocessed remainders of a round
//! and resubmits them as a new round after a backoff delay. Whatever is
//! still unprocessed after the last round is reported in
//! [`BatchResult::failed`], not as an error.

use crate::error::{StoreError, StoreResult};
use crate::request::{BatchGet, BatchWrite, TableItem, TableKey, WriteRequest};
use crate::retry::{self, RetryPolicy};
use crate::transport::SharedTransport;
use tablecraft_types::Item;
use tracing::{debug, info, warn};

/// Most writes the store accepts in one batch-write request.
pub const MAX_BATCH_WRITE: usize = 25;

/// Most keys the store accepts in one batch-get request.
pub const MAX_BATCH_GET: usize = 100;

/// One operation of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Get { table: String, key: Item },
    Put { table: String, item: Item },
    Delete { table: String, key: Item },
}

impl BatchOperation {
    pub fn get(table: impl Into<String>, key: Item) -> Self {
        Self::Get { table: table.into(), key }
    }

    pub fn put(table: impl Into<String>, item: Item) -> Self {
        Self::Put { table: table.into(), item }
    }

    pub fn delete(table: impl Into<String>, key: Item) -> Self {
        Self::Delete { table: table.into(), key }
    }

    #[must_use]
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Get { .. })
    }
}

impl From<WriteRequest> for BatchOperation {
    fn from(write: WriteRequest) -> Self {
        match write {
            WriteRequest::Put { table, item } => Self::Put { table, item },
            WriteRequest::Delete { table, key } => Self::Delete { table, key },
        }
    }
}

impl From<TableKey> for BatchOperation {
    fn from(key: TableKey) -> Self {
        Self::Get { table: key.table, key: key.key }
    }
}

/// Outcome of [`BatchCoordinator::execute_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Operations the store processed. For gets this does not imply the item
    /// existed.
    pub succeeded: Vec<BatchOperation>,
    /// Items fetched by get operations.
    pub items: Vec<TableItem>,
    /// Operations still unprocessed after the last round.
    pub failed: Vec<BatchOperation>,
    /// Rounds executed, the first one included.
    pub rounds: u32,
    /// Requests sent, retries of throttled requests excluded.
    pub requests: u32,
}

impl BatchResult {
    /// Whether every operation was processed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs batches of gets, puts and deletes against one transport.
#[derive(Clone)]
pub struct BatchCoordinator {
    transport: SharedTransport,
    retry: RetryPolicy,
}

impl BatchCoordinator {
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Executes `operations` in chunks of at most `chunk_size`.
    ///
    /// Gets go through batch-get requests and run first; puts and deletes go
    /// through batch-write requests. `chunk_size` must be at least 1 and at
    /// most [`MAX_BATCH_WRITE`] when there are writes, [`MAX_BATCH_GET`] when
    /// there are only gets.
    pub async fn execute_batch(
        &self,
        operations: Vec<BatchOperation>,
        chunk_size: usize,
    ) -> StoreResult<BatchResult> {
        let (gets, writes): (Vec<_>, Vec<_>) =
            operations.into_iter().partition(|op| !op.is_write());
        validate_chunk_size(chunk_size, !gets.is_empty(), !writes.is_empty())?;

        let mut result = BatchResult::default();
        let keys = gets
            .into_iter()
            .filter_map(|op| match op {
                BatchOperation::Get { table, key } => Some(TableKey { table, key }),
                _ => None,
            })
            .collect::<Vec<_>>();
        let write_requests = writes
            .into_iter()
            .filter_map(|op| match op {
                BatchOperation::Put { table, item } => Some(WriteRequest::Put { table, item }),
                BatchOperation::Delete { table, key } => Some(WriteRequest::Delete { table, key }),
                BatchOperation::Get { .. } => None,
            })
            .collect::<Vec<_>>();

        if !keys.is_empty() {
            self.run_gets(keys, chunk_size, &mut result).await?;
        }
        if !write_requests.is_empty() {
            self.run_writes(write_requests, chunk_size, &mut result).await?;
        }

        if result.is_complete() {
            info!(
                succeeded = result.succeeded.len(),
                rounds = result.rounds,
                "batch complete"
            );
        } else {
            warn!(
                succeeded = result.succeeded.len(),
                failed = result.failed.len(),
                rounds = result.rounds,
                "batch finished with unprocessed operations"
            );
        }
        Ok(result)
    }

    async fn run_gets(
        &self,
        keys: Vec<TableKey>,
        chunk_size: usize,
        result: &mut BatchResult,
    ) -> StoreResult<()> {
        let mut pending = keys;
        let mut round = 0;
        loop {
            let mut unprocessed = Vec::new();
            for (chunk_index, chunk) in pending.chunks(chunk_size).enumerate() {
                let request = BatchGet { keys: chunk.to_vec() };
                debug!(round, chunk = chunk_index, keys = chunk.len(), "batch get");
                result.requests += 1;
                let output = self
                    .retry
                    .run("batch_get", retry::transient, || {
                        self.transport.batch_get(request.clone())
                    })
                    .await
                    .map_err(|e| aborted(round, chunk_index, result, e.into()))?;
                result.succeeded.extend(
                    chunk
                        .iter()
                        .filter(|key| !output.unprocessed.contains(key))
                        .cloned()
                        .map(BatchOperation::from),
                );
                result.items.extend(output.items);
                unprocessed.extend(output.unprocessed);
            }
            result.rounds = result.rounds.max(round + 1);
            if unprocessed.is_empty() {
                return Ok(());
            }
            if round >= self.retry.max_rounds {
                result.failed.extend(unprocessed.into_iter().map(BatchOperation::from));
                return Ok(());
            }
            let delay = self.retry.delay_for(round);
            debug!(round, remaining = unprocessed.len(), delay_ms = delay.as_millis() as u64, "resubmitting unprocessed keys");
            tokio::time::sleep(delay).await;
            round += 1;
            pending = unprocessed;
        }
    }

    async fn run_writes(
        &self,
        writes: Vec<WriteRequest>,
        chunk_size: usize,
        result: &mut BatchResult,
    ) -> StoreResult<()> {
        let mut pending = writes;
        let mut round = 0;
        loop {
            let mut unprocessed = Vec::new();
            for (chunk_index, chunk) in pending.chunks(chunk_size).enumerate() {
                let request = BatchWrite { writes: chunk.to_vec() };
                debug!(round, chunk = chunk_index, writes = chunk.len(), "batch write");
                result.requests += 1;
                let output = self
                    .retry
                    .run("batch_write", retry::throttling, || {
                        self.transport.batch_write(request.clone())
                    })
                    .await
                    .map_err(|e| aborted(round, chunk_index, result, e.into()))?;
                result.succeeded.extend(
                    chunk
                        .iter()
                        .filter(|write| !output.unprocessed.contains(write))
                        .cloned()
                        .map(BatchOperation::from),
                );
                unprocessed.extend(output.unprocessed);
            }
            result.rounds = result.rounds.max(round + 1);
            if unprocessed.is_empty() {
                return Ok(());
            }
            if round >= self.retry.max_rounds {
                result.failed.extend(unprocessed.into_iter().map(BatchOperation::from));
                return Ok(());
            }
            let delay = self.retry.delay_for(round);
            debug!(round, remaining = unprocessed.len(), delay_ms = delay.as_millis() as u64, "resubmitting unprocessed writes");
            tokio::time::sleep(delay).await;
            round += 1;
            pending = unprocessed;
        }
    }
}

fn validate_chunk_size(chunk_size: usize, has_gets: bool, has_writes: bool) -> StoreResult<()> {
    let limit = if has_writes { MAX_BATCH_WRITE } else { MAX_BATCH_GET };
    if chunk_size == 0 || chunk_size > limit {
        let kind = if has_writes { "writes" } else if has_gets { "gets" } else { "operations" };
        return Err(StoreError::invalid_parameter(
            "chunk_size",
            format!("must be between 1 and {limit} for {kind}, got {chunk_size}"),
        ));
    }
    Ok(())
}

fn aborted(round: u32, chunk_index: usize, result: &BatchResult, source: StoreError) -> StoreError {
    warn!(round, chunk = chunk_index, error = %source, "batch aborted");
    StoreError::BatchAborted {
        round,
        chunk_index,
        succeeded: result.succeeded.len(),
        source: Box::new(source),
    }
}
