//! Atomic multi-item operations.
//!
//! A transaction is either all reads or all writes, never both. Writes carry
//! an idempotency token that stays the same across every internal retry, so
//! a retry after a lost response cannot apply the writes twice.

use crate::error::{CancellationCode, StoreError, StoreResult, TransportError};
use crate::request::{
    DeleteItem, PutItem, TableKey, TransactGet, TransactWrite, TransactWriteItem, UpdateItem,
};
use crate::retry::{self, RetryPolicy};
use crate::transport::SharedTransport;
use tablecraft_types::{Expression, Item};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Most operations the store accepts in one transaction.
pub const MAX_TRANSACTION_ITEMS: usize = 100;

/// One operation of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOperation {
    Get {
        table: String,
        key: Item,
    },
    Put {
        table: String,
        item: Item,
        condition: Option<Expression>,
    },
    Update {
        table: String,
        key: Item,
        update: Expression,
        condition: Option<Expression>,
    },
    Delete {
        table: String,
        key: Item,
        condition: Option<Expression>,
    },
    /// Asserts a condition on an item without writing it.
    ConditionCheck {
        table: String,
        key: Item,
        condition: Expression,
    },
}

impl TransactionOperation {
    pub fn get(table: impl Into<String>, key: Item) -> Self {
        Self::Get { table: table.into(), key }
    }

    pub fn put(table: impl Into<String>, item: Item) -> Self {
        Self::Put {
            table: table.into(),
            item,
            condition: None,
        }
    }

    pub fn update(table: impl Into<String>, key: Item, update: Expression) -> Self {
        Self::Update {
            table: table.into(),
            key,
            update,
            condition: None,
        }
    }

    pub fn delete(table: impl Into<String>, key: Item) -> Self {
        Self::Delete {
            table: table.into(),
            key,
            condition: None,
        }
    }

    pub fn condition_check(table: impl Into<String>, key: Item, condition: Expression) -> Self {
        Self::ConditionCheck {
            table: table.into(),
            key,
            condition,
        }
    }

    /// Attaches a condition to a write. Gets are returned unchanged; a
    /// condition check has its condition replaced.
    #[must_use]
    pub fn with_condition(mut self, expression: Expression) -> Self {
        match &mut self {
            Self::Get { .. } => {}
            Self::Put { condition, .. }
            | Self::Update { condition, .. }
            | Self::Delete { condition, .. } => *condition = Some(expression),
            Self::ConditionCheck { condition, .. } => *condition = expression,
        }
        self
    }

    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Get { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Idempotency token for a write transaction. Generated when absent.
    pub client_request_token: Option<String>,
}

impl TransactionOptions {
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            client_request_token: Some(token.into()),
        }
    }
}

/// Outcome of [`TransactionCoordinator::execute_transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionResult {
    /// Every write applied.
    Written {
        client_request_token: String,
        operations: usize,
        attempts: u32,
    },
    /// A consistent snapshot, one entry per get in request order.
    Read { items: Vec<Option<Item>> },
}

/// Runs bounded read or write transactions against one transport.
#[derive(Clone)]
pub struct TransactionCoordinator {
    transport: SharedTransport,
    retry: RetryPolicy,
    item_cap: usize,
}

impl TransactionCoordinator {
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
            item_cap: MAX_TRANSACTION_ITEMS,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Lowers the per-transaction operation cap. Values above the store's
    /// own limit are clamped to it.
    #[must_use]
    pub fn with_item_cap(mut self, cap: usize) -> Self {
        self.item_cap = cap.clamp(1, MAX_TRANSACTION_ITEMS);
        self
    }

    pub async fn execute_transaction(
        &self,
        operations: Vec<TransactionOperation>,
        options: TransactionOptions,
    ) -> StoreResult<TransactionResult> {
        self.validate(&operations)?;
        if operations.iter().all(TransactionOperation::is_read) {
            self.read(operations).await
        } else {
            self.write(operations, options).await
        }
    }

    fn validate(&self, operations: &[TransactionOperation]) -> StoreResult<()> {
        if operations.is_empty() {
            return Err(StoreError::invalid_parameter(
                "operations",
                "a transaction needs at least one operation",
            ));
        }
        if operations.len() > self.item_cap {
            return Err(StoreError::invalid_parameter(
                "operations",
                format!(
                    "{} operations exceed the transaction cap of {}",
                    operations.len(),
                    self.item_cap
                ),
            ));
        }
        let reads = operations.iter().filter(|op| op.is_read()).count();
        if reads != 0 && reads != operations.len() {
            return Err(StoreError::invalid_parameter(
                "operations",
                "gets cannot be mixed with writes in one transaction",
            ));
        }
        Ok(())
    }

    async fn read(&self, operations: Vec<TransactionOperation>) -> StoreResult<TransactionResult> {
        let keys = operations
            .into_iter()
            .filter_map(|op| match op {
                TransactionOperation::Get { table, key } => Some(TableKey { table, key }),
                _ => None,
            })
            .collect::<Vec<_>>();
        let request = TransactGet { keys };
        debug!(operations = request.keys.len(), "transact get");
        let items = self
            .retry
            .run("transact_get", is_retryable_read, || {
                self.transport.transact_get(request.clone())
            })
            .await
            .map_err(StoreError::from)?;
        Ok(TransactionResult::Read { items })
    }

    async fn write(
        &self,
        operations: Vec<TransactionOperation>,
        options: TransactionOptions,
    ) -> StoreResult<TransactionResult> {
        let token = options
            .client_request_token
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let count = operations.len();
        let request = TransactWrite {
            items: operations.into_iter().filter_map(write_item).collect(),
            client_request_token: Some(token.clone()),
        };
        debug!(operations = count, token = %token, "transact write");

        let mut attempts = 0;
        let outcome = self
            .retry
            .run("transact_write", is_retryable_write, || {
                attempts += 1;
                self.transport.transact_write(request.clone())
            })
            .await;

        match outcome {
            Ok(()) => {
                info!(operations = count, attempts, token = %token, "transaction committed");
                Ok(TransactionResult::Written {
                    client_request_token: token,
                    operations: count,
                    attempts,
                })
            }
            Err(exhausted) => {
                let error = classify_write_failure(exhausted.error, exhausted.attempts, &token);
                warn!(attempts = exhausted.attempts, token = %token, error = %error, "transaction failed");
                Err(error)
            }
        }
    }
}

fn write_item(operation: TransactionOperation) -> Option<TransactWriteItem> {
    Some(match operation {
        TransactionOperation::Get { .. } => return None,
        TransactionOperation::Put { table, item, condition } => {
            TransactWriteItem::Put(PutItem { table, item, condition })
        }
        TransactionOperation::Update {
            table,
            key,
            update,
            condition,
        } => TransactWriteItem::Update(UpdateItem {
            table,
            key,
            update,
            condition,
        }),
        TransactionOperation::Delete { table, key, condition } => {
            TransactWriteItem::Delete(DeleteItem { table, key, condition })
        }
        TransactionOperation::ConditionCheck { table, key, condition } => {
            TransactWriteItem::ConditionCheck { table, key, condition }
        }
    })
}

fn is_retryable_read(error: &TransportError) -> bool {
    retry::transient(error) || canceled_only_by_contention(error)
}

/// Every attempt carries the same idempotency token.
fn is_retryable_write(error: &TransportError) -> bool {
    error.is_transient() || canceled_only_by_contention(error)
}

/// A cancellation caused by throttling or conflicts, not by a condition.
fn canceled_only_by_contention(error: &TransportError) -> bool {
    match error {
        TransportError::TransactionCanceled { reasons } => {
            let mut causes = reasons
                .iter()
                .filter(|r| r.code != CancellationCode::None)
                .peekable();
            causes.peek().is_some() && causes.all(|r| r.code.is_retryable())
        }
        _ => false,
    }
}

fn classify_write_failure(error: TransportError, attempts: u32, token: &str) -> StoreError {
    match error {
        TransportError::TransactionCanceled { reasons } => {
            let failed_condition = reasons
                .iter()
                .position(|r| r.code == CancellationCode::ConditionalCheckFailed);
            match failed_condition {
                Some(index) => StoreError::ConditionalCheckFailed {
                    operation_index: Some(index),
                    message: reasons[index]
                        .message
                        .clone()
                        .unwrap_or_else(|| "the conditional request failed".to_string()),
                },
                None if reasons.iter().any(|r| r.code == CancellationCode::Throttling) => {
                    StoreError::Throttled {
                        attempts,
                        message: "transaction canceled by throttling".to_string(),
                    }
                }
                None => StoreError::TransactionCanceled { reasons },
            }
        }
        TransportError::Connection { message } => StoreError::OutcomeUnknown {
            client_request_token: token.to_string(),
            message,
        },
        other => StoreError::from_transport(other, attempts),
    }
}
