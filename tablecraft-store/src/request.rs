//! Requests and responses exchanged with a [`StoreTransport`](crate::StoreTransport).
//!
//! These mirror the store's API closely; expressions travel as opaque
//! [`Expression`]s and key conditions in structured form.

use tablecraft_model::KeyCondition;
use tablecraft_types::{Expression, Item};

/// A key within a named table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableKey {
    pub table: String,
    pub key: Item,
}

impl TableKey {
    #[must_use]
    pub fn new(table: impl Into<String>, key: Item) -> Self {
        Self { table: table.into(), key }
    }
}

/// An item read from a named table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableItem {
    pub table: String,
    pub item: Item,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetItem {
    pub table: String,
    pub key: Item,
    pub consistent_read: bool,
    /// Top-level attributes to return; all of them when `None`.
    pub projection: Option<Vec<String>>,
}

impl GetItem {
    #[must_use]
    pub fn new(table: impl Into<String>, key: Item) -> Self {
        Self {
            table: table.into(),
            key,
            consistent_read: false,
            projection: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutItem {
    pub table: String,
    pub item: Item,
    pub condition: Option<Expression>,
}

/// An update expression (`SET ... REMOVE ...`) applied to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateItem {
    pub table: String,
    pub key: Item,
    pub update: Expression,
    pub condition: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteItem {
    pub table: String,
    pub key: Item,
    pub condition: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub key_condition: KeyCondition,
    pub filter: Option<Expression>,
    pub limit: Option<u32>,
    /// Ascending sort key order when true.
    pub scan_forward: bool,
    pub exclusive_start_key: Option<Item>,
    pub consistent_read: bool,
    /// Applied after the filter; the page cursor is unaffected.
    pub projection: Option<Vec<String>>,
}

impl Query {
    #[must_use]
    pub fn new(table: impl Into<String>, key_condition: KeyCondition) -> Self {
        Self {
            table: table.into(),
            key_condition,
            filter: None,
            limit: None,
            scan_forward: true,
            exclusive_start_key: None,
            consistent_read: false,
            projection: None,
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOutput {
    pub items: Vec<Item>,
    /// Set when more results remain; pass back as `exclusive_start_key`.
    pub last_evaluated_key: Option<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchGet {
    pub keys: Vec<TableKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchGetOutput {
    pub items: Vec<TableItem>,
    /// Keys the store did not get to; resubmit them.
    pub unprocessed: Vec<TableKey>,
}

/// One write inside a batch-write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    Put { table: String, item: Item },
    Delete { table: String, key: Item },
}

impl WriteRequest {
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Put { table, .. } | Self::Delete { table, .. } => table,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchWrite {
    pub writes: Vec<WriteRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchWriteOutput {
    /// Writes the store did not get to; resubmit them.
    pub unprocessed: Vec<WriteRequest>,
}

/// One write inside a write transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactWriteItem {
    Put(PutItem),
    Update(UpdateItem),
    Delete(DeleteItem),
    ConditionCheck {
        table: String,
        key: Item,
        condition: Expression,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactWrite {
    pub items: Vec<TransactWriteItem>,
    /// Makes the request idempotent for the store's token window.
    pub client_request_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactGet {
    pub keys: Vec<TableKey>,
}
