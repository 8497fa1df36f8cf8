//! In-process simulated store.
//!
//! [`MemoryStore`] implements [`StoreTransport`] over in-memory tables so the
//! coordinators can be exercised without a network: request limits,
//! condition expressions, atomic transactions and the idempotency-token
//! window behave like the real store. Faults can be injected per operation,
//! and batch items can be forced to come back unprocessed.

mod expression;

use crate::error::{CancellationCode, CancellationReason, TransportError, TransportResult};
use crate::request::{
    BatchGet, BatchGetOutput, BatchWrite, BatchWriteOutput, DeleteItem, GetItem, PutItem, Query,
    QueryOutput, TableItem, TableKey, TransactGet, TransactWrite, TransactWriteItem, UpdateItem,
    WriteRequest,
};
use crate::transport::StoreTransport;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tablecraft_types::{AttributeValue, Expression, Item, Number};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use expression::{apply_update, evaluate};

/// How long the store remembers a transaction's client request token.
pub const IDEMPOTENCY_WINDOW: Duration = Duration::from_secs(600);

const MAX_BATCH_WRITE: usize = 25;
const MAX_BATCH_GET: usize = 100;
const MAX_TRANSACTION_ITEMS: usize = 100;

/// Store calls, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetItem,
    PutItem,
    UpdateItem,
    DeleteItem,
    Query,
    BatchGet,
    BatchWrite,
    TransactWrite,
    TransactGet,
}

/// Decides whether a batch entry is left unprocessed. Receives the table and
/// the item (puts) or key (gets and deletes).
pub type UnprocessedPredicate = Arc<dyn Fn(&str, &Item) -> bool + Send + Sync>;

struct Fault {
    operation: Operation,
    error: TransportError,
    remaining: u32,
    after_apply: bool,
}

struct UnprocessedRule {
    predicate: UnprocessedPredicate,
    remaining: Option<u32>,
}

impl UnprocessedRule {
    fn matches(&mut self, table: &str, item: &Item) -> bool {
        if self.remaining == Some(0) || !(self.predicate)(table, item) {
            return false;
        }
        if let Some(remaining) = &mut self.remaining {
            *remaining -= 1;
        }
        true
    }
}

/// Sort-key-ordered identity of an item within a table.
type ItemKey = (String, String);

struct Table {
    partition_key: String,
    sort_key: Option<String>,
    /// Index name to its partition and optional sort attribute.
    indexes: HashMap<String, (String, Option<String>)>,
    items: BTreeMap<ItemKey, Item>,
}

impl Table {
    fn key_attributes(&self) -> Vec<&str> {
        std::iter::once(self.partition_key.as_str())
            .chain(self.sort_key.as_deref())
            .collect()
    }

    /// Extracts the key of `item`, ignoring non-key attributes.
    fn key_of(&self, item: &Item) -> TransportResult<ItemKey> {
        let partition = key_component(item, &self.partition_key)?;
        let sort = match &self.sort_key {
            Some(attribute) => key_component(item, attribute)?,
            None => String::new(),
        };
        Ok((partition, sort))
    }

    /// Like [`Table::key_of`] but rejects anything besides key attributes.
    fn exact_key(&self, key: &Item) -> TransportResult<ItemKey> {
        let expected = self.key_attributes();
        if let Some(extra) = key.keys().find(|name| !expected.contains(&name.as_str())) {
            return Err(TransportError::validation(format!(
                "`{extra}` is not a key attribute"
            )));
        }
        self.key_of(key)
    }

    fn key_item(&self, item: &Item) -> Item {
        self.key_attributes()
            .into_iter()
            .filter_map(|name| item.get(name).map(|v| (name.to_string(), v.clone())))
            .collect()
    }
}

fn key_component(item: &Item, attribute: &str) -> TransportResult<String> {
    match item.get(attribute) {
        Some(AttributeValue::S(s)) if !s.is_empty() => Ok(s.clone()),
        Some(AttributeValue::N(n)) => Ok(n.to_string()),
        Some(AttributeValue::S(_)) => Err(TransportError::validation(format!(
            "key attribute `{attribute}` is an empty string"
        ))),
        Some(other) => Err(TransportError::validation(format!(
            "key attribute `{attribute}` must be a string or number, got {}",
            other.type_descriptor()
        ))),
        None => Err(TransportError::validation(format!(
            "missing key attribute `{attribute}`"
        ))),
    }
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Table>,
    tokens: HashMap<String, (String, Instant)>,
    faults: Vec<Fault>,
    unprocessed_writes: Vec<UnprocessedRule>,
    unprocessed_gets: Vec<UnprocessedRule>,
    calls: HashMap<Operation, usize>,
}

impl State {
    fn table(&self, name: &str) -> TransportResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| TransportError::not_found(format!("table `{name}`")))
    }

    fn table_mut(&mut self, name: &str) -> TransportResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| TransportError::not_found(format!("table `{name}`")))
    }

    /// Counts the call and pops the next injected fault for it, if any.
    fn begin(&mut self, operation: Operation) -> Option<Fault> {
        *self.calls.entry(operation).or_default() += 1;
        let position = self
            .faults
            .iter()
            .position(|f| f.operation == operation && f.remaining > 0)?;
        let fault = &mut self.faults[position];
        fault.remaining -= 1;
        let taken = Fault {
            operation,
            error: fault.error.clone(),
            remaining: 0,
            after_apply: fault.after_apply,
        };
        if fault.remaining == 0 {
            self.faults.remove(position);
        }
        Some(taken)
    }

    fn unprocessed_write(&mut self, write: &WriteRequest) -> bool {
        let (table, item) = match write {
            WriteRequest::Put { table, item } => (table, item),
            WriteRequest::Delete { table, key } => (table, key),
        };
        self.unprocessed_writes
            .iter_mut()
            .any(|rule| rule.matches(table, item))
    }

    fn unprocessed_get(&mut self, key: &TableKey) -> bool {
        self.unprocessed_gets
            .iter_mut()
            .any(|rule| rule.matches(&key.table, &key.key))
    }

    fn check_condition(
        &self,
        table: &str,
        key: &ItemKey,
        condition: Option<&Expression>,
    ) -> TransportResult<bool> {
        let Some(condition) = condition else {
            return Ok(true);
        };
        let existing = self.table(table)?.items.get(key);
        evaluate(condition, existing)
    }

    fn put(&mut self, table: &str, item: Item) -> TransportResult<()> {
        let table = self.table_mut(table)?;
        let key = table.key_of(&item)?;
        table.items.insert(key, item);
        Ok(())
    }

    fn delete(&mut self, table: &str, key: &Item) -> TransportResult<Option<Item>> {
        let table = self.table_mut(table)?;
        let key = table.exact_key(key)?;
        Ok(table.items.remove(&key))
    }

    /// The item `update` would produce, without storing it.
    fn updated(&self, request: &UpdateItem) -> TransportResult<(ItemKey, Item)> {
        let table = self.table(&request.table)?;
        let key = table.exact_key(&request.key)?;
        let mut item = table
            .items
            .get(&key)
            .cloned()
            .unwrap_or_else(|| request.key.clone());
        apply_update(&request.update, &mut item, &table.key_attributes())?;
        Ok((key, item))
    }

    fn forget_expired_tokens(&mut self) {
        let now = Instant::now();
        self.tokens
            .retain(|_, (_, seen)| now.duration_since(*seen) < IDEMPOTENCY_WINDOW);
    }
}

/// In-memory [`StoreTransport`].
pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Declares a table with its key attributes.
    #[must_use]
    pub fn with_table(mut self, name: &str, partition_key: &str, sort_key: Option<&str>) -> Self {
        self.state.get_mut().tables.insert(
            name.to_string(),
            Table {
                partition_key: partition_key.to_string(),
                sort_key: sort_key.map(str::to_string),
                indexes: HashMap::new(),
                items: BTreeMap::new(),
            },
        );
        self
    }

    /// Declares a secondary index on an existing table. Ignored for unknown
    /// tables.
    #[must_use]
    pub fn with_index(
        mut self,
        table: &str,
        index: &str,
        partition_key: &str,
        sort_key: Option<&str>,
    ) -> Self {
        if let Some(table) = self.state.get_mut().tables.get_mut(table) {
            table.indexes.insert(
                index.to_string(),
                (partition_key.to_string(), sort_key.map(str::to_string)),
            );
        }
        self
    }

    /// Fails the next `times` calls of `operation` with `error`, before
    /// anything is applied.
    pub async fn inject_failure(&self, operation: Operation, error: TransportError, times: u32) {
        self.push_fault(operation, error, times, false).await;
    }

    /// Applies the next `times` calls of `operation`, then reports `error`
    /// anyway, like a response lost after the store committed.
    pub async fn inject_failure_after_apply(
        &self,
        operation: Operation,
        error: TransportError,
        times: u32,
    ) {
        self.push_fault(operation, error, times, true).await;
    }

    async fn push_fault(&self, operation: Operation, error: TransportError, times: u32, after_apply: bool) {
        if times == 0 {
            return;
        }
        self.state.lock().await.faults.push(Fault {
            operation,
            error,
            remaining: times,
            after_apply,
        });
    }

    /// Leaves batch writes matching `predicate` unprocessed, `times` times
    /// or forever when `None`.
    pub async fn leave_writes_unprocessed<F>(&self, predicate: F, times: Option<u32>)
    where
        F: Fn(&str, &Item) -> bool + Send + Sync + 'static,
    {
        self.state.lock().await.unprocessed_writes.push(UnprocessedRule {
            predicate: Arc::new(predicate),
            remaining: times,
        });
    }

    /// Leaves batch-get keys matching `predicate` unprocessed, `times` times
    /// or forever when `None`.
    pub async fn leave_gets_unprocessed<F>(&self, predicate: F, times: Option<u32>)
    where
        F: Fn(&str, &Item) -> bool + Send + Sync + 'static,
    {
        self.state.lock().await.unprocessed_gets.push(UnprocessedRule {
            predicate: Arc::new(predicate),
            remaining: times,
        });
    }

    /// Calls made to `operation` so far, failed ones included.
    pub async fn calls(&self, operation: Operation) -> usize {
        self.state.lock().await.calls.get(&operation).copied().unwrap_or(0)
    }

    /// Every item of `table` in key order.
    pub async fn items(&self, table: &str) -> Vec<Item> {
        self.state
            .lock()
            .await
            .tables
            .get(table)
            .map(|t| t.items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Stores `item` directly, bypassing faults and conditions.
    pub async fn seed(&self, table: &str, item: Item) -> TransportResult<()> {
        self.state.lock().await.put(table, item)
    }
}

fn fail_before(fault: &Option<Fault>) -> TransportResult<()> {
    match fault {
        Some(fault) if !fault.after_apply => {
            debug!(operation = ?fault.operation, error = %fault.error, "injected failure");
            Err(fault.error.clone())
        }
        _ => Ok(()),
    }
}

fn fail_after<T>(fault: Option<Fault>, value: T) -> TransportResult<T> {
    match fault {
        Some(fault) => {
            debug!(operation = ?fault.operation, error = %fault.error, "injected failure after apply");
            Err(fault.error)
        }
        None => Ok(value),
    }
}

fn checked_projection(attributes: Option<&[String]>) -> TransportResult<Option<&[String]>> {
    match attributes {
        Some([]) => Err(TransportError::validation("projection lists no attributes")),
        other => Ok(other),
    }
}

fn project(item: &Item, projection: Option<&[String]>) -> Item {
    match projection {
        Some(attributes) => item
            .iter()
            .filter(|(name, _)| attributes.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        None => item.clone(),
    }
}

fn conditional_failure() -> TransportError {
    TransportError::conditional("the conditional request failed")
}

#[async_trait]
impl StoreTransport for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_item(&self, request: GetItem) -> TransportResult<Option<Item>> {
        let mut state = self.state.lock().await;
        let fault = state.begin(Operation::GetItem);
        fail_before(&fault)?;
        let projection = checked_projection(request.projection.as_deref())?;
        let table = state.table(&request.table)?;
        let key = table.exact_key(&request.key)?;
        let item = table.items.get(&key).map(|item| project(item, projection));
        fail_after(fault, item)
    }

    async fn put_item(&self, request: PutItem) -> TransportResult<()> {
        let mut state = self.state.lock().await;
        let fault = state.begin(Operation::PutItem);
        fail_before(&fault)?;
        let key = state.table(&request.table)?.key_of(&request.item)?;
        if !state.check_condition(&request.table, &key, request.condition.as_ref())? {
            return Err(conditional_failure());
        }
        state.put(&request.table, request.item)?;
        trace!(table = %request.table, "put item");
        fail_after(fault, ())
    }

    async fn update_item(&self, request: UpdateItem) -> TransportResult<Item> {
        let mut state = self.state.lock().await;
        let fault = state.begin(Operation::UpdateItem);
        fail_before(&fault)?;
        let key = state.table(&request.table)?.exact_key(&request.key)?;
        if !state.check_condition(&request.table, &key, request.condition.as_ref())? {
            return Err(conditional_failure());
        }
        let (key, item) = state.updated(&request)?;
        state.table_mut(&request.table)?.items.insert(key, item.clone());
        fail_after(fault, item)
    }

    async fn delete_item(&self, request: DeleteItem) -> TransportResult<Option<Item>> {
        let mut state = self.state.lock().await;
        let fault = state.begin(Operation::DeleteItem);
        fail_before(&fault)?;
        let key = state.table(&request.table)?.exact_key(&request.key)?;
        if !state.check_condition(&request.table, &key, request.condition.as_ref())? {
            return Err(conditional_failure());
        }
        let old = state.delete(&request.table, &request.key)?;
        fail_after(fault, old)
    }

    async fn query(&self, request: Query) -> TransportResult<QueryOutput> {
        let mut state = self.state.lock().await;
        let fault = state.begin(Operation::Query);
        fail_before(&fault)?;
        let projection = checked_projection(request.projection.as_deref())?;
        let table = state.table(&request.table)?;
        let condition = &request.key_condition;

        let (partition_attribute, sort_attribute) = match &condition.index_name {
            None => (table.partition_key.clone(), table.sort_key.clone()),
            Some(index) => table
                .indexes
                .get(index)
                .cloned()
                .ok_or_else(|| TransportError::validation(format!("index `{index}` not found")))?,
        };
        if condition.partition_attribute != partition_attribute {
            return Err(TransportError::validation(format!(
                "`{}` is not the partition key of the queried index",
                condition.partition_attribute
            )));
        }
        if let Some(attribute) = condition.sort_attribute() {
            if sort_attribute.as_deref() != Some(attribute) {
                return Err(TransportError::validation(format!(
                    "`{attribute}` is not the sort key of the queried index"
                )));
            }
        }

        let mut matched: Vec<(&ItemKey, &Item)> = table
            .items
            .iter()
            .filter(|(_, item)| condition.matches(item))
            .filter(|(_, item)| sort_attribute.as_ref().is_none_or(|name| item.contains_key(name)))
            .collect();
        let sort_value = |item: &Item| {
            sort_attribute
                .as_deref()
                .and_then(|name| item.get(name))
                .and_then(sort_value_of)
        };
        matched.sort_by(|(ka, a), (kb, b)| sort_value(*a).cmp(&sort_value(*b)).then_with(|| ka.cmp(kb)));
        if !request.scan_forward {
            matched.reverse();
        }

        let start = match &request.exclusive_start_key {
            Some(start_key) => {
                let start = table.key_of(start_key)?;
                matched
                    .iter()
                    .position(|(key, _)| **key == start)
                    .map_or(0, |p| p + 1)
            }
            None => 0,
        };
        let remaining = &matched[start.min(matched.len())..];
        let limit = request.limit.map_or(remaining.len(), |l| l as usize);
        let page = &remaining[..limit.min(remaining.len())];

        let last_evaluated_key = if page.len() < remaining.len() {
            page.last().map(|(_, item)| {
                let mut key = table.key_item(item);
                for name in std::iter::once(&partition_attribute).chain(sort_attribute.iter()) {
                    if let Some(value) = item.get(name) {
                        key.insert(name.clone(), value.clone());
                    }
                }
                key
            })
        } else {
            None
        };

        let mut items = Vec::with_capacity(page.len());
        for (_, item) in page {
            let keep = match &request.filter {
                Some(filter) => evaluate(filter, Some(*item))?,
                None => true,
            };
            if keep {
                items.push(project(item, projection));
            }
        }
        debug!(table = %request.table, index = ?condition.index_name, returned = items.len(), "query");
        fail_after(
            fault,
            QueryOutput {
                items,
                last_evaluated_key,
            },
        )
    }

    async fn batch_get(&self, request: BatchGet) -> TransportResult<BatchGetOutput> {
        let mut state = self.state.lock().await;
        let fault = state.begin(Operation::BatchGet);
        fail_before(&fault)?;
        if request.keys.is_empty() || request.keys.len() > MAX_BATCH_GET {
            return Err(TransportError::validation(format!(
                "batch get takes 1 to {MAX_BATCH_GET} keys, got {}",
                request.keys.len()
            )));
        }
        let mut output = BatchGetOutput::default();
        for key in request.keys {
            if state.unprocessed_get(&key) {
                output.unprocessed.push(key);
                continue;
            }
            let table = state.table(&key.table)?;
            let item_key = table.exact_key(&key.key)?;
            if let Some(item) = table.items.get(&item_key) {
                output.items.push(TableItem {
                    table: key.table.clone(),
                    item: item.clone(),
                });
            }
        }
        fail_after(fault, output)
    }

    async fn batch_write(&self, request: BatchWrite) -> TransportResult<BatchWriteOutput> {
        let mut state = self.state.lock().await;
        let fault = state.begin(Operation::BatchWrite);
        fail_before(&fault)?;
        if request.writes.is_empty() || request.writes.len() > MAX_BATCH_WRITE {
            return Err(TransportError::validation(format!(
                "batch write takes 1 to {MAX_BATCH_WRITE} writes, got {}",
                request.writes.len()
            )));
        }
        let mut seen = HashSet::new();
        for write in &request.writes {
            let table = state.table(write.table())?;
            let key = match write {
                WriteRequest::Put { item, .. } => table.key_of(item)?,
                WriteRequest::Delete { key, .. } => table.exact_key(key)?,
            };
            if !seen.insert((write.table().to_string(), key)) {
                return Err(TransportError::validation(
                    "batch write contains duplicate keys",
                ));
            }
        }

        let mut output = BatchWriteOutput::default();
        for write in request.writes {
            if state.unprocessed_write(&write) {
                output.unprocessed.push(write);
                continue;
            }
            match write {
                WriteRequest::Put { table, item } => state.put(&table, item)?,
                WriteRequest::Delete { table, key } => {
                    state.delete(&table, &key)?;
                }
            }
        }
        fail_after(fault, output)
    }

    async fn transact_write(&self, request: TransactWrite) -> TransportResult<()> {
        let mut state = self.state.lock().await;
        let fault = state.begin(Operation::TransactWrite);
        fail_before(&fault)?;
        if request.items.is_empty() || request.items.len() > MAX_TRANSACTION_ITEMS {
            return Err(TransportError::validation(format!(
                "transactions take 1 to {MAX_TRANSACTION_ITEMS} operations, got {}",
                request.items.len()
            )));
        }

        state.forget_expired_tokens();
        let fingerprint = format!("{:?}", request.items);
        if let Some(token) = &request.client_request_token {
            if let Some((seen, _)) = state.tokens.get(token) {
                if *seen == fingerprint {
                    debug!(token = %token, "transaction token already applied");
                    return fail_after(fault, ());
                }
                return Err(TransportError::validation(format!(
                    "client request token `{token}` was used with different parameters"
                )));
            }
        }

        // Resolve every target and check every condition before writing.
        let mut targets = HashSet::new();
        let mut reasons = Vec::with_capacity(request.items.len());
        let mut writes: Vec<(String, ItemKey, Option<Item>)> = Vec::new();
        for item in &request.items {
            let (table_name, key, condition) = match item {
                TransactWriteItem::Put(put) => (
                    &put.table,
                    state.table(&put.table)?.key_of(&put.item)?,
                    put.condition.as_ref(),
                ),
                TransactWriteItem::Update(update) => (
                    &update.table,
                    state.table(&update.table)?.exact_key(&update.key)?,
                    update.condition.as_ref(),
                ),
                TransactWriteItem::Delete(delete) => (
                    &delete.table,
                    state.table(&delete.table)?.exact_key(&delete.key)?,
                    delete.condition.as_ref(),
                ),
                TransactWriteItem::ConditionCheck { table, key, condition } => {
                    (table, state.table(table)?.exact_key(key)?, Some(condition))
                }
            };
            if !targets.insert((table_name.clone(), key.clone())) {
                return Err(TransportError::validation(
                    "transaction touches the same item more than once",
                ));
            }
            if state.check_condition(table_name, &key, condition)? {
                reasons.push(CancellationReason::new(CancellationCode::None));
            } else {
                reasons.push(
                    CancellationReason::new(CancellationCode::ConditionalCheckFailed)
                        .with_message("the conditional request failed"),
                );
            }
            match item {
                TransactWriteItem::Put(put) => {
                    writes.push((put.table.clone(), key, Some(put.item.clone())));
                }
                TransactWriteItem::Update(update) => {
                    let (key, updated) = state.updated(update)?;
                    writes.push((update.table.clone(), key, Some(updated)));
                }
                TransactWriteItem::Delete(delete) => writes.push((delete.table.clone(), key, None)),
                TransactWriteItem::ConditionCheck { .. } => {}
            }
        }
        if reasons.iter().any(|r| r.code != CancellationCode::None) {
            return Err(TransportError::TransactionCanceled { reasons });
        }

        for (table, key, item) in writes {
            let table = state.table_mut(&table)?;
            match item {
                Some(item) => {
                    table.items.insert(key, item);
                }
                None => {
                    table.items.remove(&key);
                }
            }
        }
        if let Some(token) = request.client_request_token {
            state.tokens.insert(token, (fingerprint, Instant::now()));
        }
        fail_after(fault, ())
    }

    async fn transact_get(&self, request: TransactGet) -> TransportResult<Vec<Option<Item>>> {
        let mut state = self.state.lock().await;
        let fault = state.begin(Operation::TransactGet);
        fail_before(&fault)?;
        if request.keys.is_empty() || request.keys.len() > MAX_TRANSACTION_ITEMS {
            return Err(TransportError::validation(format!(
                "transactions take 1 to {MAX_TRANSACTION_ITEMS} operations, got {}",
                request.keys.len()
            )));
        }
        let items = request
            .keys
            .iter()
            .map(|key| {
                let table = state.table(&key.table)?;
                Ok(table.items.get(&table.exact_key(&key.key)?).cloned())
            })
            .collect::<TransportResult<Vec<_>>>()?;
        fail_after(fault, items)
    }
}

fn sort_value_of(value: &AttributeValue) -> Option<SortValue> {
    match value {
        AttributeValue::S(s) => Some(SortValue::S(s.clone())),
        AttributeValue::N(n) => Some(SortValue::N(n.clone())),
        _ => None,
    }
}

/// Ordering of sort key values: numbers numerically, strings bytewise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue {
    N(Number),
    S(String),
}
