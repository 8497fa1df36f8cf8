//! Typed single-item operations for one entity type.

use crate::error::{StoreError, StoreResult};
use crate::request::{DeleteItem, GetItem, PutItem, Query};
use crate::retry::{self, RetryPolicy};
use crate::transport::SharedTransport;
use std::fmt;
use std::sync::Arc;
use tablecraft_model::{
    CodecOptions, Entity, EntitySchema, Hydrated, ItemCodec, ItemInput, MergePolicy, QueryOp, merge,
};
use tablecraft_types::{Expression, Item, Patch};
use tracing::debug;

/// Paging and filtering for [`EntityStore::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub limit: Option<u32>,
    pub scan_forward: bool,
    pub exclusive_start_key: Option<Item>,
    /// Applied by the store after the key condition.
    pub filter: Option<Expression>,
    pub consistent_read: bool,
    /// Attributes to return. Must include every field `E` cannot default.
    pub projection: Option<Vec<String>>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: None,
            scan_forward: true,
            exclusive_start_key: None,
            filter: None,
            consistent_read: false,
            projection: None,
        }
    }
}

/// One page of hydrated query results.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage<E> {
    pub items: Vec<Hydrated<E>>,
    pub last_evaluated_key: Option<Item>,
}

/// Saves, loads, queries and merges entities of type `E` in one table.
///
/// Every call is retried on throttling; reads are also retried on
/// connection failures.
pub struct EntityStore<E> {
    pub(crate) transport: SharedTransport,
    pub(crate) codec: ItemCodec<E>,
    pub(crate) table: String,
    pub(crate) retry: RetryPolicy,
    merge_policy: MergePolicy,
}

impl<E> Clone for EntityStore<E> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            codec: self.codec.clone(),
            table: self.table.clone(),
            retry: self.retry,
            merge_policy: self.merge_policy,
        }
    }
}

impl<E> fmt::Debug for EntityStore<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("table", &self.table)
            .field("codec", &self.codec)
            .field("transport", &self.transport.name())
            .field("retry", &self.retry)
            .field("merge_policy", &self.merge_policy)
            .finish()
    }
}

impl<E: Entity> EntityStore<E> {
    pub fn new(transport: SharedTransport, schema: Arc<EntitySchema<E>>, table: impl Into<String>) -> Self {
        Self {
            transport,
            codec: ItemCodec::new(schema),
            table: table.into(),
            retry: RetryPolicy::default(),
            merge_policy: MergePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_codec_options(mut self, options: CodecOptions) -> Self {
        self.codec = self.codec.with_options(options);
        self
    }

    /// Policy used by [`EntityStore::update_merge`] when none is given.
    #[must_use]
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn codec(&self) -> &ItemCodec<E> {
        &self.codec
    }

    pub fn schema(&self) -> &EntitySchema<E> {
        self.codec.schema()
    }

    /// Writes `entity`, replacing any item with the same primary key.
    /// Returns the item as written.
    pub async fn save(&self, entity: &E) -> StoreResult<Item> {
        self.put(ItemInput::Entity(entity), None).await
    }

    /// Writes `entity` only if no item has its primary key yet.
    pub async fn save_if_absent(&self, entity: &E) -> StoreResult<Item> {
        let guard = Expression::attribute_not_exists(self.partition_attribute());
        self.put(ItemInput::Entity(entity), Some(guard)).await
    }

    /// Writes an entity or a raw item, optionally guarded by `condition`.
    pub async fn put(&self, input: ItemInput<'_, E>, condition: Option<Expression>) -> StoreResult<Item> {
        let item = input.into_item(&self.codec)?;
        let request = PutItem {
            table: self.table.clone(),
            item: item.clone(),
            condition,
        };
        self.retry
            .run("put_item", retry::throttling, || self.transport.put_item(request.clone()))
            .await?;
        debug!(table = %self.table, entity = self.schema().entity_type(), "saved");
        Ok(item)
    }

    /// Loads the entity whose primary key `key_source` resolves to.
    pub async fn get(&self, key_source: &E) -> StoreResult<Option<Hydrated<E>>> {
        let key = self.schema().indexes().key_item(key_source)?;
        self.get_by_key(key).await
    }

    pub async fn get_by_key(&self, key: Item) -> StoreResult<Option<Hydrated<E>>> {
        self.hydrate(self.get_raw(key, None).await?)
    }

    /// Like [`EntityStore::get`], reading only `attributes`. Fields left out
    /// must deserialize from their absence.
    pub async fn get_projected(&self, key_source: &E, attributes: &[&str]) -> StoreResult<Option<Hydrated<E>>> {
        let key = self.schema().indexes().key_item(key_source)?;
        let projection = attributes.iter().map(|a| a.to_string()).collect();
        self.hydrate(self.get_raw(key, Some(projection)).await?)
    }

    fn hydrate(&self, item: Option<Item>) -> StoreResult<Option<Hydrated<E>>> {
        match item {
            Some(item) => Ok(Some(self.codec.from_store_item(&item)?)),
            None => Ok(None),
        }
    }

    /// Deletes the item whose primary key `key_source` resolves to and
    /// returns it, if it existed.
    pub async fn delete(&self, key_source: &E) -> StoreResult<Option<Item>> {
        let request = DeleteItem {
            table: self.table.clone(),
            key: self.schema().indexes().key_item(key_source)?,
            condition: None,
        };
        let old = self
            .retry
            .run("delete_item", retry::throttling, || self.transport.delete_item(request.clone()))
            .await?;
        Ok(old)
    }

    /// Queries `index_name` with keys resolved from `key_source`.
    pub async fn query(
        &self,
        index_name: &str,
        key_source: &E,
        op: QueryOp,
        options: QueryOptions,
    ) -> StoreResult<QueryPage<E>> {
        let key_condition = self.schema().indexes().key_condition(index_name, key_source, op)?;
        let request = Query {
            table: self.table.clone(),
            key_condition,
            filter: options.filter,
            limit: options.limit,
            scan_forward: options.scan_forward,
            exclusive_start_key: options.exclusive_start_key,
            consistent_read: options.consistent_read,
            projection: options.projection,
        };
        let output = self
            .retry
            .run("query", retry::transient, || self.transport.query(request.clone()))
            .await?;
        let items = output
            .items
            .iter()
            .map(|item| self.codec.from_store_item(item))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(table = %self.table, index = index_name, returned = items.len(), "queried");
        Ok(QueryPage {
            items,
            last_evaluated_key: output.last_evaluated_key,
        })
    }

    /// Reads the stored item, merges `patch` into it under `policy` (the
    /// store's default when `None`), and writes the result back.
    ///
    /// Index attributes are recomputed from the merged entity. The write is
    /// conditioned on the item being exactly as it was read, so a concurrent
    /// change or delete fails it with `ConditionalCheckFailed`; read and
    /// merge again to retry. A patch that would move the item to another
    /// primary key is `InvalidParameter`.
    pub async fn update_merge(
        &self,
        key_source: &E,
        patch: &Patch,
        policy: Option<MergePolicy>,
    ) -> StoreResult<Hydrated<E>> {
        let indexes = self.schema().indexes();
        let key = indexes.key_item(key_source)?;
        let Some(existing) = self.get_raw(key.clone(), None).await? else {
            return Err(StoreError::NotFound {
                message: format!("{} {key:?} in `{}`", self.schema().entity_type(), self.table),
            });
        };

        let merged = merge(&existing, patch, policy.unwrap_or(self.merge_policy));
        let hydrated = self.codec.from_store_item(&merged)?;
        if indexes.key_item(&hydrated.entity)? != key {
            return Err(StoreError::invalid_parameter(
                "patch",
                "changes the primary key; reindex with migrate_primary instead",
            ));
        }
        let item = self.codec.to_store_item_with(&hydrated.entity, &hydrated.unmapped)?;
        let guard = self.unchanged_since(&existing);
        self.put(ItemInput::Raw(item), Some(guard)).await?;
        Ok(hydrated)
    }

    /// Holds while every attribute of `read` keeps its value and every
    /// declared attribute missing from it stays missing.
    fn unchanged_since(&self, read: &Item) -> Expression {
        let mut clauses = Vec::with_capacity(read.len());
        let mut guard = Expression::default();
        for (i, (attribute, value)) in read.iter().enumerate() {
            let (name, placeholder) = (format!("#read{i}"), format!(":read{i}"));
            clauses.push(format!("{name} = {placeholder}"));
            guard = guard.name(name, attribute.as_str()).value(placeholder, value.clone());
        }
        let absent = self
            .schema()
            .attributes()
            .map(|(attribute, _)| attribute)
            .filter(|attribute| !read.contains_key(*attribute));
        for (i, attribute) in absent.enumerate() {
            let name = format!("#absent{i}");
            clauses.push(format!("attribute_not_exists({name})"));
            guard = guard.name(name, attribute);
        }
        guard.text = clauses.join(" AND ");
        guard
    }

    async fn get_raw(&self, key: Item, projection: Option<Vec<String>>) -> StoreResult<Option<Item>> {
        let request = GetItem {
            table: self.table.clone(),
            key,
            consistent_read: true,
            projection,
        };
        let item = self
            .retry
            .run("get_item", retry::transient, || self.transport.get_item(request.clone()))
            .await?;
        Ok(item)
    }

    pub(crate) fn partition_attribute(&self) -> &str {
        self.schema().indexes().primary().partition().attribute()
    }
}
