//! Rebuilding index attributes of stored items.
//!
//! After an index template changes, stored items still carry keys computed
//! by the old one. [`EntityStore::reindex`] recomputes them from the entity
//! and either rewrites the secondary index attributes in place or moves the
//! item to a new primary key.

use crate::error::{StoreError, StoreResult};
use crate::request::UpdateItem;
use crate::retry;
use crate::table::EntityStore;
use crate::transaction::{TransactionCoordinator, TransactionOperation, TransactionOptions};
use tablecraft_model::Entity;
use tablecraft_types::{Expression, Item, name_placeholder};
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexOptions {
    /// Plan only; nothing is sent to the store.
    pub dry_run: bool,
    /// Move the item when its primary key changed.
    pub migrate_primary: bool,
    /// With `migrate_primary`, leave the item under the original key too.
    pub keep_original: bool,
}

/// What a reindex did, or would do on a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReindexPlan {
    /// Secondary index attributes set (or removed, for sparse indexes) on
    /// the item at `key`.
    Update { key: Item, update: Expression },
    /// The full item written under `to`; the item at `from` deleted unless
    /// `keep_original`.
    Migrate {
        from: Item,
        to: Item,
        item: Item,
        keep_original: bool,
    },
}

impl<E: Entity> EntityStore<E> {
    /// Recomputes the index attributes of the stored copy of `entity`.
    ///
    /// `original_key` is the primary key the item is stored under now; it
    /// defaults to the key `entity` resolves to and is required when
    /// migrating.
    pub async fn reindex(
        &self,
        entity: &E,
        original_key: Option<Item>,
        options: ReindexOptions,
    ) -> StoreResult<ReindexPlan> {
        let indexes = self.schema().indexes();
        let new_key = indexes.key_item(entity)?;

        if options.migrate_primary {
            let from = original_key.ok_or_else(|| StoreError::missing_parameter("original_key"))?;
            if from != new_key {
                let plan = ReindexPlan::Migrate {
                    from,
                    to: new_key,
                    item: self.codec.to_store_item(entity)?,
                    keep_original: options.keep_original,
                };
                if !options.dry_run {
                    self.migrate(&plan).await?;
                }
                return Ok(plan);
            }
            return self.rewrite_in_place(entity, from, options.dry_run).await;
        }

        let key = original_key.unwrap_or(new_key);
        self.rewrite_in_place(entity, key, options.dry_run).await
    }

    async fn rewrite_in_place(&self, entity: &E, key: Item, dry_run: bool) -> StoreResult<ReindexPlan> {
        let indexes = self.schema().indexes();
        let resolved = indexes.secondary_attributes(entity)?;
        let sparse: Vec<&str> = indexes
            .secondary()
            .flat_map(|index| index.attributes())
            .filter(|name| !resolved.contains_key(*name))
            .collect();
        if resolved.is_empty() && sparse.is_empty() {
            return Err(StoreError::invalid_parameter(
                "indexes",
                format!("`{}` has no secondary indexes to rebuild", self.schema().entity_type()),
            ));
        }

        let mut update = Expression::default();
        let mut sets = Vec::new();
        for (name, value) in &resolved {
            let placeholder = name_placeholder(name);
            let value_placeholder = format!(":{}", &placeholder[1..]);
            sets.push(format!("{placeholder} = {value_placeholder}"));
            update = update.name(placeholder, name.clone()).value(value_placeholder, value.clone());
        }
        let mut removes = Vec::new();
        for name in sparse {
            let placeholder = name_placeholder(name);
            removes.push(placeholder.clone());
            update = update.name(placeholder, name);
        }
        let mut clauses = Vec::new();
        if !sets.is_empty() {
            clauses.push(format!("SET {}", sets.join(", ")));
        }
        if !removes.is_empty() {
            clauses.push(format!("REMOVE {}", removes.join(", ")));
        }
        update.text = clauses.join(" ");

        let plan = ReindexPlan::Update { key, update };
        if dry_run {
            info!(table = %self.table, plan = ?plan, "reindex dry run");
            return Ok(plan);
        }
        if let ReindexPlan::Update { key, update } = &plan {
            let request = UpdateItem {
                table: self.table.clone(),
                key: key.clone(),
                update: update.clone(),
                condition: Some(Expression::attribute_exists(self.partition_attribute())),
            };
            self.retry
                .run("update_item", retry::throttling, || {
                    self.transport.update_item(request.clone())
                })
                .await?;
            info!(table = %self.table, "reindexed in place");
        }
        Ok(plan)
    }

    /// Writes the new item and deletes the old one in one transaction, so a
    /// failure leaves the original untouched.
    async fn migrate(&self, plan: &ReindexPlan) -> StoreResult<()> {
        let ReindexPlan::Migrate {
            from,
            item,
            keep_original,
            ..
        } = plan
        else {
            return Ok(());
        };
        let partition = self.partition_attribute();
        let mut operations = vec![
            TransactionOperation::put(self.table.clone(), item.clone())
                .with_condition(Expression::attribute_not_exists(partition)),
        ];
        if !keep_original {
            operations.push(
                TransactionOperation::delete(self.table.clone(), from.clone())
                    .with_condition(Expression::attribute_exists(partition)),
            );
        }
        TransactionCoordinator::new(self.transport.clone())
            .with_retry(self.retry)
            .execute_transaction(operations, TransactionOptions::default())
            .await?;
        info!(table = %self.table, keep_original, "migrated to new primary key");
        Ok(())
    }
}
