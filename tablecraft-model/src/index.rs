//! Index descriptors.
//!
//! Every entity type has exactly one primary index and any number of
//! secondary indexes. Each index writes its partition (and optional sort)
//! key to a dedicated store attribute, computed from the entity at call time
//! through plain function accessors.

use crate::error::{ModelError, ModelResult};
use crate::key::{KeyBuilder, KeyValue};
use crate::query::{KeyCondition, QueryOp, SortCondition};
use std::collections::BTreeSet;
use std::fmt;
use tablecraft_types::{AttributeValue, Item};

/// Reserved name of the primary index.
pub const PRIMARY_INDEX: &str = "primary";

/// Reads one key segment value from an entity.
pub type KeyAccessor<E> = fn(&E) -> KeyValue;

/// The store attribute a key is written to and the segments it is built from.
pub struct KeyTemplate<E> {
    attribute: String,
    segments: Vec<(String, KeyAccessor<E>)>,
}

impl<E> KeyTemplate<E> {
    #[must_use]
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            segments: Vec::new(),
        }
    }

    /// Appends a `label<sep>value` segment.
    #[must_use]
    pub fn pair(mut self, label: impl Into<String>, accessor: KeyAccessor<E>) -> Self {
        self.segments.push((label.into(), accessor));
        self
    }

    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|(label, _)| label.as_str())
    }

    /// Builds the key for `entity`; `Ok(None)` when every segment is empty.
    pub fn resolve(&self, builder: &KeyBuilder, entity: &E) -> ModelResult<Option<String>> {
        let values: Vec<(&str, KeyValue)> = self
            .segments
            .iter()
            .map(|(label, accessor)| (label.as_str(), accessor(entity)))
            .collect();
        let key = builder.join(&values)?;
        Ok((!key.is_empty()).then_some(key))
    }
}

impl<E> Clone for KeyTemplate<E> {
    fn clone(&self) -> Self {
        Self {
            attribute: self.attribute.clone(),
            segments: self.segments.clone(),
        }
    }
}

impl<E> fmt::Debug for KeyTemplate<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyTemplate")
            .field("attribute", &self.attribute)
            .field("labels", &self.labels().collect::<Vec<_>>())
            .finish()
    }
}

/// One named index.
pub struct IndexDescriptor<E> {
    name: String,
    partition: KeyTemplate<E>,
    sort: Option<KeyTemplate<E>>,
}

impl<E> IndexDescriptor<E> {
    /// The primary index of an entity type.
    #[must_use]
    pub fn primary(partition: KeyTemplate<E>) -> Self {
        Self::secondary(PRIMARY_INDEX, partition)
    }

    /// A secondary index. Its sort key is optional.
    #[must_use]
    pub fn secondary(name: impl Into<String>, partition: KeyTemplate<E>) -> Self {
        Self {
            name: name.into(),
            partition,
            sort: None,
        }
    }

    #[must_use]
    pub fn with_sort(mut self, sort: KeyTemplate<E>) -> Self {
        self.sort = Some(sort);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.name == PRIMARY_INDEX
    }

    #[must_use]
    pub fn partition(&self) -> &KeyTemplate<E> {
        &self.partition
    }

    #[must_use]
    pub fn sort(&self) -> Option<&KeyTemplate<E>> {
        self.sort.as_ref()
    }

    /// Store attributes this index writes.
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition.attribute()).chain(self.sort.as_ref().map(KeyTemplate::attribute))
    }

    /// Resolves the index keys for `entity`.
    ///
    /// An empty partition key is a `MissingParameter`. An empty sort key is
    /// one too on the primary index; on a secondary index the sort attribute
    /// is left off (sparse index).
    pub fn resolve(&self, builder: &KeyBuilder, entity: &E) -> ModelResult<ResolvedIndex> {
        let partition = self.resolve_partition(builder, entity)?;
        let sort = match &self.sort {
            Some(template) => match template.resolve(builder, entity)? {
                Some(value) => Some(KeyPart::new(template.attribute(), value)),
                None if self.is_primary() => {
                    return Err(ModelError::missing(template.attribute(), Some(&self.name)));
                }
                None => None,
            },
            None => None,
        };
        Ok(ResolvedIndex {
            index_name: self.name.clone(),
            partition,
            sort,
        })
    }

    /// Builds a query key condition from the entity's current values.
    ///
    /// `BeginsWith` over an empty sort key degrades to a partition-only
    /// query; the other comparisons need a sort key. `Between` appends its
    /// bounds to the resolved sort key.
    pub fn key_condition(
        &self,
        builder: &KeyBuilder,
        entity: &E,
        op: QueryOp,
    ) -> ModelResult<KeyCondition> {
        let partition = self.resolve_partition(builder, entity)?;
        let mut condition = KeyCondition::partition(partition.attribute, partition.value);
        if !self.is_primary() {
            condition = condition.on_index(self.name.clone());
        }
        let template = match (&op, &self.sort) {
            (QueryOp::PartitionOnly, _) => return Ok(condition),
            (_, None) => {
                return Err(ModelError::invalid(
                    "query_op",
                    format!("index `{}` has no sort key", self.name),
                ));
            }
            (_, Some(template)) => template,
        };
        let sort_value = template.resolve(builder, entity)?.unwrap_or_default();
        let missing = || ModelError::missing(template.attribute(), Some(&self.name));
        let sort = match op {
            QueryOp::PartitionOnly => return Ok(condition),
            QueryOp::BeginsWith if sort_value.is_empty() => return Ok(condition),
            QueryOp::BeginsWith => SortCondition::BeginsWith(sort_value),
            QueryOp::Between { low, high } => {
                SortCondition::Between(format!("{sort_value}{low}"), format!("{sort_value}{high}"))
            }
            _ if sort_value.is_empty() => return Err(missing()),
            QueryOp::Eq => SortCondition::Eq(sort_value),
            QueryOp::Gt => SortCondition::Gt(sort_value),
            QueryOp::Gte => SortCondition::Gte(sort_value),
            QueryOp::Lt => SortCondition::Lt(sort_value),
            QueryOp::Lte => SortCondition::Lte(sort_value),
        };
        Ok(condition.sort(template.attribute(), sort))
    }

    fn resolve_partition(&self, builder: &KeyBuilder, entity: &E) -> ModelResult<KeyPart> {
        let value = self
            .partition
            .resolve(builder, entity)?
            .ok_or_else(|| ModelError::missing(self.partition.attribute(), Some(&self.name)))?;
        Ok(KeyPart::new(self.partition.attribute(), value))
    }
}

impl<E> Clone for IndexDescriptor<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            partition: self.partition.clone(),
            sort: self.sort.clone(),
        }
    }
}

impl<E> fmt::Debug for IndexDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDescriptor")
            .field("name", &self.name)
            .field("partition", &self.partition)
            .field("sort", &self.sort)
            .finish()
    }
}

/// An attribute name and the key value written to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPart {
    pub attribute: String,
    pub value: String,
}

impl KeyPart {
    fn new(attribute: &str, value: String) -> Self {
        Self {
            attribute: attribute.to_string(),
            value,
        }
    }
}

/// Keys of one index for one entity snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIndex {
    pub index_name: String,
    pub partition: KeyPart,
    pub sort: Option<KeyPart>,
}

impl ResolvedIndex {
    /// The keys as string attributes.
    #[must_use]
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        for part in std::iter::once(&self.partition).chain(self.sort.as_ref()) {
            item.insert(part.attribute.clone(), AttributeValue::S(part.value.clone()));
        }
        item
    }
}

/// The validated set of indexes for one entity type.
pub struct IndexSet<E> {
    builder: KeyBuilder,
    primary: IndexDescriptor<E>,
    secondary: Vec<IndexDescriptor<E>>,
}

impl<E> IndexSet<E> {
    /// Starts a set from its primary index.
    pub fn new(primary: IndexDescriptor<E>) -> ModelResult<Self> {
        if !primary.is_primary() {
            return Err(ModelError::invalid(
                "primary",
                format!("primary index must be named `{PRIMARY_INDEX}`, got `{}`", primary.name),
            ));
        }
        check_distinct_attributes(&primary)?;
        Ok(Self {
            builder: KeyBuilder::default(),
            primary,
            secondary: Vec::new(),
        })
    }

    /// Uses `builder` (and its separator) for every key in the set.
    #[must_use]
    pub fn with_key_builder(mut self, builder: KeyBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Adds a secondary index. Names must be unique, `primary` is reserved and
    /// no two indexes may write the same attribute.
    pub fn add(mut self, index: IndexDescriptor<E>) -> ModelResult<Self> {
        if index.is_primary() {
            return Err(ModelError::invalid(
                "index",
                format!("`{PRIMARY_INDEX}` is reserved for the primary index"),
            ));
        }
        if self.get(index.name()).is_some() {
            return Err(ModelError::invalid(
                "index",
                format!("duplicate index name `{}`", index.name()),
            ));
        }
        check_distinct_attributes(&index)?;
        let clash = {
            let taken = self.attribute_names();
            index.attributes().find(|a| taken.contains(a)).map(str::to_string)
        };
        if let Some(attribute) = clash {
            return Err(ModelError::invalid(
                attribute,
                format!("already written by another index (adding `{}`)", index.name()),
            ));
        }
        self.secondary.push(index);
        Ok(self)
    }

    #[must_use]
    pub fn key_builder(&self) -> &KeyBuilder {
        &self.builder
    }

    #[must_use]
    pub fn primary(&self) -> &IndexDescriptor<E> {
        &self.primary
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&IndexDescriptor<E>> {
        self.iter().find(|index| index.name() == name)
    }

    /// Primary first, then secondaries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexDescriptor<E>> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }

    pub fn secondary(&self) -> impl Iterator<Item = &IndexDescriptor<E>> {
        self.secondary.iter()
    }

    /// Every attribute written by any index.
    #[must_use]
    pub fn attribute_names(&self) -> BTreeSet<&str> {
        self.iter().flat_map(IndexDescriptor::attributes).collect()
    }

    /// The primary key of `entity`, as used by get and delete.
    pub fn key_item(&self, entity: &E) -> ModelResult<Item> {
        Ok(self.primary.resolve(&self.builder, entity)?.to_item())
    }

    /// Every index attribute to store alongside the entity.
    pub fn index_attributes(&self, entity: &E) -> ModelResult<Item> {
        let mut item = Item::new();
        for index in self.iter() {
            item.extend(index.resolve(&self.builder, entity)?.to_item());
        }
        Ok(item)
    }

    /// Secondary index attributes only.
    pub fn secondary_attributes(&self, entity: &E) -> ModelResult<Item> {
        let mut item = Item::new();
        for index in &self.secondary {
            item.extend(index.resolve(&self.builder, entity)?.to_item());
        }
        Ok(item)
    }

    /// A query key condition on the named index.
    pub fn key_condition(&self, index_name: &str, entity: &E, op: QueryOp) -> ModelResult<KeyCondition> {
        let index = self
            .get(index_name)
            .ok_or_else(|| ModelError::invalid("index", format!("unknown index `{index_name}`")))?;
        index.key_condition(&self.builder, entity, op)
    }
}

impl<E> fmt::Debug for IndexSet<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSet")
            .field("separator", &self.builder.separator())
            .field("primary", &self.primary)
            .field("secondary", &self.secondary)
            .finish()
    }
}

fn check_distinct_attributes<E>(index: &IndexDescriptor<E>) -> ModelResult<()> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for attribute in index.attributes() {
        if !seen.insert(attribute) {
            return Err(ModelError::invalid(
                attribute,
                format!("index `{}` uses the attribute twice", index.name()),
            ));
        }
    }
    Ok(())
}
