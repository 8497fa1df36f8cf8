use crate::error::{ModelError, ModelResult};
use crate::index::{IndexDescriptor, IndexSet};
use crate::key::KeyBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declares an entity type once: its attributes and their store kinds, and
/// the indexes its keys are derived from.
pub struct EntitySchema<E> {
    entity_type: String,
    attributes: BTreeMap<String, AttributeKind>,
    indexes: IndexSet<E>,
}

/// How a declared attribute is represented in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    String,
    /// Signed integer that must fit in `i64`.
    Integer,
    /// Unsigned integer that must fit in `u64`.
    Unsigned,
    /// Binary float; stored numbers must round-trip through `f64`.
    Float,
    /// Exact decimal, optionally limited to `scale` fractional digits.
    Decimal { scale: Option<u32> },
    Bool,
    /// Byte sequence, stored as a binary attribute.
    Binary,
    StringSet,
    NumberSet,
    BinarySet,
    Map,
    List,
    /// Whatever the value looks like.
    Any,
}

impl AttributeKind {
    /// Shorthand for an unbounded decimal.
    #[must_use]
    pub const fn decimal() -> Self {
        Self::Decimal { scale: None }
    }

    /// Shorthand for a decimal with at most `scale` fractional digits.
    #[must_use]
    pub const fn fixed(scale: u32) -> Self {
        Self::Decimal { scale: Some(scale) }
    }

    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Unsigned | Self::Float | Self::Decimal { .. })
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decimal { scale: Some(scale) } => write!(f, "decimal({scale})"),
            Self::Decimal { scale: None } => f.write_str("decimal"),
            other => write!(f, "{}", format!("{other:?}").to_lowercase()),
        }
    }
}

impl<E> EntitySchema<E> {
    #[must_use]
    pub fn builder(entity_type: impl Into<String>) -> EntitySchemaBuilder<E> {
        EntitySchemaBuilder {
            entity_type: entity_type.into(),
            attributes: BTreeMap::new(),
            separator: None,
            primary: None,
            secondary: Vec::new(),
        }
    }

    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    #[must_use]
    pub fn kind_of(&self, attribute: &str) -> Option<AttributeKind> {
        self.attributes.get(attribute).copied()
    }

    #[must_use]
    pub fn is_declared(&self, attribute: &str) -> bool {
        self.attributes.contains_key(attribute)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, AttributeKind)> {
        self.attributes.iter().map(|(name, kind)| (name.as_str(), *kind))
    }

    #[must_use]
    pub fn indexes(&self) -> &IndexSet<E> {
        &self.indexes
    }

    /// True for attributes written by an index rather than by the entity.
    #[must_use]
    pub fn is_index_attribute(&self, attribute: &str) -> bool {
        self.indexes.attribute_names().contains(attribute)
    }
}

impl<E> fmt::Debug for EntitySchema<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySchema")
            .field("entity_type", &self.entity_type)
            .field("attributes", &self.attributes)
            .field("indexes", &self.indexes)
            .finish()
    }
}

/// Collects declarations; validated once by [`EntitySchemaBuilder::build`].
pub struct EntitySchemaBuilder<E> {
    entity_type: String,
    attributes: BTreeMap<String, AttributeKind>,
    separator: Option<String>,
    primary: Option<IndexDescriptor<E>>,
    secondary: Vec<IndexDescriptor<E>>,
}

impl<E> EntitySchemaBuilder<E> {
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.insert(name.into(), kind);
        self
    }

    #[must_use]
    pub fn key_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    #[must_use]
    pub fn primary(mut self, index: IndexDescriptor<E>) -> Self {
        self.primary = Some(index);
        self
    }

    #[must_use]
    pub fn secondary(mut self, index: IndexDescriptor<E>) -> Self {
        self.secondary.push(index);
        self
    }

    /// Validates the declarations.
    ///
    /// Fails when the primary index is missing, when index names or
    /// attributes collide, or when a declared attribute shadows an index
    /// attribute.
    pub fn build(self) -> ModelResult<EntitySchema<E>> {
        if self.entity_type.is_empty() {
            return Err(ModelError::missing("entity_type", None));
        }
        let primary = self
            .primary
            .ok_or_else(|| ModelError::missing("primary index", None))?;
        let mut indexes = IndexSet::new(primary)?;
        if let Some(separator) = self.separator {
            indexes = indexes.with_key_builder(KeyBuilder::with_separator(separator)?);
        }
        for index in self.secondary {
            indexes = indexes.add(index)?;
        }
        if let Some(shadowed) = indexes
            .attribute_names()
            .into_iter()
            .find(|name| self.attributes.contains_key(*name))
        {
            return Err(ModelError::invalid(
                shadowed,
                "declared as an entity attribute but written by an index",
            ));
        }
        Ok(EntitySchema {
            entity_type: self.entity_type,
            attributes: self.attributes,
            indexes,
        })
    }
}
