//! Partial-update input.
//!
//! A [`Patch`] distinguishes the three states a nullable field collapses:
//! an attribute missing from the patch is untouched, [`PatchValue::Null`] is
//! an explicit null subject to the merge policy, and [`PatchValue::Clear`]
//! forces the attribute to null whatever the policy says.

use crate::{AttributeValue, Item};
use std::collections::BTreeMap;
use std::collections::btree_map;

/// Incoming value for a single attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchValue {
    /// A concrete, non-null value.
    Set(AttributeValue),
    /// An explicit null.
    Null,
    /// Clear the attribute regardless of merge policy.
    Clear,
    /// A nested partial update, merged field by field.
    Map(Patch),
}

impl From<AttributeValue> for PatchValue {
    fn from(value: AttributeValue) -> Self {
        match value {
            AttributeValue::Null => Self::Null,
            AttributeValue::M(item) => Self::Map(Patch::from_item(item)),
            other => Self::Set(other),
        }
    }
}

/// A set of incoming attribute changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch(BTreeMap<String, PatchValue>);

impl Patch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a patch from a (possibly partial) item. Nulls become
    /// [`PatchValue::Null`] and nested maps become nested patches.
    #[must_use]
    pub fn from_item(item: Item) -> Self {
        Self(
            item.into_iter()
                .map(|(name, value)| (name, PatchValue::from(value)))
                .collect(),
        )
    }

    /// Adds a value. A null or map value is normalized like [`Patch::from_item`].
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.0.insert(name.into(), PatchValue::from(value.into()));
        self
    }

    /// Adds an explicit null.
    #[must_use]
    pub fn null(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into(), PatchValue::Null);
        self
    }

    /// Marks an attribute to be cleared.
    #[must_use]
    pub fn clear(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into(), PatchValue::Clear);
        self
    }

    /// Adds a nested patch for a map attribute.
    #[must_use]
    pub fn nested(mut self, name: impl Into<String>, patch: Patch) -> Self {
        self.0.insert(name.into(), PatchValue::Map(patch));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PatchValue) -> Option<PatchValue> {
        self.0.insert(name.into(), value)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PatchValue> {
        self.0.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, PatchValue> {
        self.0.iter()
    }
}

impl FromIterator<(String, PatchValue)> for Patch {
    fn from_iter<I: IntoIterator<Item = (String, PatchValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Patch {
    type Item = (&'a String, &'a PatchValue);
    type IntoIter = btree_map::Iter<'a, String, PatchValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<Item> for Patch {
    fn from(item: Item) -> Self {
        Self::from_item(item)
    }
}
