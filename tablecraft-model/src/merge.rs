//! Partial-update reconciliation.
//!
//! [`merge`] overlays a [`Patch`] onto an existing item. Nested maps present
//! on both sides merge attribute by attribute under the same policy; every
//! other value, lists and sets included, is replaced whole. A
//! [`PatchValue::Clear`] always writes null.

use serde::{Deserialize, Serialize};
use tablecraft_types::{AttributeValue, Item, Patch, PatchValue};

/// Which side wins when both carry an attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Incoming values overwrite unless they are null.
    #[default]
    NonNullWins,
    /// Incoming values always overwrite, nulls included.
    UpdatesWin,
    /// Incoming values only fill attributes missing from the existing item.
    ExistingWins,
}

/// Returns `existing` with `incoming` applied under `policy`.
///
/// Neither input is modified.
#[must_use]
pub fn merge(existing: &Item, incoming: &Patch, policy: MergePolicy) -> Item {
    let mut result = existing.clone();
    merge_into(&mut result, incoming, policy);
    result
}

fn merge_into(target: &mut Item, incoming: &Patch, policy: MergePolicy) {
    for (name, change) in incoming {
        if let PatchValue::Clear = change {
            target.insert(name.clone(), AttributeValue::Null);
            continue;
        }
        match target.get_mut(name) {
            Some(current) => apply(current, change, policy),
            None => {
                if let Some(value) = materialize(change, policy) {
                    target.insert(name.clone(), value);
                }
            }
        }
    }
}

/// Applies one change to an attribute the existing item already has.
fn apply(current: &mut AttributeValue, change: &PatchValue, policy: MergePolicy) {
    if let (AttributeValue::M(existing), Some(nested)) = (&mut *current, as_nested(change)) {
        match nested {
            Nested::Borrowed(patch) => merge_into(existing, patch, policy),
            Nested::Owned(patch) => merge_into(existing, &patch, policy),
        }
        return;
    }
    let overwrite = match (policy, change) {
        (_, PatchValue::Clear) => true,
        (MergePolicy::ExistingWins, _) => false,
        (MergePolicy::NonNullWins, PatchValue::Null) => false,
        (MergePolicy::NonNullWins | MergePolicy::UpdatesWin, _) => true,
    };
    if overwrite {
        if let Some(value) = materialize(change, policy) {
            *current = value;
        }
    }
}

/// The value an attribute takes when the existing item lacks it, or `None`
/// to leave it absent.
fn materialize(change: &PatchValue, policy: MergePolicy) -> Option<AttributeValue> {
    match change {
        PatchValue::Clear => Some(AttributeValue::Null),
        PatchValue::Null | PatchValue::Set(AttributeValue::Null) => match policy {
            MergePolicy::NonNullWins => None,
            MergePolicy::UpdatesWin | MergePolicy::ExistingWins => Some(AttributeValue::Null),
        },
        PatchValue::Map(patch) => Some(AttributeValue::M(merge(&Item::new(), patch, policy))),
        PatchValue::Set(AttributeValue::M(item)) => {
            Some(AttributeValue::M(merge(&Item::new(), &Patch::from_item(item.clone()), policy)))
        }
        PatchValue::Set(value) => Some(value.clone()),
    }
}

enum Nested<'a> {
    Borrowed(&'a Patch),
    Owned(Patch),
}

/// A change that merges into a map, whether given as a nested patch or as a
/// plain map value.
fn as_nested(change: &PatchValue) -> Option<Nested<'_>> {
    match change {
        PatchValue::Map(patch) => Some(Nested::Borrowed(patch)),
        PatchValue::Set(AttributeValue::M(item)) => Some(Nested::Owned(Patch::from_item(item.clone()))),
        _ => None,
    }
}
