use crate::codec::ItemCodec;
use crate::entity::Entity;
use crate::error::ModelResult;
use tablecraft_types::Item;

/// Write input that is either an already-built item or a typed entity.
///
/// Resolved once through [`ItemInput::into_item`] before any store call.
#[derive(Debug, Clone)]
pub enum ItemInput<'a, E> {
    Raw(Item),
    Entity(&'a E),
}

impl<'a, E: Entity> ItemInput<'a, E> {
    /// Raw items pass through untouched; entities are serialized with their
    /// index attributes.
    pub fn into_item(self, codec: &ItemCodec<E>) -> ModelResult<Item> {
        match self {
            Self::Raw(item) => Ok(item),
            Self::Entity(entity) => codec.to_store_item(entity),
        }
    }
}

impl<'a, E> From<&'a E> for ItemInput<'a, E> {
    fn from(entity: &'a E) -> Self {
        Self::Entity(entity)
    }
}
