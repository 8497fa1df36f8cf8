//! Entity modeling for tablecraft.
//!
//! Defines how application records map onto a single-table key-value store:
//! - [`KeyBuilder`]: deterministic `label#value` composite keys
//! - [`IndexDescriptor`] / [`IndexSet`]: primary and secondary key templates
//! - [`EntitySchema`]: attribute kinds plus indexes, declared once per type
//! - [`ItemCodec`]: entity ⇄ item conversion without precision loss
//! - [`merge`]: partial updates under a [`MergePolicy`]
//!
//! Everything here is pure: no I/O, no shared state.

mod codec;
mod entity;
mod error;
mod index;
mod input;
mod key;
mod merge;
mod query;
mod schema;

pub use codec::{
    CodecOptions, Hydrated, ItemCodec, NumericPolicy, attribute_to_value, fit_number,
    value_to_attribute,
};
pub use entity::Entity;
pub use error::{ModelError, ModelResult};
pub use index::{
    IndexDescriptor, IndexSet, KeyAccessor, KeyPart, KeyTemplate, PRIMARY_INDEX, ResolvedIndex,
};
pub use input::ItemInput;
pub use key::{DEFAULT_SEPARATOR, KeyBuilder, KeyValue, build_key};
pub use merge::{MergePolicy, merge};
pub use query::{KeyCondition, QueryOp, SortCondition};
pub use schema::{AttributeKind, EntitySchema, EntitySchemaBuilder};
