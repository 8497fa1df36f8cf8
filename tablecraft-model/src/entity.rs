use serde::Serialize;
use serde::de::DeserializeOwned;

/// An application record the codec can convert.
///
/// Any owned serde type whose serialized form is a map qualifies; what makes
/// it storable is the [`EntitySchema`](crate::EntitySchema) it is paired with.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {}

impl<T> Entity for T where T: Serialize + DeserializeOwned + Send + Sync {}
