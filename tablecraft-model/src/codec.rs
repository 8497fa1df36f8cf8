//! Entity ⇄ item conversion.
//!
//! Entities go through `serde_json::Value` with arbitrary-precision numbers,
//! so the decimal text a field serializes to is the text that reaches the
//! store, and stored text is handed back to serde unchanged. Declared
//! attribute kinds decide binary/set encodings and how strictly a stored
//! number must fit the entity's field.

use crate::entity::Entity;
use crate::error::{ModelError, ModelResult};
use crate::schema::{AttributeKind, EntitySchema};
use bigdecimal::RoundingMode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tablecraft_types::{AttributeValue, Item, Number, Patch};
use tracing::trace;

/// What to do with a stored number that does not fit the declared kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericPolicy {
    /// Raise `DecimalConversion`.
    #[default]
    Fail,
    /// Drop the excess digits toward zero.
    Truncate,
    /// Round half to even.
    Round,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecOptions {
    /// Reject attributes the schema does not declare, in both directions.
    pub strict: bool,
    pub numeric_policy: NumericPolicy,
    /// Write null attributes instead of omitting them.
    pub keep_nulls: bool,
}

/// An entity read from an item, plus whatever the item carried that the
/// schema does not declare.
#[derive(Debug, Clone, PartialEq)]
pub struct Hydrated<E> {
    pub entity: E,
    pub unmapped: Item,
}

/// Converts entities of one type to and from store items.
pub struct ItemCodec<E> {
    schema: Arc<EntitySchema<E>>,
    options: CodecOptions,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for ItemCodec<E> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            options: self.options,
            _entity: PhantomData,
        }
    }
}

impl<E> fmt::Debug for ItemCodec<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemCodec")
            .field("entity_type", &self.schema.entity_type())
            .field("options", &self.options)
            .finish()
    }
}

impl<E: Entity> ItemCodec<E> {
    #[must_use]
    pub fn new(schema: Arc<EntitySchema<E>>) -> Self {
        Self {
            schema,
            options: CodecOptions::default(),
            _entity: PhantomData,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: CodecOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn schema(&self) -> &EntitySchema<E> {
        &self.schema
    }

    #[must_use]
    pub fn options(&self) -> CodecOptions {
        self.options
    }

    /// The full item: entity attributes plus every index attribute.
    pub fn to_store_item(&self, entity: &E) -> ModelResult<Item> {
        let mut item = self.attributes_of(entity, self.options.keep_nulls)?;
        item.extend(self.schema.indexes().index_attributes(entity)?);
        Ok(item)
    }

    /// [`ItemCodec::to_store_item`], writing back attributes previously
    /// returned in [`Hydrated::unmapped`]. Entity attributes win on conflict.
    pub fn to_store_item_with(&self, entity: &E, unmapped: &Item) -> ModelResult<Item> {
        let mut item = self.to_store_item(entity)?;
        for (name, value) in unmapped {
            if self.schema.is_index_attribute(name) {
                continue;
            }
            item.entry(name.clone()).or_insert_with(|| value.clone());
        }
        Ok(item)
    }

    /// The entity as a patch, for merging onto an existing item. `None`
    /// fields become explicit nulls so the merge policy decides them.
    pub fn to_patch(&self, entity: &E) -> ModelResult<Patch> {
        Ok(Patch::from_item(self.attributes_of(entity, true)?))
    }

    /// Reads an entity back, stripping index attributes.
    pub fn from_store_item(&self, item: &Item) -> ModelResult<Hydrated<E>> {
        let mut object = Map::new();
        let mut unmapped = Item::new();
        for (name, value) in item {
            if self.schema.is_index_attribute(name) {
                continue;
            }
            let kind = match self.schema.kind_of(name) {
                Some(kind) => kind,
                None if self.options.strict => {
                    return Err(ModelError::mapping(
                        name.as_str(),
                        format!("not declared on `{}`", self.schema.entity_type()),
                    ));
                }
                None => {
                    unmapped.insert(name.clone(), value.clone());
                    AttributeKind::Any
                }
            };
            object.insert(name.clone(), self.read_value(name, value, kind)?);
        }
        let entity = serde_json::from_value(Value::Object(object))
            .map_err(|e| ModelError::mapping(self.schema.entity_type(), e.to_string()))?;
        if !unmapped.is_empty() {
            trace!(
                entity_type = self.schema.entity_type(),
                count = unmapped.len(),
                "preserving unmapped attributes"
            );
        }
        Ok(Hydrated { entity, unmapped })
    }

    fn attributes_of(&self, entity: &E, keep_nulls: bool) -> ModelResult<Item> {
        let value = serde_json::to_value(entity)
            .map_err(|e| ModelError::mapping(self.schema.entity_type(), e.to_string()))?;
        let Value::Object(object) = value else {
            return Err(ModelError::mapping(
                self.schema.entity_type(),
                "entity must serialize to a map",
            ));
        };
        let mut item = Item::new();
        for (name, value) in object {
            if self.schema.is_index_attribute(&name) {
                return Err(ModelError::mapping(
                    name,
                    "entity field collides with an index attribute",
                ));
            }
            if value.is_null() {
                if keep_nulls {
                    item.insert(name, AttributeValue::Null);
                }
                continue;
            }
            let kind = match self.schema.kind_of(&name) {
                Some(kind) => kind,
                None if self.options.strict => {
                    return Err(ModelError::mapping(
                        name,
                        format!("not declared on `{}`", self.schema.entity_type()),
                    ));
                }
                None => AttributeKind::Any,
            };
            if let Some(attribute) = self.write_value(&name, value, kind)? {
                item.insert(name, attribute);
            }
        }
        Ok(item)
    }

    /// `Ok(None)` means "omit": empty sets cannot be stored.
    fn write_value(&self, name: &str, value: Value, kind: AttributeKind) -> ModelResult<Option<AttributeValue>> {
        let mismatch = |expected: &str, value: &Value| {
            ModelError::mapping(name, format!("expected {expected}, found {}", json_type(value)))
        };
        let converted = match (kind, value) {
            (AttributeKind::Any, value) => value_to_attribute(name, value)?,
            (AttributeKind::String, Value::String(s)) => AttributeValue::S(s),
            (AttributeKind::Bool, Value::Bool(b)) => AttributeValue::Bool(b),
            (kind, Value::Number(n)) if kind.is_numeric() => {
                let number = json_number(name, &n)?;
                AttributeValue::N(fit_number(name, number, kind, self.options.numeric_policy)?)
            }
            (AttributeKind::Binary, Value::Array(bytes)) => AttributeValue::B(json_bytes(name, &bytes)?),
            (AttributeKind::Map, Value::Object(map)) => value_to_attribute(name, Value::Object(map))?,
            (AttributeKind::List, Value::Array(list)) => value_to_attribute(name, Value::Array(list))?,
            (AttributeKind::StringSet, Value::Array(list)) => {
                let set = unique_members(
                    name,
                    list.into_iter().map(|v| match v {
                        Value::String(s) => Ok(s),
                        other => Err(mismatch("string set member", &other)),
                    }),
                )?;
                if set.is_empty() {
                    return Ok(None);
                }
                AttributeValue::Ss(set)
            }
            (AttributeKind::NumberSet, Value::Array(list)) => {
                let set = unique_members(
                    name,
                    list.iter().map(|v| match v {
                        Value::Number(n) => json_number(name, n),
                        other => Err(mismatch("number set member", other)),
                    }),
                )?;
                if set.is_empty() {
                    return Ok(None);
                }
                AttributeValue::Ns(set)
            }
            (AttributeKind::BinarySet, Value::Array(list)) => {
                let set = unique_members(
                    name,
                    list.iter().map(|v| match v {
                        Value::Array(bytes) => json_bytes(name, bytes),
                        other => Err(mismatch("binary set member", other)),
                    }),
                )?;
                if set.is_empty() {
                    return Ok(None);
                }
                AttributeValue::Bs(set)
            }
            (kind, value) => return Err(mismatch(&kind.to_string(), &value)),
        };
        Ok(Some(converted))
    }

    fn read_value(&self, name: &str, value: &AttributeValue, kind: AttributeKind) -> ModelResult<Value> {
        match (kind, value) {
            (_, AttributeValue::Null) => Ok(Value::Null),
            (AttributeKind::Float, AttributeValue::N(n)) => {
                let fitted = fit_number(name, n.clone(), kind, self.options.numeric_policy)?;
                let float = fitted
                    .to_f64()
                    .ok_or_else(|| ModelError::decimal(name, n, "float"))?;
                // Display form of an f64 is what serde_json accepts as that float.
                number_literal(name, &float.to_string())
            }
            (kind, AttributeValue::N(n)) if kind.is_numeric() => {
                let fitted = fit_number(name, n.clone(), kind, self.options.numeric_policy)?;
                number_literal(name, &fitted.to_plain_string())
            }
            (AttributeKind::NumberSet, AttributeValue::Ns(set)) => set
                .iter()
                .map(|n| number_literal(name, &n.to_plain_string()))
                .collect::<ModelResult<Vec<_>>>()
                .map(Value::Array),
            (kind, other) if kind.is_numeric() => Err(ModelError::mapping(
                name,
                format!("expected a number, found {}", other.type_descriptor()),
            )),
            (_, other) => attribute_to_value(name, other),
        }
    }
}

/// Collects set members, refusing duplicates so a list-backed field never
/// loses elements on the way to the store. Numbers compare by value.
fn unique_members<T: Ord>(
    name: &str,
    members: impl IntoIterator<Item = ModelResult<T>>,
) -> ModelResult<BTreeSet<T>> {
    let mut set = BTreeSet::new();
    for member in members {
        if !set.insert(member?) {
            return Err(ModelError::mapping(name, "set contains duplicate members"));
        }
    }
    Ok(set)
}

/// Converts a JSON value by shape: strings, numbers, booleans, nulls, lists
/// and maps map to their store counterparts.
pub fn value_to_attribute(name: &str, value: Value) -> ModelResult<AttributeValue> {
    Ok(match value {
        Value::Null => AttributeValue::Null,
        Value::Bool(b) => AttributeValue::Bool(b),
        Value::Number(n) => AttributeValue::N(json_number(name, &n)?),
        Value::String(s) => AttributeValue::S(s),
        Value::Array(list) => AttributeValue::L(
            list.into_iter()
                .map(|v| value_to_attribute(name, v))
                .collect::<ModelResult<_>>()?,
        ),
        Value::Object(map) => AttributeValue::M(
            map.into_iter()
                .map(|(k, v)| {
                    let converted = value_to_attribute(&k, v)?;
                    Ok((k, converted))
                })
                .collect::<ModelResult<_>>()?,
        ),
    })
}

/// Inverse of [`value_to_attribute`]. Binary values become arrays of bytes
/// and sets become arrays.
pub fn attribute_to_value(name: &str, value: &AttributeValue) -> ModelResult<Value> {
    Ok(match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => number_literal(name, &n.to_plain_string())?,
        AttributeValue::B(bytes) => bytes_value(bytes),
        AttributeValue::L(list) => Value::Array(
            list.iter()
                .map(|v| attribute_to_value(name, v))
                .collect::<ModelResult<_>>()?,
        ),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), attribute_to_value(k, v)?)))
                .collect::<ModelResult<_>>()?,
        ),
        AttributeValue::Ss(set) => Value::Array(set.iter().cloned().map(Value::String).collect()),
        AttributeValue::Ns(set) => Value::Array(
            set.iter()
                .map(|n| number_literal(name, &n.to_plain_string()))
                .collect::<ModelResult<_>>()?,
        ),
        AttributeValue::Bs(set) => Value::Array(set.iter().map(|b| bytes_value(b)).collect()),
    })
}

/// Checks that `number` fits `kind`, adjusting it when the policy allows.
pub fn fit_number(
    name: &str,
    number: Number,
    kind: AttributeKind,
    policy: NumericPolicy,
) -> ModelResult<Number> {
    let mode = match policy {
        NumericPolicy::Fail => None,
        NumericPolicy::Truncate => Some(RoundingMode::Down),
        NumericPolicy::Round => Some(RoundingMode::HalfEven),
    };
    let rescale = |number: &Number, scale: i64| -> ModelResult<Number> {
        match mode {
            Some(mode) => Ok(Number::from(number.as_decimal().with_scale_round(scale, mode))),
            None => Err(ModelError::decimal(name, number, kind.to_string())),
        }
    };
    match kind {
        AttributeKind::Integer | AttributeKind::Unsigned => {
            let whole = if number.is_integer() { number.clone() } else { rescale(&number, 0)? };
            let in_range = match kind {
                AttributeKind::Integer => whole.to_i64().is_some(),
                _ => whole.to_u64().is_some(),
            };
            if !in_range {
                return Err(ModelError::decimal(name, &number, kind.to_string()));
            }
            Ok(whole)
        }
        AttributeKind::Float => {
            if let Some(f) = number.to_f64_exact() {
                return Number::from_f64(f).map_err(|_| ModelError::decimal(name, &number, "float"));
            }
            if mode.is_none() {
                return Err(ModelError::decimal(name, &number, "float"));
            }
            number
                .to_f64()
                .and_then(|f| Number::from_f64(f).ok())
                .ok_or_else(|| ModelError::decimal(name, &number, "float"))
        }
        AttributeKind::Decimal { scale: Some(scale) } => {
            if number.fractional_digits() <= i64::from(scale) {
                Ok(number)
            } else {
                rescale(&number, i64::from(scale))
            }
        }
        _ => Ok(number),
    }
}

fn json_number(name: &str, n: &serde_json::Number) -> ModelResult<Number> {
    Number::parse(&n.to_string()).map_err(|_| ModelError::decimal(name, n, "decimal"))
}

fn number_literal(name: &str, text: &str) -> ModelResult<Value> {
    serde_json::from_str::<serde_json::Number>(text)
        .map(Value::Number)
        .map_err(|_| ModelError::decimal(name, text, "json number"))
}

fn json_bytes(name: &str, values: &[Value]) -> ModelResult<Vec<u8>> {
    values
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|b| u8::try_from(b).ok())
                .ok_or_else(|| ModelError::mapping(name, format!("expected a byte, found {v}")))
        })
        .collect()
}

fn bytes_value(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}
