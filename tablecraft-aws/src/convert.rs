//! Conversion between tablecraft values and the SDK's attribute values.

use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue as SdkValue;
use std::collections::HashMap;
use tablecraft_store::{TransportError, TransportResult};
use tablecraft_types::{AttributeValue, Expression, Item, Number};

/// An item in the SDK's representation.
pub type SdkItem = HashMap<String, SdkValue>;

/// Converts one value to the SDK representation. Infallible: every
/// [`AttributeValue`] has an SDK counterpart.
#[must_use]
pub fn to_sdk(value: &AttributeValue) -> SdkValue {
    match value {
        AttributeValue::S(s) => SdkValue::S(s.clone()),
        AttributeValue::N(n) => SdkValue::N(n.to_string()),
        AttributeValue::B(b) => SdkValue::B(Blob::new(b.clone())),
        AttributeValue::Bool(b) => SdkValue::Bool(*b),
        AttributeValue::Null => SdkValue::Null(true),
        AttributeValue::L(list) => SdkValue::L(list.iter().map(to_sdk).collect()),
        AttributeValue::M(map) => SdkValue::M(to_sdk_item(map)),
        AttributeValue::Ss(set) => SdkValue::Ss(set.iter().cloned().collect()),
        AttributeValue::Ns(set) => SdkValue::Ns(set.iter().map(ToString::to_string).collect()),
        AttributeValue::Bs(set) => SdkValue::Bs(set.iter().map(|b| Blob::new(b.clone())).collect()),
    }
}

/// Converts one SDK value. Fails on malformed numbers and on value types
/// this SDK version does not model.
pub fn from_sdk(value: &SdkValue) -> TransportResult<AttributeValue> {
    Ok(match value {
        SdkValue::S(s) => AttributeValue::S(s.clone()),
        SdkValue::N(n) => AttributeValue::N(number(n)?),
        SdkValue::B(b) => AttributeValue::B(b.as_ref().to_vec()),
        SdkValue::Bool(b) => AttributeValue::Bool(*b),
        SdkValue::Null(_) => AttributeValue::Null,
        SdkValue::L(list) => AttributeValue::L(list.iter().map(from_sdk).collect::<TransportResult<_>>()?),
        SdkValue::M(map) => AttributeValue::M(from_sdk_item(map)?),
        SdkValue::Ss(set) => AttributeValue::Ss(set.iter().cloned().collect()),
        SdkValue::Ns(set) => AttributeValue::Ns(set.iter().map(|n| number(n)).collect::<TransportResult<_>>()?),
        SdkValue::Bs(set) => AttributeValue::Bs(set.iter().map(|b| b.as_ref().to_vec()).collect()),
        other => {
            return Err(TransportError::validation(format!(
                "unsupported attribute value {other:?}"
            )));
        }
    })
}

fn number(literal: &str) -> TransportResult<Number> {
    Number::parse(literal)
        .map_err(|e| TransportError::validation(format!("store returned a bad number: {e}")))
}

#[must_use]
pub fn to_sdk_item(item: &Item) -> SdkItem {
    item.iter().map(|(k, v)| (k.clone(), to_sdk(v))).collect()
}

pub fn from_sdk_item(item: &SdkItem) -> TransportResult<Item> {
    item.iter()
        .map(|(k, v)| Ok((k.clone(), from_sdk(v)?)))
        .collect()
}

/// Placeholder maps for one request, merged from every expression it
/// carries. The SDK rejects empty maps, so each is `None` when unused.
#[derive(Debug, Default, PartialEq)]
pub struct Placeholders {
    pub names: Option<HashMap<String, String>>,
    pub values: Option<SdkItem>,
}

impl Placeholders {
    /// Merges the placeholders of `expressions`. A placeholder bound to two
    /// different values is a validation error.
    pub fn merge<'a>(expressions: impl IntoIterator<Item = &'a Expression>) -> TransportResult<Self> {
        let mut names: HashMap<String, String> = HashMap::new();
        let mut values: HashMap<String, AttributeValue> = HashMap::new();
        for expression in expressions {
            for (placeholder, attribute) in &expression.names {
                if let Some(bound) = names.insert(placeholder.clone(), attribute.clone()) {
                    if bound != *attribute {
                        return Err(conflict(placeholder));
                    }
                }
            }
            for (placeholder, value) in &expression.values {
                if let Some(bound) = values.insert(placeholder.clone(), value.clone()) {
                    if bound != *value {
                        return Err(conflict(placeholder));
                    }
                }
            }
        }
        Ok(Self {
            names: (!names.is_empty()).then_some(names),
            values: (!values.is_empty())
                .then(|| values.iter().map(|(k, v)| (k.clone(), to_sdk(v))).collect()),
        })
    }
}

fn conflict(placeholder: &str) -> TransportError {
    TransportError::validation(format!(
        "placeholder `{placeholder}` is bound differently by two expressions"
    ))
}
