//! Opaque store expressions.

use crate::{AttributeValue, Item};
use std::collections::BTreeMap;

/// A condition, update or filter expression with its placeholder maps.
///
/// The text is never parsed on this side; it travels to the store as-is.
/// `names` maps `#placeholder` to an attribute name and `values` maps
/// `:placeholder` to a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expression {
    pub text: String,
    pub names: BTreeMap<String, String>,
    pub values: Item,
}

impl Expression {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Binds a `#name` placeholder.
    #[must_use]
    pub fn name(mut self, placeholder: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.names.insert(placeholder.into(), attribute.into());
        self
    }

    /// Binds a `:value` placeholder.
    #[must_use]
    pub fn value(mut self, placeholder: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.values.insert(placeholder.into(), value.into());
        self
    }

    /// `attribute_not_exists(<attr>)`, the usual guard for inserts.
    #[must_use]
    pub fn attribute_not_exists(attribute: &str) -> Self {
        let placeholder = name_placeholder(attribute);
        Self::new(format!("attribute_not_exists({placeholder})")).name(placeholder, attribute)
    }

    /// `attribute_exists(<attr>)`, the usual guard for updates.
    #[must_use]
    pub fn attribute_exists(attribute: &str) -> Self {
        let placeholder = name_placeholder(attribute);
        Self::new(format!("attribute_exists({placeholder})")).name(placeholder, attribute)
    }

    /// `<attr> = <value>`.
    #[must_use]
    pub fn equals(attribute: &str, value: impl Into<AttributeValue>) -> Self {
        let name = name_placeholder(attribute);
        let value_placeholder = format!(":{}", &name[1..]);
        Self::new(format!("{name} = {value_placeholder}"))
            .name(name, attribute)
            .value(value_placeholder, value)
    }

    /// A projection over `attributes`. Each one gets its own `#projN`
    /// alias, so reserved words and other placeholders never clash.
    #[must_use]
    pub fn projection<S: AsRef<str>>(attributes: &[S]) -> Self {
        let mut projection = Self::default();
        let mut aliases = Vec::with_capacity(attributes.len());
        for (i, attribute) in attributes.iter().enumerate() {
            let alias = format!("#proj{i}");
            aliases.push(alias.clone());
            projection = projection.name(alias, attribute.as_ref());
        }
        projection.text = aliases.join(", ");
        projection
    }

    /// Joins two expressions with `AND`. Placeholders must not collide.
    #[must_use]
    pub fn and(mut self, other: Expression) -> Self {
        if self.text.is_empty() {
            return other;
        }
        if !other.text.is_empty() {
            self.text = format!("({}) AND ({})", self.text, other.text);
        }
        self.names.extend(other.names);
        self.values.extend(other.values);
        self
    }
}

/// `#` followed by the attribute name with anything outside `[A-Za-z0-9_]`
/// replaced, so the same attribute always maps to the same placeholder.
#[must_use]
pub fn name_placeholder(attribute: &str) -> String {
    let body: String = attribute
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("#{body}")
}
