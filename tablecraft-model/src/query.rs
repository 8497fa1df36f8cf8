//! Query key conditions.
//!
//! A [`KeyCondition`] is carried in structured form and rendered to the
//! store's expression syntax only at the transport boundary.

use tablecraft_types::{AttributeValue, Expression, Item};

/// How the sort key of an index participates in a query built from an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOp {
    /// Match the partition only.
    PartitionOnly,
    Eq,
    BeginsWith,
    /// Sort key between `<sort key><low>` and `<sort key><high>`, inclusive.
    Between { low: String, high: String },
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A resolved sort key comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortCondition {
    Eq(String),
    BeginsWith(String),
    Between(String, String),
    Gt(String),
    Gte(String),
    Lt(String),
    Lte(String),
}

impl SortCondition {
    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Eq(v) => value == v,
            Self::BeginsWith(prefix) => value.starts_with(prefix.as_str()),
            Self::Between(low, high) => value >= low.as_str() && value <= high.as_str(),
            Self::Gt(v) => value > v.as_str(),
            Self::Gte(v) => value >= v.as_str(),
            Self::Lt(v) => value < v.as_str(),
            Self::Lte(v) => value <= v.as_str(),
        }
    }
}

/// Partition equality plus an optional sort key comparison, on the table
/// (`index_name == None`) or a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCondition {
    pub index_name: Option<String>,
    pub partition_attribute: String,
    pub partition_value: String,
    pub sort: Option<(String, SortCondition)>,
}

impl KeyCondition {
    #[must_use]
    pub fn partition(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            index_name: None,
            partition_attribute: attribute.into(),
            partition_value: value.into(),
            sort: None,
        }
    }

    #[must_use]
    pub fn on_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    #[must_use]
    pub fn sort(mut self, attribute: impl Into<String>, condition: SortCondition) -> Self {
        self.sort = Some((attribute.into(), condition));
        self
    }

    /// Renders `#pk = :pk [AND <sort clause>]`.
    #[must_use]
    pub fn to_expression(&self) -> Expression {
        let mut expr = Expression::new("#pk = :pk")
            .name("#pk", self.partition_attribute.clone())
            .value(":pk", self.partition_value.clone());
        let Some((attribute, condition)) = &self.sort else {
            return expr;
        };
        let clause = match condition {
            SortCondition::Eq(v) => single(&mut expr, "#sk = :sk", v),
            SortCondition::BeginsWith(v) => single(&mut expr, "begins_with(#sk, :sk)", v),
            SortCondition::Gt(v) => single(&mut expr, "#sk > :sk", v),
            SortCondition::Gte(v) => single(&mut expr, "#sk >= :sk", v),
            SortCondition::Lt(v) => single(&mut expr, "#sk < :sk", v),
            SortCondition::Lte(v) => single(&mut expr, "#sk <= :sk", v),
            SortCondition::Between(low, high) => {
                expr.values.insert(":sk_low".into(), AttributeValue::S(low.clone()));
                expr.values.insert(":sk_high".into(), AttributeValue::S(high.clone()));
                "#sk BETWEEN :sk_low AND :sk_high"
            }
        };
        expr.names.insert("#sk".into(), attribute.clone());
        expr.text = format!("{} AND {clause}", expr.text);
        expr
    }

    /// Whether `item` satisfies the condition. Key attributes must be strings.
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        let string_of = |name: &str| item.get(name).and_then(AttributeValue::as_s);
        if string_of(&self.partition_attribute) != Some(self.partition_value.as_str()) {
            return false;
        }
        match &self.sort {
            None => true,
            Some((attribute, condition)) => string_of(attribute).is_some_and(|v| condition.matches(v)),
        }
    }

    /// The sort attribute, if the condition has one.
    #[must_use]
    pub fn sort_attribute(&self) -> Option<&str> {
        self.sort.as_ref().map(|(attribute, _)| attribute.as_str())
    }
}

fn single(expr: &mut Expression, clause: &'static str, value: &str) -> &'static str {
    expr.values.insert(":sk".into(), AttributeValue::S(value.to_string()));
    clause
}
