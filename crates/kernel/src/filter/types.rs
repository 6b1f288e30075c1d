//! Filter tree types.
//!
//! A [`Filter`] node carries optional `and`/`or` groups plus a map of field
//! entries. Each field entry is either a comparison (`{"gt": 10}`) or, when
//! the field names a declared relation, a nested filter over the related
//! entity. Whether a key is a relation is decided at compile time from the
//! catalog, not from the JSON shape alone.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A filter tree node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Sub-filters that must all match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub and: Vec<Filter>,

    /// Sub-filters of which at least one must match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub or: Vec<Filter>,

    /// Field comparisons and relation filters, ANDed together.
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldFilter>,
}

/// Entry for one field key of a filter node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldFilter {
    /// Operator → value map. Multiple operators are alternatives (ORed).
    Comparison(FieldComparison),
    /// Nested filter over a related entity.
    Relation(Box<Filter>),
}

/// Operator name → value. Keys are parsed with [`ComparisonOperator::parse`].
pub type FieldComparison = BTreeMap<String, FilterValue>;

impl Filter {
    /// Single comparison on one field.
    pub fn field(
        name: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        Self::default().with(name, operator, value)
    }

    /// All of the given filters.
    pub fn all_of(filters: Vec<Filter>) -> Self {
        Self {
            and: filters,
            ..Default::default()
        }
    }

    /// Any of the given filters.
    pub fn any_of(filters: Vec<Filter>) -> Self {
        Self {
            or: filters,
            ..Default::default()
        }
    }

    /// Filter over a related entity.
    pub fn relation(name: impl Into<String>, filter: Filter) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(name.into(), FieldFilter::Relation(Box::new(filter)));
        Self {
            fields,
            ..Default::default()
        }
    }

    /// Add an operator to a field's comparison, creating it if needed.
    ///
    /// A relation entry under the same name is replaced.
    pub fn with(
        mut self,
        name: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        let entry = self
            .fields
            .entry(name.into())
            .or_insert_with(|| FieldFilter::Comparison(FieldComparison::new()));
        if let FieldFilter::Relation(_) = entry {
            *entry = FieldFilter::Comparison(FieldComparison::new());
        }
        if let FieldFilter::Comparison(cmp) = entry {
            cmp.insert(operator.as_str().to_string(), value.into());
        }
        self
    }

    /// True when the filter constrains nothing.
    pub fn is_empty(&self) -> bool {
        self.and.iter().all(Filter::is_empty)
            && self.or.iter().all(Filter::is_empty)
            && self.fields.values().all(|f| match f {
                FieldFilter::Comparison(cmp) => cmp.is_empty(),
                FieldFilter::Relation(nested) => nested.is_empty(),
            })
    }

    /// AND two filters together, dropping empty sides.
    pub fn merge(self, other: Filter) -> Filter {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => other,
            (_, true) => self,
            _ => Filter::all_of(vec![self, other]),
        }
    }

    /// Every field key referenced anywhere in this node (not inside relations).
    pub fn field_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_field_names(&mut names);
        names
    }

    fn collect_field_names(&self, names: &mut BTreeSet<String>) {
        for sub in self.and.iter().chain(self.or.iter()) {
            sub.collect_field_names(names);
        }
        names.extend(self.fields.keys().cloned());
    }
}

/// Comparison operators.
///
/// The base set is closed; anything else is a custom operator resolved
/// through the filter registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    ILike,
    NotILike,
    Is,
    IsNot,
    In,
    NotIn,
    Between,
    NotBetween,
    Custom(String),
}

impl ComparisonOperator {
    pub fn parse(name: &str) -> Self {
        match name {
            "eq" => Self::Eq,
            "neq" => Self::Neq,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "like" => Self::Like,
            "notLike" => Self::NotLike,
            "iLike" => Self::ILike,
            "notILike" => Self::NotILike,
            "is" => Self::Is,
            "isNot" => Self::IsNot,
            "in" => Self::In,
            "notIn" => Self::NotIn,
            "between" => Self::Between,
            "notBetween" => Self::NotBetween,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::NotLike => "notLike",
            Self::ILike => "iLike",
            Self::NotILike => "notILike",
            Self::Is => "is",
            Self::IsNot => "isNot",
            Self::In => "in",
            Self::NotIn => "notIn",
            Self::Between => "between",
            Self::NotBetween => "notBetween",
            Self::Custom(name) => name,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<FilterValue>),
    Range(RangeValue),
}

/// Bounds for `between` / `notBetween`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeValue {
    pub lower: Box<FilterValue>,
    pub upper: Box<FilterValue>,
}

impl FilterValue {
    pub fn range(lower: impl Into<FilterValue>, upper: impl Into<FilterValue>) -> Self {
        FilterValue::Range(RangeValue {
            lower: Box::new(lower.into()),
            upper: Box::new(upper.into()),
        })
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FilterValue::Integer(i) => Some(*i as f64),
            FilterValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FilterValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, FilterValue::List(_) | FilterValue::Range(_))
    }

    /// Convert to a JSON value (used by the in-memory evaluator and cursors).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FilterValue::Null => serde_json::Value::Null,
            FilterValue::Boolean(b) => serde_json::Value::Bool(*b),
            FilterValue::Integer(i) => serde_json::Value::from(*i),
            FilterValue::Float(f) => serde_json::Value::from(*f),
            FilterValue::String(s) => serde_json::Value::String(s.clone()),
            FilterValue::List(items) => {
                serde_json::Value::Array(items.iter().map(FilterValue::to_json).collect())
            }
            FilterValue::Range(range) => serde_json::json!({
                "lower": range.lower.to_json(),
                "upper": range.upper.to_json(),
            }),
        }
    }

    /// Convert a scalar or array JSON value. Objects have no filter counterpart.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        Some(match value {
            serde_json::Value::Null => FilterValue::Null,
            serde_json::Value::Bool(b) => FilterValue::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => FilterValue::Integer(i),
                None => FilterValue::Float(n.as_f64()?),
            },
            serde_json::Value::String(s) => FilterValue::String(s.clone()),
            serde_json::Value::Array(items) => FilterValue::List(
                items
                    .iter()
                    .map(FilterValue::from_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            serde_json::Value::Object(_) => return None,
        })
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Integer(value.into())
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Boolean(value)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        FilterValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FilterValue::Null, Into::into)
    }
}
