//! In-memory evaluation of filter trees against JSON rows.
//!
//! Mirrors the SQL the where builder emits, including NULL semantics: any
//! comparison against a missing or null value is false, except `is`/`isNot`.
//! Relation entries read the related row (or rows) from the key named after
//! the relation; an array matches when any element matches.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use super::registry::FilterRegistry;
use super::types::{ComparisonOperator, FieldComparison, FieldFilter, Filter, FilterValue};
use super::where_builder::nested_filter;
use crate::catalog::{Catalog, EntityMetadata};
use crate::error::{QueryError, QueryResult};

/// Evaluates filters for one catalog and registry.
pub struct Evaluator<'a> {
    catalog: &'a Catalog,
    registry: &'a FilterRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(catalog: &'a Catalog, registry: &'a FilterRegistry) -> Self {
        Self { catalog, registry }
    }

    /// True when `row` satisfies `filter`.
    pub fn matches(
        &self,
        entity: &EntityMetadata,
        row: &Map<String, Value>,
        filter: &Filter,
    ) -> QueryResult<bool> {
        for sub in &filter.and {
            if !self.matches(entity, row, sub)? {
                return Ok(false);
            }
        }

        // An empty member matches every row, so only `or: []` is skipped.
        if !filter.or.is_empty() {
            let mut any = false;
            for sub in &filter.or {
                if self.matches(entity, row, sub)? {
                    any = true;
                    break;
                }
            }
            if !any {
                return Ok(false);
            }
        }

        for (name, entry) in &filter.fields {
            let matched = match (entity.relation(name), entry) {
                (Some(relation), _) => {
                    let target = self
                        .catalog
                        .get(&relation.target)
                        .ok_or_else(|| QueryError::UnknownEntity(relation.target.clone()))?;
                    let Some(nested) = nested_filter(entry) else {
                        return Err(QueryError::invalid_value(
                            name,
                            "relation",
                            "relation expects a nested filter",
                        ));
                    };
                    self.related(target, row.get(name), &nested)?
                }
                (None, FieldFilter::Comparison(cmp)) => self.field(entity, row, name, cmp)?,
                (None, FieldFilter::Relation(_)) => {
                    return Err(QueryError::invalid_value(
                        name,
                        "relation",
                        format!("'{name}' is not a relation of '{}'", entity.name),
                    ));
                }
            };
            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn related(
        &self,
        target: &EntityMetadata,
        value: Option<&Value>,
        filter: &Filter,
    ) -> QueryResult<bool> {
        let empty = Map::new();
        match value {
            Some(Value::Object(obj)) => self.matches(target, obj, filter),
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    let obj = item.as_object().unwrap_or(&empty);
                    if self.matches(target, obj, filter)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            // Outer join with no related row: every column reads as NULL.
            _ => self.matches(target, &empty, filter),
        }
    }

    fn field(
        &self,
        entity: &EntityMetadata,
        row: &Map<String, Value>,
        name: &str,
        cmp: &FieldComparison,
    ) -> QueryResult<bool> {
        if cmp.is_empty() {
            return Ok(true);
        }

        let actual = row.get(name).unwrap_or(&Value::Null);
        let column_type = entity.column_type(name);

        // Operators on one field are alternatives, as in SQL.
        for (op, expected) in cmp {
            let hit = match self
                .registry
                .get_filter(op, column_type, Some(&entity.name), Some(name))
            {
                Some((handler, config)) => handler
                    .evaluate(actual, expected, config)
                    .ok_or_else(|| QueryError::unknown_operator(name, op))?,
                None => compare(name, &ComparisonOperator::parse(op), actual, expected)?,
            };
            if hit {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Evaluate one base operator.
pub fn compare(
    field: &str,
    operator: &ComparisonOperator,
    actual: &Value,
    expected: &FilterValue,
) -> QueryResult<bool> {
    let op = operator.as_str();
    let expect_scalar = || {
        if expected.is_scalar() {
            Ok(expected.to_json())
        } else {
            Err(QueryError::invalid_value(field, op, "expected a scalar"))
        }
    };

    let ord = |want: fn(Ordering) -> bool| -> QueryResult<bool> {
        let rhs = expect_scalar()?;
        Ok(compare_json(actual, &rhs).is_some_and(want))
    };

    match operator {
        ComparisonOperator::Eq => ord(Ordering::is_eq),
        ComparisonOperator::Neq => ord(Ordering::is_ne),
        ComparisonOperator::Gt => ord(Ordering::is_gt),
        ComparisonOperator::Gte => ord(Ordering::is_ge),
        ComparisonOperator::Lt => ord(Ordering::is_lt),
        ComparisonOperator::Lte => ord(Ordering::is_le),
        ComparisonOperator::Like
        | ComparisonOperator::NotLike
        | ComparisonOperator::ILike
        | ComparisonOperator::NotILike => {
            let pattern = expected
                .as_str()
                .ok_or_else(|| QueryError::invalid_value(field, op, "expected a string pattern"))?;
            let insensitive = matches!(
                operator,
                ComparisonOperator::ILike | ComparisonOperator::NotILike
            );
            let negate = matches!(
                operator,
                ComparisonOperator::NotLike | ComparisonOperator::NotILike
            );
            let Some(text) = actual.as_str() else {
                return Ok(false);
            };
            let re = like_regex(pattern, insensitive)
                .map_err(|e| QueryError::invalid_value(field, op, e.to_string()))?;
            Ok(re.is_match(text) != negate)
        }
        ComparisonOperator::Is | ComparisonOperator::IsNot => {
            let hit = match expected {
                FilterValue::Null => actual.is_null(),
                FilterValue::Boolean(b) => actual.as_bool() == Some(*b),
                _ => {
                    return Err(QueryError::invalid_value(
                        field,
                        op,
                        "expected true, false or null",
                    ));
                }
            };
            Ok(hit == matches!(operator, ComparisonOperator::Is))
        }
        ComparisonOperator::In | ComparisonOperator::NotIn => {
            let FilterValue::List(items) = expected else {
                return Err(QueryError::invalid_value(field, op, "expected an array"));
            };
            if items.is_empty() {
                return Err(QueryError::invalid_value(field, op, "array must not be empty"));
            }
            if actual.is_null() {
                return Ok(false);
            }
            let found = items
                .iter()
                .any(|item| compare_json(actual, &item.to_json()).is_some_and(Ordering::is_eq));
            Ok(found == matches!(operator, ComparisonOperator::In))
        }
        ComparisonOperator::Between | ComparisonOperator::NotBetween => {
            let FilterValue::Range(range) = expected else {
                return Err(QueryError::invalid_value(field, op, "expected {lower, upper}"));
            };
            let lower = compare_json(actual, &range.lower.to_json());
            let upper = compare_json(actual, &range.upper.to_json());
            let (Some(lower), Some(upper)) = (lower, upper) else {
                return Ok(false);
            };
            let inside = lower.is_ge() && upper.is_le();
            Ok(inside == matches!(operator, ComparisonOperator::Between))
        }
        ComparisonOperator::Custom(name) => Err(QueryError::unknown_operator(field, name)),
    }
}

/// SQL-style comparison of two JSON scalars. `None` when either side is
/// null or the types are not comparable.
pub fn compare_json(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Translate a LIKE pattern into an anchored regex. `\` escapes the next char.
fn like_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    RegexBuilder::new(&out)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()
}
