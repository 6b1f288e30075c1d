//! Keyset (seek-method) paging.
//!
//! The effective sort always ends with the entity's key set, so every row
//! has a unique position and a cursor made of its sort-key values. Seeking
//! past a cursor is a filter, not an offset:
//!
//! ```text
//! OR_i [ AND_{j<i} (f_j = v_j) AND (f_i after v_i) ]
//! ```
//!
//! where "after" follows the query's own ordering, so a backward page simply
//! runs the inverted sort and seeks forward through it.

use serde_json::{Map, Value};

use super::cursor::{Cursor, KeysetField};
use super::types::{Connection, Edge, Page};
use crate::error::{QueryError, QueryResult};
use crate::filter::{ComparisonOperator, Filter, FilterValue};
use crate::sort::{self, NullsOrder, SortField};

/// Keyset page plan.
#[derive(Debug, Clone, PartialEq)]
pub struct KeysetPlan {
    /// Effective sort in caller (forward) order.
    pub sort: Vec<SortField>,
    pub size: u64,
    pub backward: bool,
    /// A cursor bounded the page on the side it came from.
    pub cursor_given: bool,
    /// Seek filter to AND with the caller's filter.
    pub seek: Option<Filter>,
}

impl KeysetPlan {
    pub fn new(page: &Page, sort: Vec<SortField>) -> QueryResult<Self> {
        let (size, backward, cursor) = match page {
            Page::Forward { first, after } => (*first, false, after.clone()),
            Page::Backward { last, before } => (*last, true, before.clone()),
            Page::Offset { .. } => {
                return Err(QueryError::InvalidPaging(
                    "limit/offset pages are positional".into(),
                ));
            }
        };

        let mut plan = Self {
            sort,
            size,
            backward,
            cursor_given: cursor.is_some(),
            seek: None,
        };

        if let Some(cursor) = cursor {
            let values = cursor.into_keyset(&plan.sort)?;
            let seek = seek_filter(&values, &plan.query_sort())?;
            tracing::trace!(?seek, backward, "built keyset seek filter");
            plan.seek = Some(seek);
        }

        Ok(plan)
    }

    /// Sort the statement runs with.
    pub fn query_sort(&self) -> Vec<SortField> {
        if self.backward {
            sort::inverted(&self.sort)
        } else {
            self.sort.clone()
        }
    }

    pub fn fetch_limit(&self) -> u64 {
        self.size.saturating_add(1)
    }

    pub fn finish(&self, mut rows: Vec<Value>) -> Connection<Value> {
        let extra = rows.len() as u64 > self.size;
        rows.truncate(usize::try_from(self.size).unwrap_or(usize::MAX));
        if self.backward {
            rows.reverse();
        }

        let empty = Map::new();
        let edges = rows
            .into_iter()
            .map(|node| {
                let cursor = Cursor::for_row(node.as_object().unwrap_or(&empty), &self.sort);
                Edge {
                    node,
                    cursor: cursor.encode(),
                }
            })
            .collect();

        let (has_next, has_previous) = if self.backward {
            (self.cursor_given, extra)
        } else {
            (extra, self.cursor_given)
        };
        Connection::new(edges, has_next, has_previous)
    }
}

/// Rows strictly after `values` in `sort` order.
pub fn seek_filter(values: &[KeysetField], sort: &[SortField]) -> QueryResult<Filter> {
    let mut terms = Vec::with_capacity(sort.len());
    let mut prefix: Vec<Filter> = Vec::with_capacity(sort.len());

    for (s, kv) in sort.iter().zip(values) {
        let value = FilterValue::from_json(&kv.value).ok_or_else(|| {
            QueryError::CursorDecode(format!("cursor value for '{}' is not a scalar", kv.field))
        })?;
        if !value.is_scalar() {
            return Err(QueryError::CursorDecode(format!(
                "cursor value for '{}' is not a scalar",
                kv.field
            )));
        }

        if let Some(strict) = strictly_after(s, &value) {
            let mut parts = prefix.clone();
            parts.push(strict);
            terms.push(if parts.len() == 1 {
                parts.remove(0)
            } else {
                Filter::all_of(parts)
            });
        }
        prefix.push(equal_to(&s.field, value));
    }

    if terms.is_empty() {
        // Nothing sorts after this row.
        let field = sort.first().map(|s| s.field.as_str()).unwrap_or("id");
        return Ok(Filter::all_of(vec![
            Filter::field(field, ComparisonOperator::Is, FilterValue::Null),
            Filter::field(field, ComparisonOperator::IsNot, FilterValue::Null),
        ]));
    }
    if terms.len() == 1 {
        return Ok(terms.remove(0));
    }
    Ok(Filter::any_of(terms))
}

fn equal_to(field: &str, value: FilterValue) -> Filter {
    match value {
        FilterValue::Null => Filter::field(field, ComparisonOperator::Is, FilterValue::Null),
        value => Filter::field(field, ComparisonOperator::Eq, value),
    }
}

/// `field` strictly after `value` in the order of `s`, or `None` if nothing is.
fn strictly_after(s: &SortField, value: &FilterValue) -> Option<Filter> {
    let nulls_first = s.effective_nulls() == NullsOrder::NullsFirst;

    if matches!(value, FilterValue::Null) {
        return nulls_first
            .then(|| Filter::field(&s.field, ComparisonOperator::IsNot, FilterValue::Null));
    }

    let op = if s.direction.is_ascending() {
        ComparisonOperator::Gt
    } else {
        ComparisonOperator::Lt
    };
    let filter = Filter::field(&s.field, op, value.clone());
    // Operators on one field are ORed, giving "> v OR IS NULL".
    Some(if nulls_first {
        filter
    } else {
        filter.with(&s.field, ComparisonOperator::Is, FilterValue::Null)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kv(field: &str, value: Value) -> KeysetField {
        KeysetField {
            field: field.to_string(),
            value,
        }
    }

    #[test]
    fn single_field_seek() {
        let sort = [SortField::asc("id").nulls(NullsOrder::NullsFirst)];
        let seek = seek_filter(&[kv("id", json!(3))], &sort).unwrap();
        assert_eq!(seek, Filter::field("id", ComparisonOperator::Gt, 3));
    }

    #[test]
    fn two_field_seek_expands_prefix() {
        let sort = [
            SortField::asc("a").nulls(NullsOrder::NullsFirst),
            SortField::desc("b"),
        ];
        let seek = seek_filter(&[kv("a", json!(1)), kv("b", json!("x"))], &sort).unwrap();
        assert_eq!(
            seek,
            Filter::any_of(vec![
                Filter::field("a", ComparisonOperator::Gt, 1),
                Filter::all_of(vec![
                    Filter::field("a", ComparisonOperator::Eq, 1),
                    Filter::field("b", ComparisonOperator::Lt, "x"),
                ]),
            ])
        );
    }

    #[test]
    fn nulls_last_includes_nulls_after_values() {
        let sort = [SortField::asc("a")];
        let seek = seek_filter(&[kv("a", json!(1))], &sort).unwrap();
        assert_eq!(
            seek,
            Filter::field("a", ComparisonOperator::Gt, 1).with(
                "a",
                ComparisonOperator::Is,
                FilterValue::Null
            )
        );
    }

    #[test]
    fn null_cursor_value_seeks_past_nulls() {
        // DESC puts NULLs first, so everything non-null comes after.
        let sort = [SortField::desc("a"), SortField::asc("id")];
        let seek = seek_filter(&[kv("a", Value::Null), kv("id", json!(4))], &sort).unwrap();
        assert_eq!(
            seek,
            Filter::any_of(vec![
                Filter::field("a", ComparisonOperator::IsNot, FilterValue::Null),
                Filter::all_of(vec![
                    Filter::field("a", ComparisonOperator::Is, FilterValue::Null),
                    Filter::field("id", ComparisonOperator::Gt, 4).with(
                        "id",
                        ComparisonOperator::Is,
                        FilterValue::Null
                    ),
                ]),
            ])
        );
    }

    #[test]
    fn object_cursor_values_are_rejected() {
        let sort = [SortField::asc("a")];
        let err = seek_filter(&[kv("a", json!({ "x": 1 }))], &sort).unwrap_err();
        assert!(matches!(err, QueryError::CursorDecode(_)));
    }

    #[test]
    fn backward_plan_inverts_sort_and_reverses_rows() {
        let sort = vec![SortField::asc("id")];
        let before = Cursor::Keyset(vec![kv("id", json!(5))]);
        let plan = KeysetPlan::new(
            &Page::Backward {
                last: 2,
                before: Some(before),
            },
            sort,
        )
        .unwrap();

        assert_eq!(plan.query_sort(), vec![SortField::desc("id")]);
        assert_eq!(plan.fetch_limit(), 3);
        // Seeking "after 5" in descending order means "id < 5".
        assert_eq!(
            plan.seek,
            Some(Filter::field("id", ComparisonOperator::Lt, 5))
        );

        let conn = plan.finish(vec![json!({ "id": 4 }), json!({ "id": 3 }), json!({ "id": 2 })]);
        let ids: Vec<&Value> = conn.edges.iter().map(|e| &e.node["id"]).collect();
        assert_eq!(ids, vec![&json!(3), &json!(4)]);
        assert!(conn.page_info.has_previous_page);
        assert!(conn.page_info.has_next_page);
    }

    #[test]
    fn forward_plan_flags() {
        let plan = KeysetPlan::new(
            &Page::Forward {
                first: 2,
                after: None,
            },
            vec![SortField::asc("id")],
        )
        .unwrap();
        assert!(plan.seek.is_none());

        let conn = plan.finish(vec![json!({ "id": 1 }), json!({ "id": 2 })]);
        assert!(!conn.page_info.has_next_page);
        assert!(!conn.page_info.has_previous_page);
        assert_eq!(
            Cursor::decode(&conn.edges[1].cursor).unwrap(),
            Cursor::Keyset(vec![kv("id", json!(2))])
        );
    }

    #[test]
    fn mismatched_cursor_is_rejected() {
        let err = KeysetPlan::new(
            &Page::Forward {
                first: 2,
                after: Some(Cursor::Keyset(vec![kv("name", json!("a"))])),
            },
            vec![SortField::asc("id")],
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::CursorDecode(_)));
    }
}
