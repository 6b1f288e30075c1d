//! Sort specifications.

use std::cmp::Ordering;

use sea_query::{Alias, NullOrdering, Order, SelectStatement};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::filter::evaluate::compare_json;

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "asc")]
    Asc,
    #[serde(alias = "desc")]
    Desc,
}

impl SortDirection {
    pub fn inverted(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    pub fn is_ascending(self) -> bool {
        self == SortDirection::Asc
    }
}

/// NULL ordering preference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NullsOrder {
    NullsFirst,
    NullsLast,
}

impl NullsOrder {
    pub fn inverted(self) -> Self {
        match self {
            NullsOrder::NullsFirst => NullsOrder::NullsLast,
            NullsOrder::NullsLast => NullsOrder::NullsFirst,
        }
    }
}

/// One entry of a sort specification. Order in the list is tie-break precedence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nulls: Option<NullsOrder>,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
            nulls: None,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
            nulls: None,
        }
    }

    pub fn nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = Some(nulls);
        self
    }

    /// Reverse direction and explicit null placement. Implicit placement
    /// follows the direction (PostgreSQL puts NULLs last ascending, first
    /// descending), so it flips on its own.
    pub fn inverted(&self) -> Self {
        Self {
            field: self.field.clone(),
            direction: self.direction.inverted(),
            nulls: self.nulls.map(NullsOrder::inverted),
        }
    }

    /// Null placement in effect, explicit or implied by the direction.
    pub fn effective_nulls(&self) -> NullsOrder {
        self.nulls.unwrap_or(match self.direction {
            SortDirection::Asc => NullsOrder::NullsLast,
            SortDirection::Desc => NullsOrder::NullsFirst,
        })
    }
}

/// Caller sort followed by any key set fields it does not mention, ascending.
pub fn with_key_set(sort: &[SortField], key_set: &[String]) -> Vec<SortField> {
    let mut effective = sort.to_vec();
    for key in key_set {
        if !effective.iter().any(|s| &s.field == key) {
            effective.push(SortField::asc(key.clone()));
        }
    }
    effective
}

/// Invert every entry (used to fetch the tail of a range).
pub fn inverted(sort: &[SortField]) -> Vec<SortField> {
    sort.iter().map(SortField::inverted).collect()
}

/// Add ORDER BY clauses for `sort` on columns of `alias`.
pub fn apply(query: &mut SelectStatement, alias: &str, sort: &[SortField]) {
    for s in sort {
        let order = match s.direction {
            SortDirection::Asc => Order::Asc,
            SortDirection::Desc => Order::Desc,
        };
        let column = (Alias::new(alias), Alias::new(&s.field));
        match s.nulls {
            Some(NullsOrder::NullsFirst) => {
                query.order_by_with_nulls(column, order, NullOrdering::First);
            }
            Some(NullsOrder::NullsLast) => {
                query.order_by_with_nulls(column, order, NullOrdering::Last);
            }
            None => {
                query.order_by(column, order);
            }
        }
    }
}

/// Compare two rows the way the database would order them.
pub fn compare_rows(a: &Map<String, Value>, b: &Map<String, Value>, sort: &[SortField]) -> Ordering {
    for s in sort {
        let left = a.get(&s.field).unwrap_or(&Value::Null);
        let right = b.get(&s.field).unwrap_or(&Value::Null);

        let ord = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) | (false, true) => {
                let null_first = s.effective_nulls() == NullsOrder::NullsFirst;
                if left.is_null() == null_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, false) => {
                let ord = compare_json(left, right).unwrap_or(Ordering::Equal);
                if s.direction.is_ascending() { ord } else { ord.reverse() }
            }
        };

        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use sea_query::{Asterisk, PostgresQueryBuilder, Query};
    use serde_json::json;

    #[test]
    fn key_set_fields_are_appended_once() {
        let sort = vec![SortField::desc("created"), SortField::asc("id")];
        let effective = with_key_set(&sort, &["id".to_string(), "tenant".to_string()]);
        assert_eq!(
            effective,
            vec![
                SortField::desc("created"),
                SortField::asc("id"),
                SortField::asc("tenant"),
            ]
        );
    }

    #[test]
    fn inversion_flips_direction_and_explicit_nulls() {
        let field = SortField::asc("a").nulls(NullsOrder::NullsFirst);
        let inv = field.inverted();
        assert_eq!(inv.direction, SortDirection::Desc);
        assert_eq!(inv.nulls, Some(NullsOrder::NullsLast));
        assert_eq!(SortField::asc("a").inverted().nulls, None);
        assert_eq!(SortField::asc("a").effective_nulls(), NullsOrder::NullsLast);
        assert_eq!(SortField::desc("a").effective_nulls(), NullsOrder::NullsFirst);
    }

    #[test]
    fn renders_order_by() {
        let mut query = Query::select();
        query.column(Asterisk).from(Alias::new("t"));
        apply(
            &mut query,
            "t",
            &[
                SortField::asc("a"),
                SortField::desc("b").nulls(NullsOrder::NullsLast),
            ],
        );
        let sql = query.to_string(PostgresQueryBuilder);
        assert!(
            sql.ends_with("ORDER BY \"t\".\"a\" ASC, \"t\".\"b\" DESC NULLS LAST"),
            "{sql}"
        );
    }

    #[test]
    fn deserializes_sort_fields() {
        let sort: Vec<SortField> = serde_json::from_value(json!([
            { "field": "a", "direction": "DESC", "nulls": "NULLS_FIRST" },
            { "field": "b", "direction": "asc" },
            { "field": "c" },
        ]))
        .unwrap();
        assert_eq!(sort[0], SortField::desc("a").nulls(NullsOrder::NullsFirst));
        assert_eq!(sort[1], SortField::asc("b"));
        assert_eq!(sort[2], SortField::asc("c"));
    }

    #[test]
    fn row_comparison_follows_postgres_null_defaults() {
        let row = |v: Value| json!({ "a": v }).as_object().unwrap().clone();
        let asc = [SortField::asc("a")];
        let desc = [SortField::desc("a")];

        assert_eq!(compare_rows(&row(json!(1)), &row(json!(2)), &asc), Ordering::Less);
        assert_eq!(compare_rows(&row(json!(1)), &row(json!(2)), &desc), Ordering::Greater);
        assert_eq!(compare_rows(&row(Value::Null), &row(json!(2)), &asc), Ordering::Greater);
        assert_eq!(compare_rows(&row(Value::Null), &row(json!(2)), &desc), Ordering::Less);

        let first = [SortField::asc("a").nulls(NullsOrder::NullsFirst)];
        assert_eq!(compare_rows(&row(Value::Null), &row(json!(2)), &first), Ordering::Less);
    }
}
