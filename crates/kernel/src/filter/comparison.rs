//! SQL comparisons for the base operator set.
//!
//! Every value is bound as a parameter; sea-query numbers them `$1..$n` in
//! statement order when the statement is built, so fragments from many
//! comparisons never collide. `is`/`isNot` render keywords and bind nothing.
//!
//! String values compared against date, time, uuid, numeric or JSON columns
//! are cast to the column type, since text parameters do not compare with
//! those types in PostgreSQL.

use sea_query::extension::postgres::PgExpr;
use sea_query::{Alias, Expr, SimpleExpr, Value};

use super::types::{ComparisonOperator, FilterValue};
use crate::catalog::ColumnType;
use crate::error::{QueryError, QueryResult};

/// A column reference as `"alias"."field"`.
#[derive(Debug, Clone, Copy)]
pub struct FieldRef<'a> {
    pub alias: &'a str,
    pub field: &'a str,
    pub column_type: Option<ColumnType>,
}

impl<'a> FieldRef<'a> {
    pub fn new(alias: &'a str, field: &'a str) -> Self {
        Self {
            alias,
            field,
            column_type: None,
        }
    }

    pub fn typed(mut self, column_type: Option<ColumnType>) -> Self {
        self.column_type = column_type;
        self
    }

    pub fn expr(&self) -> Expr {
        Expr::col((Alias::new(self.alias), Alias::new(self.field)))
    }

    /// Bound parameter for `value`, cast when the column needs it.
    fn param(&self, value: Value) -> SimpleExpr {
        let cast = match (&value, self.column_type) {
            (Value::String(Some(_)), Some(ty)) => cast_target(ty),
            _ => None,
        };
        match cast {
            Some(target) => SimpleExpr::Value(value).cast_as(Alias::new(target)),
            None => SimpleExpr::Value(value),
        }
    }
}

fn cast_target(ty: ColumnType) -> Option<&'static str> {
    match ty {
        ColumnType::Date => Some("date"),
        ColumnType::Timestamp => Some("timestamp"),
        ColumnType::TimestampTz => Some("timestamptz"),
        ColumnType::Uuid => Some("uuid"),
        ColumnType::Decimal => Some("numeric"),
        ColumnType::Json | ColumnType::Jsonb => Some("jsonb"),
        ColumnType::Integer
        | ColumnType::BigInt
        | ColumnType::Float
        | ColumnType::Text
        | ColumnType::Varchar
        | ColumnType::Boolean => None,
    }
}

/// Builds comparison fragments for the closed base operator set.
pub struct ComparisonBuilder;

impl ComparisonBuilder {
    /// Build `field <op> value`.
    ///
    /// Custom operators are not handled here; they fail with `UnknownOperator`
    /// so that the caller only reaches this after the registry came up empty.
    pub fn build(
        column: FieldRef<'_>,
        operator: &ComparisonOperator,
        value: &FilterValue,
    ) -> QueryResult<SimpleExpr> {
        let col = column.expr();
        let field = column.field;
        let op = operator.as_str();
        let scalar = |value: &FilterValue| -> QueryResult<SimpleExpr> {
            let value = to_sql_value(value)
                .ok_or_else(|| QueryError::invalid_value(field, op, "expected a scalar"))?;
            Ok(column.param(value))
        };

        let expr = match operator {
            ComparisonOperator::Eq => col.eq(scalar(value)?),
            ComparisonOperator::Neq => col.ne(scalar(value)?),
            ComparisonOperator::Gt => col.gt(scalar(value)?),
            ComparisonOperator::Gte => col.gte(scalar(value)?),
            ComparisonOperator::Lt => col.lt(scalar(value)?),
            ComparisonOperator::Lte => col.lte(scalar(value)?),
            ComparisonOperator::Like => col.like(pattern(field, op, value)?),
            ComparisonOperator::NotLike => col.not_like(pattern(field, op, value)?),
            ComparisonOperator::ILike => col.ilike(pattern(field, op, value)?),
            ComparisonOperator::NotILike => col.not_ilike(pattern(field, op, value)?),
            ComparisonOperator::Is => match value {
                FilterValue::Null => col.is_null(),
                FilterValue::Boolean(true) => Expr::cust_with_expr("$1 IS TRUE", col),
                FilterValue::Boolean(false) => Expr::cust_with_expr("$1 IS FALSE", col),
                _ => return Err(not_boolean(field, op)),
            },
            ComparisonOperator::IsNot => match value {
                FilterValue::Null => col.is_not_null(),
                FilterValue::Boolean(true) => Expr::cust_with_expr("$1 IS NOT TRUE", col),
                FilterValue::Boolean(false) => Expr::cust_with_expr("$1 IS NOT FALSE", col),
                _ => return Err(not_boolean(field, op)),
            },
            ComparisonOperator::In => col.is_in(list(field, op, value, scalar)?),
            ComparisonOperator::NotIn => col.is_not_in(list(field, op, value, scalar)?),
            ComparisonOperator::Between => {
                let (lower, upper) = bounds(field, op, value, scalar)?;
                col.between(lower, upper)
            }
            ComparisonOperator::NotBetween => {
                let (lower, upper) = bounds(field, op, value, scalar)?;
                col.not_between(lower, upper)
            }
            ComparisonOperator::Custom(name) => {
                return Err(QueryError::unknown_operator(field, name));
            }
        };

        Ok(expr)
    }
}

/// Convert a scalar filter value into a bound SQL value.
pub fn to_sql_value(value: &FilterValue) -> Option<Value> {
    Some(match value {
        FilterValue::Null => Value::String(None),
        FilterValue::Boolean(b) => Value::Bool(Some(*b)),
        FilterValue::Integer(i) => Value::BigInt(Some(*i)),
        FilterValue::Float(f) => Value::Double(Some(*f)),
        FilterValue::String(s) => Value::String(Some(Box::new(s.clone()))),
        FilterValue::List(_) | FilterValue::Range(_) => return None,
    })
}

fn pattern(field: &str, op: &str, value: &FilterValue) -> QueryResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| QueryError::invalid_value(field, op, "expected a string pattern"))
}

fn list(
    field: &str,
    op: &str,
    value: &FilterValue,
    scalar: impl Fn(&FilterValue) -> QueryResult<SimpleExpr>,
) -> QueryResult<Vec<SimpleExpr>> {
    let FilterValue::List(items) = value else {
        return Err(QueryError::invalid_value(field, op, "expected an array"));
    };
    if items.is_empty() {
        return Err(QueryError::invalid_value(field, op, "array must not be empty"));
    }
    items.iter().map(scalar).collect()
}

fn bounds(
    field: &str,
    op: &str,
    value: &FilterValue,
    scalar: impl Fn(&FilterValue) -> QueryResult<SimpleExpr>,
) -> QueryResult<(SimpleExpr, SimpleExpr)> {
    let FilterValue::Range(range) = value else {
        return Err(QueryError::invalid_value(
            field,
            op,
            "expected {lower, upper}",
        ));
    };
    Ok((scalar(&range.lower)?, scalar(&range.upper)?))
}

fn not_boolean(field: &str, op: &str) -> QueryError {
    QueryError::invalid_value(field, op, "expected true, false or null")
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
pub fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
