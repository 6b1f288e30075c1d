//! Built-in custom filter handlers.
//!
//! Catalog files activate these by name through `[[custom_filters]]`
//! declarations. All values are bound as parameters; only validated
//! identifiers are ever interpolated into SQL text.

use anyhow::{Result, bail};
use sea_query::{Expr, SimpleExpr, Value};

use super::comparison::{FieldRef, to_sql_value};
use super::registry::{FilterContext, FilterHandler};
use super::types::FilterValue;

/// Validate a SQL identifier name (JSON keys, column names).
/// Allows only `[a-zA-Z_][a-zA-Z0-9_]*` with max 63 chars (PostgreSQL limit).
pub(crate) fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
}

fn column(ctx: &FilterContext<'_>) -> SimpleExpr {
    SimpleExpr::from(FieldRef::new(ctx.alias, ctx.field).expr())
}

/// Read a JSON path from handler config, either `"a.b"` or `["a", "b"]`.
fn config_path(config: &serde_json::Value) -> Result<Vec<String>> {
    let segments: Vec<String> = match config.get("path") {
        Some(serde_json::Value::String(s)) => s.split('.').map(str::to_string).collect(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<_>>()
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    if segments.is_empty() {
        bail!("json_path_eq requires a non-empty 'path' in its config");
    }
    if let Some(bad) = segments.iter().find(|s| !is_safe_identifier(s)) {
        bail!("unsafe JSON path segment: '{}'", &bad[..bad.len().min(64)]);
    }
    Ok(segments)
}

// ---------------------------------------------------------------------------
// IsMultipleOf
// ---------------------------------------------------------------------------

/// Numeric divisibility check.
///
/// Generates: `MOD(CAST("alias"."field" AS NUMERIC), CAST($n AS NUMERIC)) = 0`
pub struct IsMultipleOf;

impl FilterHandler for IsMultipleOf {
    fn build_condition(
        &self,
        ctx: &FilterContext<'_>,
        value: &FilterValue,
        _config: &serde_json::Value,
    ) -> Result<SimpleExpr> {
        let divisor = match value {
            FilterValue::Integer(0) => bail!("divisor must not be zero"),
            FilterValue::Integer(i) => Value::BigInt(Some(*i)),
            FilterValue::Float(f) if *f == 0.0 => bail!("divisor must not be zero"),
            FilterValue::Float(f) => Value::Double(Some(*f)),
            _ => bail!("expected a numeric divisor"),
        };

        Ok(Expr::cust_with_exprs(
            "MOD(CAST($1 AS NUMERIC), CAST($2 AS NUMERIC)) = 0",
            [column(ctx), SimpleExpr::Value(divisor)],
        ))
    }

    fn evaluate(
        &self,
        field_value: &serde_json::Value,
        value: &FilterValue,
        _config: &serde_json::Value,
    ) -> Option<bool> {
        let divisor = value.as_f64()?;
        if divisor == 0.0 {
            return Some(false);
        }
        if let (Some(n), FilterValue::Integer(d)) = (field_value.as_i64(), value) {
            return Some(n.checked_rem(*d).is_none_or(|r| r == 0));
        }
        // NULL or non-numeric columns never match, as in SQL.
        let Some(n) = field_value.as_f64() else {
            return Some(false);
        };
        Some(decimal_multiple(n, divisor).unwrap_or((n % divisor).abs() < f64::EPSILON))
    }
}

/// `n` as `(digits, scale)`, read from its shortest decimal form.
fn decimal_parts(n: f64) -> Option<(i128, u32)> {
    let text = n.to_string();
    let (int, frac) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let digits = format!("{int}{frac}").parse().ok()?;
    Some((digits, u32::try_from(frac.len()).ok()?))
}

/// Exact decimal `MOD(n, divisor) = 0`, matching NUMERIC arithmetic.
/// `None` when the values do not fit the scaled representation.
fn decimal_multiple(n: f64, divisor: f64) -> Option<bool> {
    let (a, a_scale) = decimal_parts(n)?;
    let (b, b_scale) = decimal_parts(divisor)?;
    let scale = a_scale.max(b_scale);
    let a = a.checked_mul(10i128.checked_pow(scale - a_scale)?)?;
    let b = b.checked_mul(10i128.checked_pow(scale - b_scale)?)?;
    if b == 0 {
        return Some(false);
    }
    Some(a % b == 0)
}

// ---------------------------------------------------------------------------
// JsonbContains
// ---------------------------------------------------------------------------

/// JSONB containment check.
///
/// Scalars are wrapped in a one-element array so that `"rust"` matches a
/// `tags` column holding `["rust", "sql"]`.
///
/// Generates: `"alias"."field" @> CAST($n AS JSONB)`
pub struct JsonbContains;

impl JsonbContains {
    fn needle(value: &FilterValue) -> Result<serde_json::Value> {
        match value {
            FilterValue::Null | FilterValue::Range(_) => {
                bail!("expected a scalar or an array")
            }
            FilterValue::List(_) => Ok(value.to_json()),
            scalar => Ok(serde_json::Value::Array(vec![scalar.to_json()])),
        }
    }
}

impl FilterHandler for JsonbContains {
    fn build_condition(
        &self,
        ctx: &FilterContext<'_>,
        value: &FilterValue,
        _config: &serde_json::Value,
    ) -> Result<SimpleExpr> {
        let needle = Self::needle(value)?;
        // serde_json handles escaping of every JSON special character.
        let json = serde_json::to_string(&needle)?;

        Ok(Expr::cust_with_exprs(
            "$1 @> CAST($2 AS JSONB)",
            [column(ctx), SimpleExpr::Value(Value::String(Some(Box::new(json))))],
        ))
    }

    fn evaluate(
        &self,
        field_value: &serde_json::Value,
        value: &FilterValue,
        _config: &serde_json::Value,
    ) -> Option<bool> {
        let needle = Self::needle(value).ok()?;
        let wanted = needle.as_array()?;
        let Some(haystack) = field_value.as_array() else {
            return Some(false);
        };
        Some(wanted.iter().all(|w| haystack.contains(w)))
    }
}

// ---------------------------------------------------------------------------
// JsonPathEq
// ---------------------------------------------------------------------------

/// Equality on a value nested inside a JSON column.
///
/// Config keys:
/// - `path`: dot-separated string or array of keys (e.g. `"meta.source"`)
///
/// Generates: `"alias"."field" #>> '{meta,source}' = $n`
pub struct JsonPathEq;

impl FilterHandler for JsonPathEq {
    fn build_condition(
        &self,
        ctx: &FilterContext<'_>,
        value: &FilterValue,
        config: &serde_json::Value,
    ) -> Result<SimpleExpr> {
        let path = config_path(config)?;
        let Some(expected) = to_sql_value(value) else {
            bail!("expected a scalar");
        };
        // `#>>` extracts text, so compare against the textual form.
        let expected = match expected {
            Value::String(s) => Value::String(s),
            Value::Bool(Some(b)) => Value::String(Some(Box::new(b.to_string()))),
            Value::BigInt(Some(i)) => Value::String(Some(Box::new(i.to_string()))),
            Value::Double(Some(f)) => Value::String(Some(Box::new(f.to_string()))),
            _ => Value::String(None),
        };

        let sql = format!("$1 #>> '{{{}}}' = $2", path.join(","));
        Ok(Expr::cust_with_exprs(
            sql,
            [column(ctx), SimpleExpr::Value(expected)],
        ))
    }

    fn evaluate(
        &self,
        field_value: &serde_json::Value,
        value: &FilterValue,
        config: &serde_json::Value,
    ) -> Option<bool> {
        let path = config_path(config).ok()?;
        let mut current = field_value;
        for key in &path {
            match current.get(key) {
                Some(next) => current = next,
                None => return Some(false),
            }
        }
        Some(*current == value.to_json())
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use sea_query::{Alias, Asterisk, PostgresQueryBuilder, Query};
    use serde_json::json;

    fn make_context(field: &str) -> FilterContext<'_> {
        FilterContext {
            entity: "todo_item",
            alias: "t",
            field,
            column_type: None,
            operator: "test",
        }
    }

    fn render(expr: SimpleExpr) -> (String, usize) {
        let (sql, values) = Query::select()
            .column(Asterisk)
            .from(Alias::new("t"))
            .and_where(expr)
            .build(PostgresQueryBuilder);
        let clause = sql
            .split_once(" WHERE ")
            .map(|(_, w)| w.to_string())
            .unwrap_or_default();
        (clause, values.0.len())
    }

    #[test]
    fn safe_identifier_validation() {
        assert!(is_safe_identifier("source"));
        assert!(is_safe_identifier("_private"));
        assert!(is_safe_identifier("a"));

        assert!(!is_safe_identifier(""));
        assert!(!is_safe_identifier("123abc"));
        assert!(!is_safe_identifier("key'; DROP TABLE--"));
        assert!(!is_safe_identifier("foo bar"));
        assert!(!is_safe_identifier("schema.table"));
    }

    #[test]
    fn is_multiple_of_binds_divisor() {
        let ctx = make_context("number_type");
        let expr = IsMultipleOf
            .build_condition(&ctx, &FilterValue::Integer(5), &json!(null))
            .unwrap();
        let (sql, params) = render(expr);
        assert_eq!(
            sql,
            "MOD(CAST(\"t\".\"number_type\" AS NUMERIC), CAST($1 AS NUMERIC)) = 0"
        );
        assert_eq!(params, 1);
    }

    #[test]
    fn is_multiple_of_rejects_zero_and_strings() {
        let ctx = make_context("number_type");
        assert!(
            IsMultipleOf
                .build_condition(&ctx, &FilterValue::Integer(0), &json!(null))
                .is_err()
        );
        assert!(
            IsMultipleOf
                .build_condition(&ctx, &"five".into(), &json!(null))
                .is_err()
        );
    }

    #[test]
    fn is_multiple_of_evaluates_in_memory() {
        let five = FilterValue::Integer(5);
        assert_eq!(IsMultipleOf.evaluate(&json!(25), &five, &json!(null)), Some(true));
        assert_eq!(IsMultipleOf.evaluate(&json!(15), &five, &json!(null)), Some(true));
        assert_eq!(IsMultipleOf.evaluate(&json!(12), &five, &json!(null)), Some(false));
        assert_eq!(IsMultipleOf.evaluate(&json!(null), &five, &json!(null)), Some(false));
    }

    #[test]
    fn is_multiple_of_uses_decimal_arithmetic() {
        let tenth = FilterValue::Float(0.1);
        assert_eq!(IsMultipleOf.evaluate(&json!(0.3), &tenth, &json!(null)), Some(true));
        assert_eq!(IsMultipleOf.evaluate(&json!(0.35), &tenth, &json!(null)), Some(false));
        assert_eq!(
            IsMultipleOf.evaluate(&json!(10), &FilterValue::Float(2.5), &json!(null)),
            Some(true)
        );
        assert_eq!(
            IsMultipleOf.evaluate(&json!(-7), &FilterValue::Integer(2), &json!(null)),
            Some(false)
        );
    }

    #[test]
    fn jsonb_contains_wraps_scalar() {
        let ctx = make_context("tags");
        let expr = JsonbContains
            .build_condition(&ctx, &"rust".into(), &json!(null))
            .unwrap();
        let (sql, params) = render(expr);
        assert_eq!(sql, "\"t\".\"tags\" @> CAST($1 AS JSONB)");
        assert_eq!(params, 1);
    }

    #[test]
    fn jsonb_contains_escapes_value() {
        let ctx = make_context("tags");
        let expr = JsonbContains
            .build_condition(&ctx, &r#"val"ue"#.into(), &json!(null))
            .unwrap();
        let (_, values) = Query::select()
            .column(Asterisk)
            .from(Alias::new("t"))
            .and_where(expr)
            .build(PostgresQueryBuilder);
        assert_eq!(
            values.0[0],
            Value::String(Some(Box::new(r#"["val\"ue"]"#.to_string())))
        );
    }

    #[test]
    fn jsonb_contains_evaluates_in_memory() {
        let tags = json!(["rust", "sql"]);
        assert_eq!(
            JsonbContains.evaluate(&tags, &"rust".into(), &json!(null)),
            Some(true)
        );
        assert_eq!(
            JsonbContains.evaluate(&tags, &vec!["rust", "go"].into(), &json!(null)),
            Some(false)
        );
        assert_eq!(
            JsonbContains.evaluate(&json!("rust"), &"rust".into(), &json!(null)),
            Some(false)
        );
    }

    #[test]
    fn json_path_eq_inlines_validated_path() {
        let ctx = make_context("meta");
        let expr = JsonPathEq
            .build_condition(&ctx, &"import".into(), &json!({ "path": "origin.source" }))
            .unwrap();
        let (sql, params) = render(expr);
        assert_eq!(sql, "\"t\".\"meta\" #>> '{origin,source}' = $1");
        assert_eq!(params, 1);
    }

    #[test]
    fn json_path_eq_rejects_unsafe_or_missing_path() {
        let ctx = make_context("meta");
        let err = JsonPathEq
            .build_condition(&ctx, &"x".into(), &json!({ "path": ["ok", "bad'}"] }))
            .unwrap_err();
        assert!(err.to_string().contains("unsafe JSON path"));

        assert!(
            JsonPathEq
                .build_condition(&ctx, &"x".into(), &json!({}))
                .is_err()
        );
    }

    #[test]
    fn json_path_eq_evaluates_in_memory() {
        let config = json!({ "path": ["origin", "source"] });
        let meta = json!({ "origin": { "source": "import" } });
        assert_eq!(JsonPathEq.evaluate(&meta, &"import".into(), &config), Some(true));
        assert_eq!(JsonPathEq.evaluate(&meta, &"manual".into(), &config), Some(false));
        assert_eq!(JsonPathEq.evaluate(&json!({}), &"import".into(), &config), Some(false));
    }
}
