//! Aggregate compiler.
//!
//! Each function/field pair becomes a select aliased `FUNC_field`; group keys
//! are aliased `GROUP_BY_field`. Parsing runs the same naming in reverse to
//! rebuild the nested response shape, one response per result row.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use sea_query::{Alias, Expr, Func, Order, SelectStatement, SimpleExpr};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{QueryError, QueryResult};

#[allow(clippy::expect_used)]
static COLUMN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(GROUP_BY|AVG|SUM|COUNT|MAX|MIN)_(.+)$").expect("aggregate column pattern is valid")
});

/// Aggregate request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub count: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sum: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub avg: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub max: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub min: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
}

impl AggregateSpec {
    /// True when at least one function field is present.
    pub fn has_functions(&self) -> bool {
        AggregateFunction::ALL
            .iter()
            .any(|func| !self.fields(*func).is_empty())
    }

    pub fn fields(&self, func: AggregateFunction) -> &[String] {
        match func {
            AggregateFunction::Count => &self.count,
            AggregateFunction::Sum => &self.sum,
            AggregateFunction::Avg => &self.avg,
            AggregateFunction::Max => &self.max,
            AggregateFunction::Min => &self.min,
        }
    }
}

/// Supported aggregate functions, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 5] = [
        AggregateFunction::Count,
        AggregateFunction::Sum,
        AggregateFunction::Avg,
        AggregateFunction::Max,
        AggregateFunction::Min,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Min => "MIN",
        }
    }

    fn call(self, column: Expr) -> SimpleExpr {
        match self {
            AggregateFunction::Count => Func::count(column).into(),
            AggregateFunction::Sum => Func::sum(column).into(),
            AggregateFunction::Avg => Func::avg(column).into(),
            AggregateFunction::Max => Func::max(column).into(),
            AggregateFunction::Min => Func::min(column).into(),
        }
    }
}

/// One aggregate result row, reshaped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResponse {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub group_by: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub count: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sum: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub avg: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub max: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub min: BTreeMap<String, Value>,
}

/// Builds aggregate selects and parses their rows.
pub struct AggregateCompiler;

impl AggregateCompiler {
    /// Add the aggregate selects (and grouping) for `spec` to `query`.
    pub fn build(query: &mut SelectStatement, alias: &str, spec: &AggregateSpec) -> QueryResult<()> {
        if !spec.has_functions() {
            return Err(QueryError::NoAggregateFields);
        }

        let column = |field: &str| Expr::col((Alias::new(alias), Alias::new(field)));

        for field in &spec.group_by {
            query.expr_as(column(field), Alias::new(format!("GROUP_BY_{field}")));
        }
        for func in AggregateFunction::ALL {
            for field in spec.fields(func) {
                query.expr_as(
                    func.call(column(field)),
                    Alias::new(format!("{}_{field}", func.prefix())),
                );
            }
        }
        for field in &spec.group_by {
            query.group_by_col((Alias::new(alias), Alias::new(field)));
            query.order_by((Alias::new(alias), Alias::new(field)), Order::Asc);
        }

        Ok(())
    }

    /// Reshape result rows into responses.
    pub fn parse(rows: Vec<Map<String, Value>>) -> QueryResult<Vec<AggregateResponse>> {
        rows.into_iter().map(Self::parse_row).collect()
    }

    fn parse_row(row: Map<String, Value>) -> QueryResult<AggregateResponse> {
        let mut response = AggregateResponse::default();
        for (column, value) in row {
            let Some(caps) = COLUMN_RE.captures(&column) else {
                return Err(QueryError::UnknownAggregateColumn(column));
            };
            let field = caps[2].to_string();
            let target = match &caps[1] {
                "GROUP_BY" => &mut response.group_by,
                "COUNT" => &mut response.count,
                "SUM" => &mut response.sum,
                "AVG" => &mut response.avg,
                "MAX" => &mut response.max,
                "MIN" => &mut response.min,
                _ => return Err(QueryError::UnknownAggregateColumn(column)),
            };
            target.insert(field, value);
        }
        Ok(response)
    }
}
