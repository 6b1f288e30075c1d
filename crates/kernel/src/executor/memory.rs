//! In-memory executor over JSON rows.
//!
//! Evaluates the filter and sort a statement was compiled from instead of
//! its SQL. Related rows are read from a key named after the relation (an
//! object or an array of objects), so fixtures nest children inline.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Number, Value};

use super::QueryExecutor;
use crate::aggregate::{AggregateFunction, AggregateSpec};
use crate::catalog::{Catalog, EntityMetadata};
use crate::filter::evaluate::compare_json;
use crate::filter::{Evaluator, Filter, FilterRegistry};
use crate::query_builder::{CompiledAggregate, CompiledCount, CompiledQuery};
use crate::sort::{SortField, compare_rows};

/// Executes compiled queries against rows held in memory.
pub struct MemoryExecutor {
    catalog: Arc<Catalog>,
    registry: Arc<FilterRegistry>,
    tables: HashMap<String, Vec<Map<String, Value>>>,
}

impl MemoryExecutor {
    pub fn new(catalog: Arc<Catalog>, registry: Arc<FilterRegistry>) -> Self {
        Self {
            catalog,
            registry,
            tables: HashMap::new(),
        }
    }

    /// Add rows for an entity. Non-object values are ignored.
    pub fn with_rows(mut self, entity: &str, rows: impl IntoIterator<Item = Value>) -> Self {
        self.insert(entity, rows);
        self
    }

    pub fn insert(&mut self, entity: &str, rows: impl IntoIterator<Item = Value>) {
        let table = self.tables.entry(entity.to_string()).or_default();
        table.extend(rows.into_iter().filter_map(|row| match row {
            Value::Object(map) => Some(map),
            _ => None,
        }));
    }

    fn meta(&self, entity: &str) -> Result<&EntityMetadata> {
        self.catalog
            .get(entity)
            .with_context(|| format!("unknown entity '{entity}'"))
    }

    fn matching(&self, entity: &str, filter: &Filter) -> Result<Vec<&Map<String, Value>>> {
        let meta = self.meta(entity)?;
        let evaluator = Evaluator::new(&self.catalog, &self.registry);
        let rows = self.tables.get(entity).map(Vec::as_slice).unwrap_or_default();

        let mut out = Vec::new();
        for row in rows {
            if evaluator
                .matches(meta, row, filter)
                .with_context(|| format!("failed to evaluate filter on '{entity}'"))?
            {
                out.push(row);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Value>> {
        let mut rows = self.matching(&query.entity, &query.filter)?;
        rows.sort_by(|a, b| compare_rows(a, b, &query.sort));

        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));

        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| Value::Object(row.clone()))
            .collect())
    }

    async fn count(&self, query: &CompiledCount) -> Result<u64> {
        Ok(self.matching(&query.entity, &query.filter)?.len() as u64)
    }

    async fn aggregate(&self, query: &CompiledAggregate) -> Result<Vec<Map<String, Value>>> {
        let rows = self.matching(&query.entity, &query.filter)?;
        let spec = &query.spec;

        if spec.group_by.is_empty() {
            return Ok(vec![aggregate_rows(spec, &rows)]);
        }

        // Group in the order the database would return them.
        let group_sort: Vec<SortField> = spec.group_by.iter().map(SortField::asc).collect();
        let mut sorted = rows;
        sorted.sort_by(|a, b| compare_rows(a, b, &group_sort));

        let mut groups: Vec<Vec<&Map<String, Value>>> = Vec::new();
        for row in sorted {
            match groups.last_mut() {
                Some(group)
                    if compare_rows(group[0], row, &group_sort) == Ordering::Equal =>
                {
                    group.push(row);
                }
                _ => groups.push(vec![row]),
            }
        }

        Ok(groups
            .iter()
            .map(|group| {
                let mut out = Map::new();
                for field in &spec.group_by {
                    let key = group[0].get(field).cloned().unwrap_or(Value::Null);
                    out.insert(format!("GROUP_BY_{field}"), key);
                }
                out.extend(aggregate_rows(spec, group));
                out
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

fn aggregate_rows(spec: &AggregateSpec, rows: &[&Map<String, Value>]) -> Map<String, Value> {
    let mut out = Map::new();
    for func in AggregateFunction::ALL {
        for field in spec.fields(func) {
            let values: Vec<&Value> = rows
                .iter()
                .filter_map(|row| row.get(field))
                .filter(|v| !v.is_null())
                .collect();
            out.insert(format!("{}_{field}", func.prefix()), apply(func, &values));
        }
    }
    out
}

/// SQL aggregate semantics: NULLs are skipped; empty input gives NULL
/// except for COUNT.
fn apply(func: AggregateFunction, values: &[&Value]) -> Value {
    match func {
        AggregateFunction::Count => Value::from(values.len() as u64),
        AggregateFunction::Sum => sum(values).unwrap_or(Value::Null),
        AggregateFunction::Avg => {
            let nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if nums.is_empty() {
                return Value::Null;
            }
            let avg = nums.iter().sum::<f64>() / nums.len() as f64;
            Number::from_f64(avg).map_or(Value::Null, Value::Number)
        }
        AggregateFunction::Max => extreme(values, Ordering::Greater),
        AggregateFunction::Min => extreme(values, Ordering::Less),
    }
}

fn sum(values: &[&Value]) -> Option<Value> {
    if values.is_empty() {
        return None;
    }
    // Integer sums that overflow i64 continue in floating point.
    let ints: Option<Vec<i64>> = values.iter().map(|v| v.as_i64()).collect();
    let total = ints.and_then(|ints| ints.iter().try_fold(0i64, |acc, &n| acc.checked_add(n)));
    if let Some(total) = total {
        return Some(Value::from(total));
    }
    let total: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
    Number::from_f64(total).map(Value::Number)
}

fn extreme(values: &[&Value], want: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for &v in values {
        best = match best {
            Some(b) if compare_json(v, b) != Some(want) => Some(b),
            _ => Some(v),
        };
    }
    best.cloned().unwrap_or(Value::Null)
}
