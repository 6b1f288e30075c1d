//! Filter tree → WHERE clause.
//!
//! Every group is emitted inside its own bracket so the compiled clause
//! reproduces the boolean structure of the input tree exactly:
//! `{and:[{a},{b}], c}` becomes `((a) AND (b)) AND (c)`.

use sea_query::SimpleExpr;

use super::comparison::{ComparisonBuilder, FieldRef};
use super::registry::{FilterContext, FilterRegistry};
use super::types::{ComparisonOperator, FieldComparison, FieldFilter, Filter, FilterValue};
use crate::catalog::{Catalog, EntityMetadata, JoinKind, RelationMetadata};
use crate::error::{QueryError, QueryResult};

/// A join required by a relation filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationJoin {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    /// Alias of the side that owns the relation.
    pub parent_alias: String,
    pub local_column: String,
    pub foreign_column: String,
}

/// Compiles filter trees against one catalog and registry.
pub struct WhereBuilder<'a> {
    catalog: &'a Catalog,
    registry: &'a FilterRegistry,
}

impl<'a> WhereBuilder<'a> {
    pub fn new(catalog: &'a Catalog, registry: &'a FilterRegistry) -> Self {
        Self { catalog, registry }
    }

    /// Compile a filter for `entity` whose table is aliased as `alias`.
    ///
    /// Returns `None` when the filter constrains nothing.
    pub fn build(
        &self,
        entity: &EntityMetadata,
        alias: &str,
        filter: &Filter,
    ) -> QueryResult<Option<SimpleExpr>> {
        let mut clauses: Vec<SimpleExpr> = Vec::new();

        let ands: Vec<SimpleExpr> = self
            .group(entity, alias, &filter.and)?
            .into_iter()
            .flatten()
            .collect();
        if !ands.is_empty() {
            clauses.push(bracket(join_all(ands, SimpleExpr::and)));
        }

        // An unconstrained alternative matches every row, and so does the group.
        let ors: Option<Vec<SimpleExpr>> = self
            .group(entity, alias, &filter.or)?
            .into_iter()
            .collect();
        if let Some(ors) = ors.filter(|ors| !ors.is_empty()) {
            clauses.push(bracket(join_all(ors, SimpleExpr::or)));
        }

        for (name, entry) in &filter.fields {
            if let Some(relation) = entity.relation(name) {
                if let Some(expr) = self.relation(relation, name, entry)? {
                    clauses.push(expr);
                }
                continue;
            }

            match entry {
                FieldFilter::Comparison(cmp) => {
                    if let Some(expr) = self.field(entity, alias, name, cmp)? {
                        clauses.push(expr);
                    }
                }
                FieldFilter::Relation(_) => {
                    return Err(QueryError::invalid_value(
                        name,
                        "relation",
                        format!("'{name}' is not a relation of '{}'", entity.name),
                    ));
                }
            }
        }

        if clauses.is_empty() {
            return Ok(None);
        }
        Ok(Some(join_all(clauses, SimpleExpr::and)))
    }

    /// Joins needed by relation filters anywhere in the tree, deduplicated
    /// by alias in first-seen order.
    pub fn joins(&self, entity: &EntityMetadata, alias: &str, filter: &Filter) -> Vec<RelationJoin> {
        let mut joins = Vec::new();
        self.collect_joins(entity, alias, filter, &mut joins);
        joins
    }

    fn collect_joins(
        &self,
        entity: &EntityMetadata,
        alias: &str,
        filter: &Filter,
        joins: &mut Vec<RelationJoin>,
    ) {
        for sub in filter.and.iter().chain(filter.or.iter()) {
            self.collect_joins(entity, alias, sub, joins);
        }

        for (name, entry) in &filter.fields {
            let Some(relation) = entity.relation(name) else {
                continue;
            };
            let Some(target) = self.catalog.get(&relation.target) else {
                continue;
            };
            let join_alias = relation.join_alias();
            if !joins.iter().any(|j| j.alias == join_alias) {
                joins.push(RelationJoin {
                    kind: relation.join,
                    table: target.table.clone(),
                    alias: join_alias.to_string(),
                    parent_alias: alias.to_string(),
                    local_column: relation.local_column.clone(),
                    foreign_column: relation.foreign_column.clone(),
                });
            }
            if let Some(nested) = nested_filter(entry) {
                self.collect_joins(target, join_alias, &nested, joins);
            }
        }
    }

    fn group(
        &self,
        entity: &EntityMetadata,
        alias: &str,
        filters: &[Filter],
    ) -> QueryResult<Vec<Option<SimpleExpr>>> {
        let mut out = Vec::with_capacity(filters.len());
        for sub in filters {
            out.push(self.build(entity, alias, sub)?.map(bracket));
        }
        Ok(out)
    }

    fn relation(
        &self,
        relation: &RelationMetadata,
        name: &str,
        entry: &FieldFilter,
    ) -> QueryResult<Option<SimpleExpr>> {
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

        Ok(self
            .build(target, relation.join_alias(), &nested)?
            .map(bracket))
    }

    fn field(
        &self,
        entity: &EntityMetadata,
        alias: &str,
        name: &str,
        cmp: &FieldComparison,
    ) -> QueryResult<Option<SimpleExpr>> {
        let mut fragments = Vec::with_capacity(cmp.len());
        for (op, value) in cmp {
            fragments.push(self.comparison(entity, alias, name, op, value)?);
        }

        if fragments.is_empty() {
            return Ok(None);
        }
        // Multiple operators on one field are alternatives.
        Ok(Some(bracket(join_all(fragments, SimpleExpr::or))))
    }

    fn comparison(
        &self,
        entity: &EntityMetadata,
        alias: &str,
        field: &str,
        op: &str,
        value: &FilterValue,
    ) -> QueryResult<SimpleExpr> {
        let column_type = entity.column_type(field);

        if let Some((handler, config)) =
            self.registry
                .get_filter(op, column_type, Some(&entity.name), Some(field))
        {
            let ctx = FilterContext {
                entity: &entity.name,
                alias,
                field,
                column_type,
                operator: op,
            };
            return handler.build_condition(&ctx, value, config).map_err(|e| {
                tracing::warn!(
                    entity = %entity.name,
                    field = %field,
                    operator = %op,
                    error = %e,
                    "custom filter rejected value"
                );
                QueryError::invalid_value(field, op, e.to_string())
            });
        }

        let operator = ComparisonOperator::parse(op);
        ComparisonBuilder::build(FieldRef::new(alias, field).typed(column_type), &operator, value)
    }
}

/// The nested filter of a relation entry.
///
/// An entry that deserialized as an operator map (e.g. `{"or": []}`) is
/// re-read as a filter node; one that is not a valid node yields `None`.
pub(crate) fn nested_filter(entry: &FieldFilter) -> Option<Filter> {
    match entry {
        FieldFilter::Relation(nested) => Some(nested.as_ref().clone()),
        FieldFilter::Comparison(cmp) if cmp.is_empty() => Some(Filter::default()),
        FieldFilter::Comparison(cmp) => {
            let value = serde_json::to_value(cmp).ok()?;
            serde_json::from_value(value).ok()
        }
    }
}

/// Wrap an expression in parentheses, unless it already is a single bracket.
pub(crate) fn bracket(expr: SimpleExpr) -> SimpleExpr {
    if matches!(&expr, SimpleExpr::Tuple(items) if items.len() == 1) {
        expr
    } else {
        SimpleExpr::Tuple(vec![expr])
    }
}

/// Fold expressions with a binary combinator. `exprs` must not be empty.
pub(crate) fn join_all(
    exprs: Vec<SimpleExpr>,
    combine: fn(SimpleExpr, SimpleExpr) -> SimpleExpr,
) -> SimpleExpr {
    let mut iter = exprs.into_iter();
    let first = iter.next().unwrap_or_else(|| SimpleExpr::Constant(true.into()));
    iter.fold(first, combine)
}
