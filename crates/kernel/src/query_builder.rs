//! Query compiler using SeaQuery.
//!
//! Combines the filter compiler, sort specs, the pagination engine and the
//! aggregate compiler into statements ready for an executor:
//! - `alias.*` selects with relation joins
//! - positional or keyset paging with a post-processing plan
//! - counts that ignore paging
//! - aggregates with optional grouping

use std::sync::Arc;

use sea_query::{Alias, Asterisk, Expr, PostgresQueryBuilder, Query, SelectStatement, Values};
use serde_json::{Map, Value};

use crate::aggregate::{AggregateCompiler, AggregateResponse, AggregateSpec};
use crate::catalog::{Catalog, EntityMetadata, JoinKind};
use crate::error::{QueryError, QueryResult};
use crate::filter::{Filter, FilterRegistry, WhereBuilder};
use crate::paging::{KeysetPlan, OffsetPlan, Page, PagePlan, PagingArgs, PagingPolicy};
use crate::sort::{self, SortField};

/// A compiled row query.
///
/// The rendered SQL is the source of truth for SQL executors; the filter and
/// sort it was built from are kept for executors that evaluate in memory.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub entity: String,
    /// Caller filter merged with any seek filter.
    pub filter: Filter,
    /// Sort the statement runs with.
    pub sort: Vec<SortField>,
    pub limit: Option<u64>,
    pub offset: u64,
    pub sql: String,
    pub values: Values,
}

impl CompiledQuery {
    /// SQL with `$n` placeholders and the values to bind.
    pub fn to_sql(&self) -> (String, Values) {
        (self.sql.clone(), self.values.clone())
    }
}

/// A compiled count query (`SELECT COUNT(*)` with the same WHERE).
#[derive(Debug, Clone)]
pub struct CompiledCount {
    pub entity: String,
    pub filter: Filter,
    pub sql: String,
    pub values: Values,
}

impl CompiledCount {
    pub fn to_sql(&self) -> (String, Values) {
        (self.sql.clone(), self.values.clone())
    }
}

/// A row query plus the plan that turns its rows into a connection.
#[derive(Debug, Clone)]
pub struct PagedQuery {
    pub query: CompiledQuery,
    pub plan: PagePlan,
}

/// A compiled aggregate statement and its row parser.
#[derive(Debug, Clone)]
pub struct CompiledAggregate {
    pub entity: String,
    pub filter: Filter,
    pub spec: AggregateSpec,
    pub sql: String,
    pub values: Values,
}

impl CompiledAggregate {
    pub fn to_sql(&self) -> (String, Values) {
        (self.sql.clone(), self.values.clone())
    }

    /// Reshape result rows, which must use the `FUNC_field` naming.
    pub fn parse(&self, rows: Vec<Map<String, Value>>) -> QueryResult<Vec<AggregateResponse>> {
        AggregateCompiler::parse(rows)
    }
}

/// Compiles requests against a shared catalog and filter registry.
#[derive(Clone)]
pub struct QueryCompiler {
    catalog: Arc<Catalog>,
    registry: Arc<FilterRegistry>,
    policy: PagingPolicy,
}

impl QueryCompiler {
    pub fn new(catalog: Arc<Catalog>, registry: Arc<FilterRegistry>, policy: PagingPolicy) -> Self {
        Self {
            catalog,
            registry,
            policy,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &PagingPolicy {
        &self.policy
    }

    pub fn entity(&self, name: &str) -> QueryResult<&EntityMetadata> {
        self.catalog
            .get(name)
            .ok_or_else(|| QueryError::UnknownEntity(name.to_string()))
    }

    /// Compile a paged request.
    pub fn compile(
        &self,
        entity: &str,
        filter: &Filter,
        sorting: &[SortField],
        paging: &PagingArgs,
    ) -> QueryResult<PagedQuery> {
        let meta = self.entity(entity)?;
        let page = Page::from_args(paging, &self.policy)?;
        let stable_sort = sort::with_key_set(sorting, &meta.key_set);

        let keyset = meta.has_key_set() && !matches!(page, Page::Offset { .. });
        let (plan, effective_filter, query_sort) = if keyset {
            let plan = KeysetPlan::new(&page, stable_sort)?;
            let effective = match &plan.seek {
                Some(seek) => filter.clone().merge(seek.clone()),
                None => filter.clone(),
            };
            let query_sort = plan.query_sort();
            (PagePlan::Keyset(plan), effective, query_sort)
        } else {
            let plan = OffsetPlan::new(&page)?;
            (PagePlan::Offset(plan), filter.clone(), stable_sort)
        };

        let query = self.compile_select(
            meta,
            effective_filter,
            query_sort,
            Some(plan.fetch_limit()),
            plan.fetch_offset(),
        )?;

        Ok(PagedQuery { query, plan })
    }

    /// Compile an unpaged row query.
    pub fn compile_many(
        &self,
        entity: &str,
        filter: &Filter,
        sorting: &[SortField],
        limit: Option<u64>,
        offset: u64,
    ) -> QueryResult<CompiledQuery> {
        let meta = self.entity(entity)?;
        if let (Some(limit), Some(max)) = (limit, self.policy.max_page_size) {
            if limit > max {
                return Err(QueryError::PageSizeExceeded {
                    requested: limit,
                    max,
                });
            }
        }
        self.compile_select(meta, filter.clone(), sorting.to_vec(), limit, offset)
    }

    /// Compile a count over the filtered rows.
    pub fn compile_count(&self, entity: &str, filter: &Filter) -> QueryResult<CompiledCount> {
        let meta = self.entity(entity)?;
        let alias = meta.table_alias();

        let mut statement = Query::select();
        statement.expr(Expr::col(Asterisk).count());
        self.add_source(&mut statement, meta, alias, filter, "matched")?;

        let (sql, values) = statement.build(PostgresQueryBuilder);
        tracing::debug!(entity = %meta.name, sql = %sql, params = values.0.len(), "compiled count");
        Ok(CompiledCount {
            entity: meta.name.clone(),
            filter: filter.clone(),
            sql,
            values,
        })
    }

    /// Compile an aggregate request.
    pub fn compile_aggregate(
        &self,
        entity: &str,
        filter: &Filter,
        spec: &AggregateSpec,
    ) -> QueryResult<CompiledAggregate> {
        let meta = self.entity(entity)?;
        let alias = meta.table_alias();

        let mut statement = Query::select();
        AggregateCompiler::build(&mut statement, alias, spec)?;
        // Aggregate columns stay qualified by the entity alias, so the
        // de-duplicated subquery takes that alias too.
        self.add_source(&mut statement, meta, alias, filter, alias)?;

        let (sql, values) = statement.build(PostgresQueryBuilder);
        tracing::debug!(entity = %meta.name, sql = %sql, params = values.0.len(), "compiled aggregate");
        Ok(CompiledAggregate {
            entity: meta.name.clone(),
            filter: filter.clone(),
            spec: spec.clone(),
            sql,
            values,
        })
    }

    /// Add the filtered entity rows as the statement's source.
    ///
    /// Without joins this is the table plus WHERE. Joined rows repeat the
    /// base row, so with joins the source is a `SELECT DISTINCT alias.*`
    /// subquery named `subquery_alias`.
    fn add_source(
        &self,
        statement: &mut SelectStatement,
        meta: &EntityMetadata,
        alias: &str,
        filter: &Filter,
        subquery_alias: &str,
    ) -> QueryResult<()> {
        let where_builder = WhereBuilder::new(&self.catalog, &self.registry);
        let cond = where_builder.build(meta, alias, filter)?;

        if where_builder.joins(meta, alias, filter).is_empty() {
            statement.from_as(Alias::new(&meta.table), Alias::new(alias));
            if let Some(cond) = cond {
                statement.and_where(cond);
            }
            return Ok(());
        }

        let mut base = Query::select();
        base.distinct()
            .column((Alias::new(alias), Asterisk))
            .from_as(Alias::new(&meta.table), Alias::new(alias));
        self.add_joins(&mut base, meta, alias, filter);
        if let Some(cond) = cond {
            base.and_where(cond);
        }
        statement.from_subquery(base, Alias::new(subquery_alias));
        Ok(())
    }

    fn compile_select(
        &self,
        meta: &EntityMetadata,
        filter: Filter,
        sorting: Vec<SortField>,
        limit: Option<u64>,
        offset: u64,
    ) -> QueryResult<CompiledQuery> {
        let alias = meta.table_alias();
        let where_builder = WhereBuilder::new(&self.catalog, &self.registry);

        let mut statement = Query::select();
        statement
            .column((Alias::new(alias), Asterisk))
            .from_as(Alias::new(&meta.table), Alias::new(alias));

        if self.add_joins(&mut statement, meta, alias, &filter) {
            statement.distinct();
        }
        if let Some(cond) = where_builder.build(meta, alias, &filter)? {
            statement.and_where(cond);
        }
        sort::apply(&mut statement, alias, &sorting);
        if let Some(limit) = limit {
            statement.limit(limit);
        }
        if offset > 0 {
            statement.offset(offset);
        }

        let (sql, values) = statement.build(PostgresQueryBuilder);
        tracing::debug!(entity = %meta.name, sql = %sql, params = values.0.len(), "compiled query");
        Ok(CompiledQuery {
            entity: meta.name.clone(),
            filter,
            sort: sorting,
            limit,
            offset,
            sql,
            values,
        })
    }

    /// Add joins for relations the filter references. Returns whether any were added.
    fn add_joins(
        &self,
        statement: &mut SelectStatement,
        meta: &EntityMetadata,
        alias: &str,
        filter: &Filter,
    ) -> bool {
        let joins = WhereBuilder::new(&self.catalog, &self.registry).joins(meta, alias, filter);
        for join in &joins {
            let join_type = match join.kind {
                JoinKind::Inner => sea_query::JoinType::InnerJoin,
                JoinKind::Left => sea_query::JoinType::LeftJoin,
            };
            let on_condition = Expr::col((
                Alias::new(&join.parent_alias),
                Alias::new(&join.local_column),
            ))
            .equals((Alias::new(&join.alias), Alias::new(&join.foreign_column)));

            statement.join_as(
                join_type,
                Alias::new(&join.table),
                Alias::new(&join.alias),
                on_condition,
            );
        }
        !joins.is_empty()
    }
}
