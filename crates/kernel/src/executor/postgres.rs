//! PostgreSQL executor.
//!
//! Each call runs in its own transaction so `SET LOCAL statement_timeout`
//! applies to it alone and resets on commit or rollback. Rows come back as
//! JSON via `row_to_json`, which keeps the executor independent of entity
//! shapes.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use sea_query::{Value as SqlValue, Values};
use serde_json::{Map, Value};
use sqlx::PgPool;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::QueryScalar;
use tracing::debug;

use super::QueryExecutor;
use crate::query_builder::{CompiledAggregate, CompiledCount, CompiledQuery};

/// Executes compiled statements on a PostgreSQL pool.
#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgExecutor {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, Postgres>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;

        // Milliseconds from configuration, never caller input.
        let timeout = format!(
            "SET LOCAL statement_timeout = '{}ms'",
            self.statement_timeout.as_millis()
        );
        sqlx::query(&timeout)
            .execute(&mut *tx)
            .await
            .context("failed to set statement timeout")?;

        Ok(tx)
    }

    async fn fetch_json(&self, sql: &str, values: &Values, what: &str) -> Result<Vec<Value>> {
        let wrapped = format!("SELECT row_to_json(t) FROM ({sql}) t");
        debug!(sql = %wrapped, params = values.0.len(), "executing {what}");

        let mut tx = self.begin().await?;
        let query = bind_values(sqlx::query_scalar::<_, Value>(&wrapped), values)?;
        let rows = query
            .fetch_all(&mut *tx)
            .await
            .with_context(|| format!("failed to execute {what}"))?;
        tx.commit()
            .await
            .context("failed to commit query transaction")?;

        Ok(rows)
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Value>> {
        let (sql, values) = query.to_sql();
        self.fetch_json(&sql, &values, "row query").await
    }

    async fn count(&self, query: &CompiledCount) -> Result<u64> {
        let (sql, values) = query.to_sql();
        debug!(sql = %sql, params = values.0.len(), "executing count query");

        let mut tx = self.begin().await?;
        let total: i64 = bind_values(sqlx::query_scalar::<_, i64>(&sql), &values)?
            .fetch_one(&mut *tx)
            .await
            .context("failed to execute count query")?;
        tx.commit()
            .await
            .context("failed to commit query transaction")?;

        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn aggregate(&self, query: &CompiledAggregate) -> Result<Vec<Map<String, Value>>> {
        let (sql, values) = query.to_sql();
        let rows = self.fetch_json(&sql, &values, "aggregate query").await?;
        rows.into_iter()
            .map(|row| match row {
                Value::Object(map) => Ok(map),
                other => bail!("aggregate row is not an object: {other}"),
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

/// Bind sea-query values in placeholder order.
fn bind_values<'q, O>(
    mut query: QueryScalar<'q, Postgres, O, PgArguments>,
    values: &Values,
) -> Result<QueryScalar<'q, Postgres, O, PgArguments>> {
    for value in &values.0 {
        query = match value {
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::TinyInt(v) => query.bind(v.map(i16::from)),
            SqlValue::SmallInt(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::BigInt(v) => query.bind(*v),
            SqlValue::TinyUnsigned(v) => query.bind(v.map(i16::from)),
            SqlValue::SmallUnsigned(v) => query.bind(v.map(i32::from)),
            SqlValue::Unsigned(v) => query.bind(v.map(i64::from)),
            SqlValue::BigUnsigned(v) => {
                let v = v
                    .map(i64::try_from)
                    .transpose()
                    .context("unsigned value out of range")?;
                query.bind(v)
            }
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Double(v) => query.bind(*v),
            SqlValue::String(v) => query.bind(v.as_deref().cloned()),
            SqlValue::Char(v) => query.bind(v.map(|c| c.to_string())),
            other => bail!("unsupported parameter type: {other:?}"),
        };
    }
    Ok(query)
}
