//! Query executors.
//!
//! Provides the trait the service talks to, a PostgreSQL implementation and
//! an in-memory implementation over JSON rows.

mod memory;
mod postgres;

pub use memory::MemoryExecutor;
pub use postgres::PgExecutor;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::query_builder::{CompiledAggregate, CompiledCount, CompiledQuery};

/// Runs compiled statements against a store.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Fetch rows as JSON objects, in statement order.
    async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Value>>;

    /// Count rows matching the filter.
    async fn count(&self, query: &CompiledCount) -> Result<u64>;

    /// Run an aggregate; each row maps `FUNC_field`/`GROUP_BY_field` to a value.
    async fn aggregate(&self, query: &CompiledAggregate) -> Result<Vec<Map<String, Value>>>;

    /// Backend name for logs (e.g. "postgres", "memory").
    fn name(&self) -> &'static str;
}
