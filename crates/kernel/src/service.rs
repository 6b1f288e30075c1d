//! Query service.
//!
//! Ties the compiler to an executor: compile, run, post-process. Compile
//! errors surface before any I/O as [`ServiceError::Query`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::aggregate::{AggregateResponse, AggregateSpec};
use crate::error::ServiceError;
use crate::executor::QueryExecutor;
use crate::filter::Filter;
use crate::paging::{Connection, PagingArgs};
use crate::query_builder::QueryCompiler;
use crate::sort::SortField;

/// A paged request as accepted by the CLI and other JSON callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub entity: String,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub sort: Vec<SortField>,
    #[serde(flatten)]
    pub paging: PagingArgs,
    /// Also run a count and fill `totalCount`.
    #[serde(default)]
    pub total_count: bool,
}

/// An aggregate request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRequest {
    pub entity: String,
    #[serde(default)]
    pub filter: Filter,
    #[serde(flatten)]
    pub spec: AggregateSpec,
}

/// Service for executing compiled queries.
#[derive(Clone)]
pub struct QueryService {
    compiler: QueryCompiler,
    executor: Arc<dyn QueryExecutor>,
}

impl QueryService {
    pub fn new(compiler: QueryCompiler, executor: Arc<dyn QueryExecutor>) -> Self {
        Self { compiler, executor }
    }

    pub fn compiler(&self) -> &QueryCompiler {
        &self.compiler
    }

    /// Fetch rows without paging metadata.
    pub async fn query_many(
        &self,
        entity: &str,
        filter: &Filter,
        sort: &[SortField],
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<Value>, ServiceError> {
        let query = self
            .compiler
            .compile_many(entity, filter, sort, limit, offset)?;
        let rows = self
            .executor
            .fetch(&query)
            .await
            .map_err(ServiceError::Execution)?;
        debug!(entity, backend = self.executor.name(), rows = rows.len(), "query_many");
        Ok(rows)
    }

    /// Fetch one page as a connection.
    pub async fn query_connection(
        &self,
        request: &ConnectionRequest,
    ) -> Result<Connection<Value>, ServiceError> {
        let paged = self.compiler.compile(
            &request.entity,
            &request.filter,
            &request.sort,
            &request.paging,
        )?;
        let rows = self
            .executor
            .fetch(&paged.query)
            .await
            .map_err(ServiceError::Execution)?;
        let fetched = rows.len();
        let mut connection = paged.plan.finish(rows);

        if request.total_count {
            connection.total_count = Some(self.count(&request.entity, &request.filter).await?);
        }

        debug!(
            entity = %request.entity,
            backend = self.executor.name(),
            fetched,
            edges = connection.edges.len(),
            has_next = connection.page_info.has_next_page,
            has_previous = connection.page_info.has_previous_page,
            "query_connection"
        );
        Ok(connection)
    }

    /// Fetch one page and deserialize each node.
    pub async fn query_connection_as<T: DeserializeOwned>(
        &self,
        request: &ConnectionRequest,
    ) -> Result<Connection<T>, ServiceError> {
        let connection = self.query_connection(request).await?;
        Ok(connection.try_map(serde_json::from_value)?)
    }

    /// Count rows matching a filter, ignoring paging.
    pub async fn count(&self, entity: &str, filter: &Filter) -> Result<u64, ServiceError> {
        let query = self.compiler.compile_count(entity, filter)?;
        self.executor
            .count(&query)
            .await
            .map_err(ServiceError::Execution)
    }

    /// Run an aggregate and reshape its rows.
    pub async fn aggregate(
        &self,
        request: &AggregateRequest,
    ) -> Result<Vec<AggregateResponse>, ServiceError> {
        let query =
            self.compiler
                .compile_aggregate(&request.entity, &request.filter, &request.spec)?;
        let rows = self
            .executor
            .aggregate(&query)
            .await
            .map_err(ServiceError::Execution)?;
        Ok(query.parse(rows)?)
    }
}
