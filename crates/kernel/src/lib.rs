//! Quarry Kernel Library
//!
//! Compiles declarative filter, sort, paging and aggregate requests into
//! parameterized SQL, and runs them through a pluggable executor.
//! The command-line entry point is the `quarry` binary.

pub mod aggregate;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod filter;
pub mod paging;
pub mod query_builder;
pub mod service;
pub mod sort;

pub use aggregate::{AggregateResponse, AggregateSpec};
pub use catalog::{Catalog, ColumnType, EntityMetadata};
pub use error::{QueryError, QueryResult, RegistryError, ServiceError};
pub use executor::{MemoryExecutor, PgExecutor, QueryExecutor};
pub use filter::{ComparisonOperator, Filter, FilterRegistry, FilterValue};
pub use paging::{Connection, Cursor, PagingArgs, PagingPolicy};
pub use query_builder::{CompiledAggregate, CompiledQuery, PagedQuery, QueryCompiler};
pub use service::{AggregateRequest, ConnectionRequest, QueryService};
pub use sort::{NullsOrder, SortDirection, SortField};
