#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Shared setup for integration tests.
//!
//! Everything runs on the real compiler and the in-memory executor over the
//! fixture catalog from `quarry-test-utils`; no database is needed.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;

use quarry_kernel::{
    Catalog, FilterRegistry, MemoryExecutor, PagingPolicy, QueryCompiler, QueryService,
};
use quarry_test_utils::FIXTURE_CATALOG;

/// Fixture catalog with its custom filter declarations applied.
pub fn fixture() -> (Arc<Catalog>, Arc<FilterRegistry>) {
    let (catalog, declarations) = Catalog::from_toml(FIXTURE_CATALOG).unwrap();
    let mut registry = FilterRegistry::new();
    registry.apply_declarations(declarations).unwrap();
    (Arc::new(catalog), Arc::new(registry))
}

pub fn compiler() -> QueryCompiler {
    compiler_with(PagingPolicy::default())
}

pub fn compiler_with(policy: PagingPolicy) -> QueryCompiler {
    let (catalog, registry) = fixture();
    QueryCompiler::new(catalog, registry, policy)
}

/// A service over in-memory rows, given as `(entity, rows)` pairs.
pub fn service(tables: Vec<(&str, Vec<Value>)>) -> QueryService {
    let (catalog, registry) = fixture();
    let mut executor = MemoryExecutor::new(catalog.clone(), registry.clone());
    for (entity, rows) in tables {
        executor.insert(entity, rows);
    }
    QueryService::new(
        QueryCompiler::new(catalog, registry, PagingPolicy::default()),
        Arc::new(executor),
    )
}
