//! Command implementations for the `quarry` binary.
//!
//! Each command takes a JSON request (inline, `@path`, or `-` for stdin)
//! and returns a JSON document for printing.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sea_query::{Value as SqlValue, Values};
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::executor::PgExecutor;
use crate::filter::FilterRegistry;
use crate::paging::{Cursor, PagePlan, PagingPolicy};
use crate::query_builder::QueryCompiler;
use crate::service::{AggregateRequest, ConnectionRequest, QueryService};

/// Build a compiler from a catalog file and its filter declarations.
pub fn load_compiler(catalog_path: &Path, policy: PagingPolicy) -> Result<QueryCompiler> {
    let (catalog, declarations) = Catalog::load(catalog_path)?;
    let mut registry = FilterRegistry::new();
    registry
        .apply_declarations(declarations)
        .context("invalid custom filter declaration")?;

    info!(
        catalog = %catalog_path.display(),
        entities = catalog.len(),
        custom_filters = registry.len(),
        "catalog loaded"
    );
    Ok(QueryCompiler::new(
        Arc::new(catalog),
        Arc::new(registry),
        policy,
    ))
}

/// Read a request argument: inline JSON, `@path`, or `-` for stdin.
pub fn read_request(arg: &str) -> Result<String> {
    if arg == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read request from stdin")?;
        Ok(buf)
    } else if let Some(path) = arg.strip_prefix('@') {
        std::fs::read_to_string(path).with_context(|| format!("failed to read request {path}"))
    } else {
        Ok(arg.to_string())
    }
}

/// Compile a paged request without running it.
pub fn cmd_compile(compiler: &QueryCompiler, request: &str) -> Result<Value> {
    let request: ConnectionRequest =
        serde_json::from_str(request).context("failed to parse request")?;
    let paged = compiler.compile(
        &request.entity,
        &request.filter,
        &request.sort,
        &request.paging,
    )?;
    let (sql, values) = paged.query.to_sql();
    let plan = match paged.plan {
        PagePlan::Offset(_) => "offset",
        PagePlan::Keyset(_) => "keyset",
    };

    let mut out = json!({
        "sql": sql,
        "params": params_json(&values),
        "fetchLimit": paged.plan.fetch_limit(),
        "plan": plan,
    });
    if request.total_count {
        let (count_sql, count_values) = compiler
            .compile_count(&request.entity, &request.filter)?
            .to_sql();
        out["count"] = json!({ "sql": count_sql, "params": params_json(&count_values) });
    }
    Ok(out)
}

/// Compile an aggregate request without running it.
pub fn cmd_aggregate(compiler: &QueryCompiler, request: &str) -> Result<Value> {
    let request: AggregateRequest =
        serde_json::from_str(request).context("failed to parse request")?;
    let (sql, values) = compiler
        .compile_aggregate(&request.entity, &request.filter, &request.spec)?
        .to_sql();
    Ok(json!({ "sql": sql, "params": params_json(&values) }))
}

/// Show what a cursor holds.
pub fn cmd_decode_cursor(cursor: &str) -> Result<Value> {
    Ok(match Cursor::decode(cursor)? {
        Cursor::Offset(offset) => json!({ "kind": "offset", "offset": offset }),
        Cursor::Keyset(fields) => json!({ "kind": "keyset", "fields": fields }),
    })
}

/// Execute a paged request against PostgreSQL and return the connection.
pub async fn cmd_run(config: &Config, compiler: QueryCompiler, request: &str) -> Result<Value> {
    let request: ConnectionRequest =
        serde_json::from_str(request).context("failed to parse request")?;
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL environment variable is required for run")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to database")?;
    info!(
        max_connections = config.database_max_connections,
        "database pool ready"
    );

    let executor = PgExecutor::new(pool, config.statement_timeout);
    let service = QueryService::new(compiler, Arc::new(executor));
    let connection = service.query_connection(&request).await?;
    serde_json::to_value(connection).context("failed to serialize connection")
}

fn params_json(values: &Values) -> Vec<Value> {
    values.0.iter().map(param_json).collect()
}

fn param_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Bool(v) => json!(v),
        SqlValue::TinyInt(v) => json!(v),
        SqlValue::SmallInt(v) => json!(v),
        SqlValue::Int(v) => json!(v),
        SqlValue::BigInt(v) => json!(v),
        SqlValue::TinyUnsigned(v) => json!(v),
        SqlValue::SmallUnsigned(v) => json!(v),
        SqlValue::Unsigned(v) => json!(v),
        SqlValue::BigUnsigned(v) => json!(v),
        SqlValue::Float(v) => json!(v),
        SqlValue::Double(v) => json!(v),
        SqlValue::String(v) => json!(v.as_deref()),
        SqlValue::Char(v) => json!(v),
        other => Value::String(format!("{other:?}")),
    }
}
