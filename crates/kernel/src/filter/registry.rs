//! Custom filter registry.
//!
//! Handlers override or extend the base operators. A handler is registered
//! either for a set of column types (global) or for one field of one entity
//! (which may be a virtual field with no backing column). Lookups prefer the
//! field registration over the type registration.
//!
//! The registry is built once at startup and then shared read-only.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use sea_query::SimpleExpr;
use serde::{Deserialize, Serialize};

use super::types::FilterValue;
use crate::catalog::ColumnType;
use crate::error::RegistryError;

/// Context passed to filter handlers during SQL generation.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    /// Entity the field belongs to.
    pub entity: &'a str,
    /// Table alias the field should be qualified with.
    pub alias: &'a str,
    /// Field name as written in the filter.
    pub field: &'a str,
    /// Backend column type, when the field is a declared column.
    pub column_type: Option<ColumnType>,
    /// Operator being compiled.
    pub operator: &'a str,
}

/// Handler for custom filter operators.
pub trait FilterHandler: Send + Sync {
    /// Build a SQL condition for `field <operator> value`.
    fn build_condition(
        &self,
        ctx: &FilterContext<'_>,
        value: &FilterValue,
        config: &serde_json::Value,
    ) -> Result<SimpleExpr>;

    /// Evaluate the condition against an in-memory field value.
    ///
    /// Returns `None` when the handler has no in-memory counterpart.
    fn evaluate(
        &self,
        field_value: &serde_json::Value,
        value: &FilterValue,
        config: &serde_json::Value,
    ) -> Option<bool> {
        let _ = (field_value, value, config);
        None
    }
}

/// What a handler registration applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterTarget {
    /// Any field whose column has one of these types.
    Types(Vec<ColumnType>),
    /// One field of one entity.
    Field { entity: String, field: String },
}

/// Declarative registration, as found in catalog files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDeclaration {
    /// Built-in handler name (e.g. "is_multiple_of").
    pub handler: String,
    #[serde(default)]
    pub types: Vec<ColumnType>,
    pub entity: Option<String>,
    pub field: Option<String>,
    #[serde(default)]
    pub operations: Vec<String>,
    /// Handler-specific configuration.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl FilterDeclaration {
    fn target(&self) -> FilterTarget {
        match (&self.entity, &self.field) {
            (Some(entity), Some(field)) => FilterTarget::Field {
                entity: entity.clone(),
                field: field.clone(),
            },
            _ => FilterTarget::Types(self.types.clone()),
        }
    }
}

#[derive(Clone)]
struct Registration {
    handler: Arc<dyn FilterHandler>,
    config: Arc<serde_json::Value>,
}

/// Validate an operation name: non-empty, alphanumeric/underscore,
/// starting with a letter, max 64 chars.
fn is_valid_operation_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
}

/// Registry of custom filter handlers.
///
/// Two-level lookup for declarations: handler name → implementation, then
/// (operation, type) or (entity, field, operation) → registration.
#[derive(Default)]
pub struct FilterRegistry {
    /// Built-in handler implementations, keyed by handler name.
    handlers: HashMap<String, Arc<dyn FilterHandler>>,
    /// column type → operation → registration
    by_type: HashMap<ColumnType, HashMap<String, Registration>>,
    /// entity → field → operation → registration
    by_field: HashMap<String, HashMap<String, HashMap<String, Registration>>>,
}

impl FilterRegistry {
    /// Create a registry with the built-in handlers available by name.
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register_handler("is_multiple_of", Arc::new(super::handlers::IsMultipleOf));
        registry.register_handler("jsonb_contains", Arc::new(super::handlers::JsonbContains));
        registry.register_handler("json_path_eq", Arc::new(super::handlers::JsonPathEq));
        registry
    }

    /// Make a handler implementation available to declarations by name.
    pub fn register_handler(&mut self, name: &str, handler: Arc<dyn FilterHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// Register a handler for the given operations on a target.
    pub fn set_filter(
        &mut self,
        handler: Arc<dyn FilterHandler>,
        target: FilterTarget,
        operations: &[&str],
    ) -> Result<(), RegistryError> {
        let operations: Vec<String> = operations.iter().map(|s| s.to_string()).collect();
        self.insert(
            Registration {
                handler,
                config: Arc::new(serde_json::Value::Null),
            },
            target,
            &operations,
            "<inline>",
        )
    }

    /// Apply catalog declarations, resolving handler names.
    pub fn apply_declarations(
        &mut self,
        declarations: Vec<FilterDeclaration>,
    ) -> Result<(), RegistryError> {
        for decl in declarations {
            let handler = self
                .handlers
                .get(&decl.handler)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownHandler(decl.handler.clone()))?;
            let target = decl.target();
            let registration = Registration {
                handler,
                config: Arc::new(decl.config),
            };
            self.insert(registration, target, &decl.operations, &decl.handler)?;
        }
        Ok(())
    }

    fn insert(
        &mut self,
        registration: Registration,
        target: FilterTarget,
        operations: &[String],
        handler_name: &str,
    ) -> Result<(), RegistryError> {
        if operations.is_empty() {
            let target = match &target {
                FilterTarget::Types(_) => format!("handler '{handler_name}'"),
                FilterTarget::Field { entity, field } => format!("{entity}.{field}"),
            };
            return Err(RegistryError::EmptyOperations { target });
        }
        if let Some(bad) = operations.iter().find(|op| !is_valid_operation_name(op)) {
            return Err(RegistryError::InvalidOperation(bad.clone()));
        }

        match target {
            FilterTarget::Types(types) => {
                if types.is_empty() {
                    return Err(RegistryError::EmptyTypes {
                        handler: handler_name.to_string(),
                    });
                }
                for ty in types {
                    let ops = self.by_type.entry(ty).or_default();
                    for op in operations {
                        if ops.insert(op.clone(), registration.clone()).is_some() {
                            tracing::warn!(
                                operation = %op,
                                column_type = ?ty,
                                "custom filter overwrites existing registration"
                            );
                        }
                    }
                }
            }
            FilterTarget::Field { entity, field } => {
                let ops = self
                    .by_field
                    .entry(entity.clone())
                    .or_default()
                    .entry(field.clone())
                    .or_default();
                for op in operations {
                    if ops.insert(op.clone(), registration.clone()).is_some() {
                        tracing::warn!(
                            operation = %op,
                            entity = %entity,
                            field = %field,
                            "custom filter overwrites existing registration"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Look up a handler for an operation, most specific registration first.
    pub fn get_filter(
        &self,
        operation: &str,
        column_type: Option<ColumnType>,
        entity: Option<&str>,
        field: Option<&str>,
    ) -> Option<(&dyn FilterHandler, &serde_json::Value)> {
        let by_field = entity.zip(field).and_then(|(entity, field)| {
            self.by_field
                .get(entity)
                .and_then(|fields| fields.get(field))
                .and_then(|ops| ops.get(operation))
        });
        let by_type = || {
            column_type
                .and_then(|ty| self.by_type.get(&ty))
                .and_then(|ops| ops.get(operation))
        };

        by_field
            .or_else(by_type)
            .map(|reg| (reg.handler.as_ref(), reg.config.as_ref()))
    }

    /// Check if a field has any registration (virtual fields rely on this).
    pub fn has_field_filters(&self, entity: &str, field: &str) -> bool {
        self.by_field
            .get(entity)
            .is_some_and(|fields| fields.contains_key(field))
    }

    /// Number of registered (target, operation) pairs.
    pub fn len(&self) -> usize {
        let by_type: usize = self.by_type.values().map(HashMap::len).sum();
        let by_field: usize = self
            .by_field
            .values()
            .flat_map(HashMap::values)
            .map(HashMap::len)
            .sum();
        by_type + by_field
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
