//! Entity catalog: column types, relations and key sets.
//!
//! The catalog is the pre-resolved metadata the compilers consume. It is
//! loaded once (usually from TOML) and shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::filter::registry::FilterDeclaration;

/// Backend column types used to pick type-scoped custom filters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    #[serde(rename = "bigint")]
    BigInt,
    Float,
    Decimal,
    Text,
    Varchar,
    Boolean,
    Date,
    Timestamp,
    #[serde(rename = "timestamptz")]
    TimestampTz,
    Uuid,
    Json,
    Jsonb,
}

/// A plain column on an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Join kind decided by whoever declared the relation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Left,
    Inner,
}

/// A declared relation and the join that resolves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationMetadata {
    /// Relation name as used in filters.
    pub name: String,
    /// Target entity name.
    pub target: String,
    /// Alias of the joined table. Defaults to the relation name.
    pub alias: Option<String>,
    #[serde(default)]
    pub join: JoinKind,
    /// Column on the owning side of the join.
    pub local_column: String,
    /// Column on the target side of the join.
    pub foreign_column: String,
}

impl RelationMetadata {
    pub fn join_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Everything the compilers need to know about one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub name: String,
    pub table: String,
    /// Alias used for the base table. Defaults to the entity name.
    pub alias: Option<String>,
    /// Ordered fields that uniquely identify a row; empty means positional paging.
    #[serde(default)]
    pub key_set: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldMetadata>,
    #[serde(default)]
    pub relations: Vec<RelationMetadata>,
}

impl EntityMetadata {
    pub fn table_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn column_type(&self, field: &str) -> Option<ColumnType> {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| f.column_type)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationMetadata> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn has_key_set(&self) -> bool {
        !self.key_set.is_empty()
    }
}

/// On-disk catalog format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogFile {
    #[serde(default)]
    pub entities: Vec<EntityMetadata>,
    #[serde(default)]
    pub custom_filters: Vec<FilterDeclaration>,
}

/// Immutable lookup over entity metadata.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entities: HashMap<String, EntityMetadata>,
}

impl Catalog {
    pub fn new(entities: Vec<EntityMetadata>) -> Result<Self> {
        let mut map = HashMap::with_capacity(entities.len());
        for entity in entities {
            if map.contains_key(&entity.name) {
                bail!("entity '{}' declared more than once", entity.name);
            }
            map.insert(entity.name.clone(), entity);
        }

        let catalog = Self { entities: map };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Parse a catalog file, returning the catalog and its filter declarations.
    pub fn from_toml(source: &str) -> Result<(Self, Vec<FilterDeclaration>)> {
        let file: CatalogFile = toml::from_str(source).context("failed to parse catalog")?;
        let catalog = Self::new(file.entities)?;
        Ok((catalog, file.custom_filters))
    }

    pub fn load(path: &Path) -> Result<(Self, Vec<FilterDeclaration>)> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog {}", path.display()))?;
        Self::from_toml(&source)
    }

    pub fn get(&self, name: &str) -> Option<&EntityMetadata> {
        self.entities.get(name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn validate(&self) -> Result<()> {
        for entity in self.entities.values() {
            for rel in &entity.relations {
                if !self.entities.contains_key(&rel.target) {
                    bail!(
                        "relation '{}.{}' targets unknown entity '{}'",
                        entity.name,
                        rel.name,
                        rel.target
                    );
                }
            }
            for key in &entity.key_set {
                if entity.column_type(key).is_none() {
                    bail!("key set field '{}.{key}' is not a declared field", entity.name);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
        [[entities]]
        name = "todo_item"
        table = "todo_items"
        key_set = ["id"]
        fields = [
            { name = "id", type = "integer" },
            { name = "title", type = "text" },
        ]
        relations = [
            { name = "subTasks", target = "sub_task", local_column = "id", foreign_column = "todo_item_id" },
        ]

        [[entities]]
        name = "sub_task"
        table = "sub_tasks"
        alias = "st"
        fields = [{ name = "completed", type = "boolean" }]

        [[custom_filters]]
        handler = "is_multiple_of"
        types = ["integer"]
        operations = ["isMultipleOf"]
    "#;

    #[test]
    fn parses_toml_catalog() {
        let (catalog, filters) = Catalog::from_toml(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(filters.len(), 1);

        let todo = catalog.get("todo_item").unwrap();
        assert_eq!(todo.table_alias(), "todo_item");
        assert!(todo.has_key_set());
        assert_eq!(todo.column_type("title"), Some(ColumnType::Text));
        assert_eq!(todo.relation("subTasks").unwrap().join_alias(), "subTasks");
        assert_eq!(todo.relation("subTasks").unwrap().join, JoinKind::Left);

        let sub = catalog.get("sub_task").unwrap();
        assert_eq!(sub.table_alias(), "st");
        assert!(!sub.has_key_set());
    }

    #[test]
    fn rejects_relation_to_unknown_entity() {
        let source = r#"
            [[entities]]
            name = "a"
            table = "a"
            relations = [{ name = "b", target = "missing", local_column = "id", foreign_column = "a_id" }]
        "#;
        let err = Catalog::from_toml(source).unwrap_err();
        assert!(err.to_string().contains("unknown entity"));
    }

    #[test]
    fn rejects_undeclared_key_set_field() {
        let source = r#"
            [[entities]]
            name = "a"
            table = "a"
            key_set = ["id"]
        "#;
        assert!(Catalog::from_toml(source).is_err());
    }

    #[test]
    fn rejects_duplicate_entities() {
        let entity = EntityMetadata {
            name: "a".to_string(),
            table: "a".to_string(),
            alias: None,
            key_set: vec![],
            fields: vec![],
            relations: vec![],
        };
        assert!(Catalog::new(vec![entity.clone(), entity]).is_err());
    }
}
