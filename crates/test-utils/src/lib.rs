//! Quarry test utilities.
//!
//! Helpers for integration testing: a fixture catalog, row builders for
//! its entities, and assertion helpers for rendered SQL and JSON results.

use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

/// Catalog covering the fixture entities below.
///
/// - `test`: one column per common type, no key set, a `relations` relation
/// - `test_relation`: child rows of `test`
/// - `todo`: key set `id`, for seek paging
/// - `invoice`: aggregate source
pub const FIXTURE_CATALOG: &str = r#"
[[entities]]
name = "test"
table = "test_entity"
alias = "te"
fields = [
    { name = "id", type = "uuid" },
    { name = "string_type", type = "text" },
    { name = "number_type", type = "integer" },
    { name = "bool_type", type = "boolean" },
    { name = "date_type", type = "date" },
    { name = "meta", type = "jsonb" },
]
relations = [
    { name = "relations", target = "test_relation", alias = "tr", local_column = "id", foreign_column = "test_id" },
]

[[entities]]
name = "test_relation"
table = "test_relation"
fields = [
    { name = "id", type = "uuid" },
    { name = "test_id", type = "uuid" },
    { name = "relation_name", type = "text" },
]

[[entities]]
name = "todo"
table = "todo_items"
alias = "t"
key_set = ["id"]
fields = [
    { name = "id", type = "integer" },
    { name = "title", type = "text" },
    { name = "priority", type = "integer" },
]

[[entities]]
name = "invoice"
table = "invoices"
alias = "i"
key_set = ["id"]
fields = [
    { name = "id", type = "integer" },
    { name = "status", type = "text" },
    { name = "amount", type = "integer" },
]

[[custom_filters]]
handler = "is_multiple_of"
types = ["integer", "bigint"]
operations = ["isMultipleOf"]

[[custom_filters]]
handler = "json_path_eq"
entity = "test"
field = "meta"
operations = ["colorEq"]
config = { path = "color" }
"#;

/// Create a `test` row with default values.
pub fn test_row(string_type: &str, number_type: i64) -> TestRow {
    TestRow {
        id: Uuid::now_v7(),
        string_type: string_type.to_string(),
        number_type: Some(number_type),
        bool_type: false,
        date_type: None,
        meta: json!({}),
        relations: Vec::new(),
    }
}

/// A `test` row builder.
#[derive(Debug, Clone)]
pub struct TestRow {
    pub id: Uuid,
    pub string_type: String,
    pub number_type: Option<i64>,
    pub bool_type: bool,
    pub date_type: Option<String>,
    pub meta: JsonValue,
    pub relations: Vec<JsonValue>,
}

impl TestRow {
    /// Set a custom ID.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Clear the number column.
    pub fn without_number(mut self) -> Self {
        self.number_type = None;
        self
    }

    pub fn flagged(mut self) -> Self {
        self.bool_type = true;
        self
    }

    /// Set the date column (`YYYY-MM-DD`).
    pub fn on(mut self, date: &str) -> Self {
        self.date_type = Some(date.to_string());
        self
    }

    /// Set a key in the JSON `meta` column.
    pub fn with_meta(mut self, key: &str, value: JsonValue) -> Self {
        if let Some(obj) = self.meta.as_object_mut() {
            obj.insert(key.to_string(), value);
        }
        self
    }

    /// Attach a `test_relation` child.
    pub fn with_relation(mut self, relation_name: &str) -> Self {
        self.relations.push(json!({
            "id": Uuid::now_v7(),
            "test_id": self.id,
            "relation_name": relation_name,
        }));
        self
    }

    /// Row as JSON, children nested under `relations`.
    pub fn to_json(&self) -> JsonValue {
        json!({
            "id": self.id,
            "string_type": self.string_type,
            "number_type": self.number_type,
            "bool_type": self.bool_type,
            "date_type": self.date_type,
            "meta": self.meta,
            "relations": self.relations,
        })
    }
}

/// A `todo` row.
pub fn todo_row(id: i64, title: &str, priority: Option<i64>) -> JsonValue {
    json!({ "id": id, "title": title, "priority": priority })
}

/// An `invoice` row.
pub fn invoice_row(id: i64, status: &str, amount: i64) -> JsonValue {
    json!({ "id": id, "status": status, "amount": amount })
}

/// Assertion helpers for SQL and JSON.
pub mod assert {
    use serde_json::Value;

    /// Assert that a JSON value has a specific key.
    pub fn has_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_some(),
            "Expected JSON to have key '{key}', got: {value}"
        );
    }

    /// Assert that a JSON value equals expected.
    pub fn json_eq(actual: &Value, expected: &Value) {
        assert_eq!(
            actual, expected,
            "JSON mismatch:\nactual: {actual:#}\nexpected: {expected:#}"
        );
    }

    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }

    /// Assert that a string does not contain a substring.
    pub fn not_contains(haystack: &str, needle: &str) {
        assert!(
            !haystack.contains(needle),
            "Expected string to NOT contain '{needle}'\nActual: {haystack}"
        );
    }

    /// Assert the `field` of each row, in order.
    pub fn field_values(rows: &[Value], field: &str, expected: &[Value]) {
        let actual: Vec<Value> = rows
            .iter()
            .map(|row| row.get(field).cloned().unwrap_or(Value::Null))
            .collect();
        assert_eq!(actual, expected, "unexpected '{field}' values");
    }
}
