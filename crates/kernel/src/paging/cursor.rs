//! Opaque pagination cursors.
//!
//! Wire format is base64 of a versioned JSON envelope:
//!
//! ```text
//! {"v":1,"kind":"offset","offset":4}
//! {"v":1,"kind":"keyset","fields":[{"field":"id","value":7}]}
//! ```
//!
//! The legacy positional form `arrayconnection:<index>` is still accepted
//! on decode.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{QueryError, QueryResult};
use crate::sort::SortField;

const VERSION: u32 = 1;
const LEGACY_PREFIX: &str = "arrayconnection:";

/// One sort-key value captured from a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeysetField {
    pub field: String,
    pub value: Value,
}

/// A decoded cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum Cursor {
    /// Zero-based index into the result window.
    Offset(u64),
    /// Sort-key values of one row, in sort order.
    Keyset(Vec<KeysetField>),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Payload {
    Offset { v: u32, offset: u64 },
    Keyset { v: u32, fields: Vec<KeysetField> },
}

impl Cursor {
    /// Keyset cursor for `row` under `sort`. Missing fields read as null.
    pub fn for_row(row: &Map<String, Value>, sort: &[SortField]) -> Self {
        Cursor::Keyset(
            sort.iter()
                .map(|s| KeysetField {
                    field: s.field.clone(),
                    value: row.get(&s.field).cloned().unwrap_or(Value::Null),
                })
                .collect(),
        )
    }

    pub fn encode(&self) -> String {
        let payload = match self {
            Cursor::Offset(offset) => Payload::Offset {
                v: VERSION,
                offset: *offset,
            },
            Cursor::Keyset(fields) => Payload::Keyset {
                v: VERSION,
                fields: fields.clone(),
            },
        };
        // Serializing plain strings, integers and JSON values cannot fail.
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        STANDARD.encode(json)
    }

    pub fn decode(encoded: &str) -> QueryResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| reject(encoded, format!("not base64: {e}")))?;

        if let Some(index) = bytes.strip_prefix(LEGACY_PREFIX.as_bytes()) {
            let index = std::str::from_utf8(index)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| reject(encoded, "bad positional index"))?;
            return Ok(Cursor::Offset(index));
        }

        let payload: Payload = serde_json::from_slice(&bytes)
            .map_err(|e| reject(encoded, format!("bad payload: {e}")))?;

        match payload {
            Payload::Offset { v, offset } => {
                check_version(encoded, v)?;
                Ok(Cursor::Offset(offset))
            }
            Payload::Keyset { v, fields } => {
                check_version(encoded, v)?;
                if fields.is_empty() {
                    return Err(reject(encoded, "keyset cursor has no fields"));
                }
                Ok(Cursor::Keyset(fields))
            }
        }
    }

    /// Positional index, or an error for keyset cursors.
    pub fn into_offset(self) -> QueryResult<u64> {
        match self {
            Cursor::Offset(offset) => Ok(offset),
            Cursor::Keyset(_) => Err(QueryError::CursorDecode(
                "expected a positional cursor, got a keyset cursor".to_string(),
            )),
        }
    }

    /// Keyset values checked against the current effective sort.
    pub fn into_keyset(self, sort: &[SortField]) -> QueryResult<Vec<KeysetField>> {
        let fields = match self {
            Cursor::Keyset(fields) => fields,
            Cursor::Offset(_) => {
                return Err(QueryError::CursorDecode(
                    "expected a keyset cursor, got a positional cursor".to_string(),
                ));
            }
        };

        let matches = fields.len() == sort.len()
            && fields.iter().zip(sort).all(|(f, s)| f.field == s.field);
        if !matches {
            let got: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
            let want: Vec<&str> = sort.iter().map(|s| s.field.as_str()).collect();
            tracing::warn!(?got, ?want, "keyset cursor does not match sort");
            return Err(QueryError::CursorDecode(format!(
                "cursor fields {got:?} do not match sort {want:?}"
            )));
        }
        Ok(fields)
    }
}

fn check_version(encoded: &str, v: u32) -> QueryResult<()> {
    if v != VERSION {
        return Err(reject(encoded, format!("unsupported cursor version {v}")));
    }
    Ok(())
}

fn reject(encoded: &str, reason: impl Into<String>) -> QueryError {
    let reason = reason.into();
    let preview: String = encoded.chars().take(64).collect();
    tracing::warn!(
        cursor = %preview,
        reason = %reason,
        "rejected cursor"
    );
    QueryError::CursorDecode(reason)
}
