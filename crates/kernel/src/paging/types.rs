//! Paging request and response types.

use serde::{Deserialize, Serialize};

use super::cursor::Cursor;
use crate::error::{QueryError, QueryResult};

/// Paging arguments as received from a caller.
///
/// Exactly one style applies: `first`/`after`, `last`/`before`, or
/// `limit`/`offset`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagingArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

impl PagingArgs {
    pub fn first(n: i64) -> Self {
        Self {
            first: Some(n),
            ..Default::default()
        }
    }

    pub fn last(n: i64) -> Self {
        Self {
            last: Some(n),
            ..Default::default()
        }
    }

    pub fn limit(limit: i64, offset: i64) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
            ..Default::default()
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }
}

/// Page size limits applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingPolicy {
    pub default_page_size: u64,
    /// `None` means unlimited.
    pub max_page_size: Option<u64>,
}

impl Default for PagingPolicy {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: Some(100),
        }
    }
}

impl PagingPolicy {
    fn check(&self, requested: u64) -> QueryResult<u64> {
        match self.max_page_size {
            Some(max) if requested > max => {
                Err(QueryError::PageSizeExceeded { requested, max })
            }
            _ => Ok(requested),
        }
    }
}

/// A validated page request with decoded cursors.
#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    Forward { first: u64, after: Option<Cursor> },
    Backward { last: u64, before: Option<Cursor> },
    Offset { limit: u64, offset: u64 },
}

impl Page {
    /// Validate arguments against the policy and decode cursors.
    pub fn from_args(args: &PagingArgs, policy: &PagingPolicy) -> QueryResult<Self> {
        let uses_cursors = args.after.is_some() || args.before.is_some();
        let uses_relay = args.first.is_some() || args.last.is_some() || uses_cursors;

        if args.limit.is_some() || args.offset.is_some() {
            if uses_relay {
                return Err(QueryError::InvalidPaging(
                    "limit/offset cannot be combined with first, last, after or before".into(),
                ));
            }
            let limit = match args.limit {
                Some(limit) => non_negative("limit", limit)?,
                None => policy.default_page_size,
            };
            let offset = match args.offset {
                Some(offset) => non_negative("offset", offset)?,
                None => 0,
            };
            return Ok(Page::Offset {
                limit: policy.check(limit)?,
                offset,
            });
        }

        if args.first.is_some() && args.last.is_some() {
            return Err(QueryError::InvalidPaging(
                "first and last are mutually exclusive".into(),
            ));
        }
        if args.first.is_some() && args.before.is_some() {
            return Err(QueryError::InvalidPaging(
                "first cannot be combined with before".into(),
            ));
        }
        if args.last.is_some() && args.after.is_some() {
            return Err(QueryError::InvalidPaging(
                "last cannot be combined with after".into(),
            ));
        }
        if args.after.is_some() && args.before.is_some() {
            return Err(QueryError::InvalidPaging(
                "after and before are mutually exclusive".into(),
            ));
        }

        if args.last.is_some() || args.before.is_some() {
            let last = match args.last {
                Some(last) => non_negative("last", last)?,
                None => policy.default_page_size,
            };
            let before = args.before.as_deref().map(Cursor::decode).transpose()?;
            return Ok(Page::Backward {
                last: policy.check(last)?,
                before,
            });
        }

        let first = match args.first {
            Some(first) => non_negative("first", first)?,
            None => policy.default_page_size,
        };
        let after = args.after.as_deref().map(Cursor::decode).transpose()?;
        Ok(Page::Forward {
            first: policy.check(first)?,
            after,
        })
    }

    /// Requested number of rows.
    pub fn size(&self) -> u64 {
        match self {
            Page::Forward { first, .. } => *first,
            Page::Backward { last, .. } => *last,
            Page::Offset { limit, .. } => *limit,
        }
    }
}

fn non_negative(name: &str, value: i64) -> QueryResult<u64> {
    u64::try_from(value)
        .map_err(|_| QueryError::InvalidPaging(format!("{name} must not be negative")))
}

/// Page boundary flags and cursors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// One result with its cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T> {
    pub node: T,
    pub cursor: String,
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

impl<T> Connection<T> {
    /// Build a connection; start/end cursors come from the first/last edge.
    pub fn new(edges: Vec<Edge<T>>, has_next_page: bool, has_previous_page: bool) -> Self {
        let page_info = PageInfo {
            has_next_page,
            has_previous_page,
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
        };
        Self {
            edges,
            page_info,
            total_count: None,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }

    /// Convert every node, keeping cursors and page info.
    pub fn try_map<U, E>(self, mut f: impl FnMut(T) -> Result<U, E>) -> Result<Connection<U>, E> {
        let edges = self
            .edges
            .into_iter()
            .map(|e| {
                Ok(Edge {
                    node: f(e.node)?,
                    cursor: e.cursor,
                })
            })
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Connection {
            edges,
            page_info: self.page_info,
            total_count: self.total_count,
        })
    }
}
