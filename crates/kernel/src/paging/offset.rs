//! Positional paging.
//!
//! Cursors wrap a zero-based index into the full ordered result. Forward
//! pages over-fetch one row to detect a next page without a count query.

use serde_json::Value;

use super::cursor::Cursor;
use super::types::{Connection, Edge, Page};
use crate::error::{QueryError, QueryResult};

/// Window to fetch and how to turn the fetched rows into a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetPlan {
    /// Index of the first row of the window.
    pub start: u64,
    /// Rows the caller asked for (after clamping).
    pub size: u64,
    /// Whether one extra row is fetched to detect a following page.
    pub over_fetch: bool,
    pub has_previous_page: bool,
    /// Known up front for backward windows, which end before an existing row.
    pub has_next_page: Option<bool>,
}

impl OffsetPlan {
    pub fn new(page: &Page) -> QueryResult<Self> {
        match page {
            Page::Forward { first, after } => {
                let start = match after {
                    Some(cursor) => cursor.clone().into_offset()?.saturating_add(1),
                    None => 0,
                };
                Ok(Self {
                    start,
                    size: *first,
                    over_fetch: true,
                    has_previous_page: start > 0,
                    has_next_page: None,
                })
            }
            Page::Backward { last, before } => {
                let Some(before) = before else {
                    return Err(QueryError::InvalidPaging(
                        "last without before needs a keyset; use first or limit/offset".into(),
                    ));
                };
                let end = before.clone().into_offset()?;
                let start = end.saturating_sub(*last);
                Ok(Self {
                    start,
                    size: end - start,
                    over_fetch: false,
                    has_previous_page: start > 0,
                    has_next_page: Some(true),
                })
            }
            Page::Offset { limit, offset } => Ok(Self {
                start: *offset,
                size: *limit,
                over_fetch: true,
                has_previous_page: *offset > 0,
                has_next_page: None,
            }),
        }
    }

    /// LIMIT to send to the executor.
    pub fn fetch_limit(&self) -> u64 {
        if self.over_fetch {
            self.size.saturating_add(1)
        } else {
            self.size
        }
    }

    pub fn finish(&self, mut rows: Vec<Value>) -> Connection<Value> {
        let extra = rows.len() as u64 > self.size;
        rows.truncate(usize::try_from(self.size).unwrap_or(usize::MAX));

        let edges = rows
            .into_iter()
            .enumerate()
            .map(|(i, node)| Edge {
                node,
                cursor: Cursor::Offset(self.start + i as u64).encode(),
            })
            .collect();

        let has_next = self.has_next_page.unwrap_or(extra);
        Connection::new(edges, has_next, self.has_previous_page)
    }
}
