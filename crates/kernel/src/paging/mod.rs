//! Cursor pagination engine.
//!
//! Entities without a key set page positionally; entities with one use the
//! seek method. Either way the compiled query carries a [`PagePlan`] that
//! turns fetched rows into a [`Connection`].

pub mod cursor;
pub mod keyset;
pub mod offset;
pub mod types;

use serde_json::Value;

pub use cursor::{Cursor, KeysetField};
pub use keyset::{KeysetPlan, seek_filter};
pub use offset::OffsetPlan;
pub use types::{Connection, Edge, Page, PageInfo, PagingArgs, PagingPolicy};

/// Post-processing for one compiled page.
#[derive(Debug, Clone, PartialEq)]
pub enum PagePlan {
    Offset(OffsetPlan),
    Keyset(KeysetPlan),
}

impl PagePlan {
    pub fn finish(&self, rows: Vec<Value>) -> Connection<Value> {
        match self {
            PagePlan::Offset(plan) => plan.finish(rows),
            PagePlan::Keyset(plan) => plan.finish(rows),
        }
    }

    pub fn fetch_limit(&self) -> u64 {
        match self {
            PagePlan::Offset(plan) => plan.fetch_limit(),
            PagePlan::Keyset(plan) => plan.fetch_limit(),
        }
    }

    pub fn fetch_offset(&self) -> u64 {
        match self {
            PagePlan::Offset(plan) => plan.start,
            PagePlan::Keyset(_) => 0,
        }
    }
}
