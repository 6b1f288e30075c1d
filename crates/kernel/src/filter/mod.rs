//! Filter expression compiler.
//!
//! Turns declarative [`Filter`] trees into parameterized WHERE clauses, with
//! an operator set that custom handlers can extend per column type or per
//! field.

pub mod comparison;
pub mod evaluate;
pub mod handlers;
pub mod registry;
pub mod types;
pub mod where_builder;

pub use comparison::{ComparisonBuilder, FieldRef, escape_like};
pub use evaluate::Evaluator;
pub use registry::{FilterContext, FilterDeclaration, FilterHandler, FilterRegistry, FilterTarget};
pub use types::{
    ComparisonOperator, FieldComparison, FieldFilter, Filter, FilterValue, RangeValue,
};
pub use where_builder::{RelationJoin, WhereBuilder};
