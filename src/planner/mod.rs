//! Relational plans - SQL text lowered to an operator tree.
//!
//! The planner has three parts:
//! 1. `rel` / `rex`: the closed operator set and scalar expressions
//! 2. `builder` / `expr_converter`: SQL text → `RelOperator`
//! 3. `origin`: column-origin queries over a built plan

pub mod builder;
pub mod expr_converter;
pub mod origin;
pub mod rel;
pub mod rex;

pub use builder::{build_plan, PlanBuilder};
pub use origin::{origins_of, ColumnOrigin};
pub use rel::{
    AggregateCall, AggregateNode, CorrelateNode, FilterNode, JoinKind, JoinNode, ProjectNode,
    RelKind, RelOperator, ScanNode, UnionNode,
};
pub use rex::{InputRef, Literal, RexCall, RexNode, SqlKind};

use thiserror::Error;

/// Errors that can occur while lowering SQL into a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("SQL parse error: {0}")]
    Sql(#[from] sqlparser::parser::ParserError),

    #[error("No SQL statement found")]
    EmptyQuery,

    #[error("Expected a single statement, found {0}")]
    MultipleStatements(usize),

    #[error("Only SELECT queries are supported, found: {0}")]
    UnsupportedStatement(String),

    #[error("Unsupported SQL: {0}")]
    Unsupported(String),

    #[error("Unknown table or alias '{0}'")]
    UnknownTable(String),

    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    #[error("Column '{0}' must appear in GROUP BY or be used in an aggregate function")]
    NotGrouped(String),
}

pub type PlanResult<T> = Result<T, PlanError>;
