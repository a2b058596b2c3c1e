//! Column-level lineage over relational plans.
//!
//! For every operator output the extractor records where the value came
//! from (base table and column), the chain of expressions it passed through,
//! and what kind of transform produced it. Lineage problems never abort a
//! run: they are collected as [`LineageError`]s on the report.

pub mod alias;
pub mod column_lineage;
pub mod extractor;
pub mod transform;

pub use alias::AliasContext;
pub use column_lineage::{
    clean_column_name, ColumnLineage, ColumnSource, FilterCondition, JoinPath, LineageReport,
    TransformType,
};
pub use extractor::{extract_all, LineageExtractor};

use thiserror::Error;

use crate::planner::RelKind;

/// Non-fatal lineage problems recorded on a [`LineageReport`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LineageError {
    #[error("Unsupported {kind} operator: {reason}")]
    UnsupportedOperator { kind: RelKind, reason: String },

    #[error("No origin found for '{output}' at node {node_id}")]
    OriginNotFound { output: String, node_id: usize },
}
