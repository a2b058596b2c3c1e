//! Lineage data model.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::planner::{ColumnOrigin, JoinKind, RelKind};

use super::LineageError;

/// Filter-condition attributes attached by transform detection, keyed by
/// underscore-prefixed attribute names (`_null_default_value`, ...).
pub type FilterCondition = BTreeMap<String, serde_json::Value>;

/// How an output column was derived from its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformType {
    Identity,
    Ifnull,
    Case,
    Aggregation,
    Coalesce,
    UnionAll,
    GroupKey,
}

impl TransformType {
    /// True for the null-handling and conditional transforms that make a
    /// metric derived.
    pub fn is_value_transform(&self) -> bool {
        matches!(self, TransformType::Ifnull | TransformType::Case | TransformType::Coalesce)
    }

    /// Human-readable description used for extracted metrics.
    pub fn description(&self) -> &'static str {
        match self {
            TransformType::Identity => "Direct field reference",
            TransformType::Ifnull => "Null values replaced with a default",
            TransformType::Case => "Conditional value (CASE WHEN)",
            TransformType::Aggregation => "Aggregated value",
            TransformType::Coalesce => "First non-null value (COALESCE)",
            TransformType::UnionAll => "Combined from multiple query branches",
            TransformType::GroupKey => "Grouping dimension",
        }
    }
}

impl fmt::Display for TransformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransformType::Identity => "IDENTITY",
            TransformType::Ifnull => "IFNULL",
            TransformType::Case => "CASE",
            TransformType::Aggregation => "AGGREGATION",
            TransformType::Coalesce => "COALESCE",
            TransformType::UnionAll => "UNION_ALL",
            TransformType::GroupKey => "GROUP_KEY",
        };
        write!(f, "{}", s)
    }
}

/// One base-table origin of an output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSource {
    pub source_table: String,
    pub source_column: String,
    pub ordinal: usize,
    /// Expression texts applied on the way up, outermost first.
    pub transformations: Vec<String>,
}

impl ColumnSource {
    /// `table.column -> innermost -> ... -> outermost`
    pub fn full_lineage(&self) -> String {
        let mut parts = vec![format!("{}.{}", self.source_table, self.source_column)];
        parts.extend(self.transformations.iter().rev().cloned());
        parts.join(" -> ")
    }

    /// Source column without any table or schema prefix.
    pub fn clean_column(&self) -> &str {
        clean_column_name(&self.source_column)
    }
}

impl From<ColumnOrigin> for ColumnSource {
    fn from(origin: ColumnOrigin) -> Self {
        Self {
            source_table: origin.table,
            source_column: origin.column,
            ordinal: origin.ordinal,
            transformations: origin.transformations,
        }
    }
}

/// Strip `schema.table.` prefixes and quoting from a column name.
pub fn clean_column_name(name: &str) -> &str {
    let last = name.rsplit('.').next().unwrap_or(name);
    last.trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
}

/// Full provenance of one output field of one operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnLineage {
    pub output_name: String,
    pub output_index: usize,
    /// Pre-order index of the producing operator.
    pub node_id: usize,
    pub rel_kind: RelKind,
    pub is_root: bool,
    /// Rendered expression or aggregate call.
    pub expression: String,
    /// Input field names the expression references.
    pub input_fields: Vec<String>,
    pub transform_type: TransformType,
    pub aggregation_function: Option<String>,
    pub distinct: bool,
    pub filter_arg_index: Option<usize>,
    pub filter_condition: Option<FilterCondition>,
    pub sources: Vec<ColumnSource>,
}

impl ColumnLineage {
    pub fn new(output_name: impl Into<String>, output_index: usize, node_id: usize, rel_kind: RelKind) -> Self {
        Self {
            output_name: output_name.into(),
            output_index,
            node_id,
            rel_kind,
            is_root: false,
            expression: String::new(),
            input_fields: Vec::new(),
            transform_type: TransformType::Identity,
            aggregation_function: None,
            distinct: false,
            filter_arg_index: None,
            filter_condition: None,
            sources: Vec::new(),
        }
    }

    /// Single source, if there is exactly one.
    pub fn single_source(&self) -> Option<&ColumnSource> {
        match self.sources.as_slice() {
            [source] => Some(source),
            _ => None,
        }
    }

    /// Expression is a bare reference to one input field.
    pub fn is_pass_through(&self) -> bool {
        self.input_fields.len() == 1 && self.expression == self.input_fields[0]
    }
}

/// Equi-join column pair resolved to base tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPath {
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
    pub join_kind: JoinKind,
    /// Rendered join condition.
    pub condition: String,
}

/// Result of one extraction run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LineageReport {
    pub lineages: Vec<ColumnLineage>,
    pub join_paths: Vec<JoinPath>,
    #[serde(serialize_with = "serialize_errors")]
    pub warnings: Vec<LineageError>,
}

impl LineageReport {
    /// Lineages produced by the plan root, in output order.
    pub fn root_lineages(&self) -> Vec<&ColumnLineage> {
        self.lineages.iter().filter(|l| l.is_root).collect()
    }
}

fn serialize_errors<S: serde::Serializer>(errors: &[LineageError], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(|e| e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lineage_runs_innermost_first() {
        let source = ColumnSource {
            source_table: "orders".to_string(),
            source_column: "amount".to_string(),
            ordinal: 0,
            transformations: vec!["IFNULL(SUM(amount), 0)".to_string(), "SUM(amount)".to_string()],
        };
        assert_eq!(
            source.full_lineage(),
            "orders.amount -> SUM(amount) -> IFNULL(SUM(amount), 0)"
        );
    }

    #[test]
    fn test_clean_column_name() {
        assert_eq!(clean_column_name("sales.orders.amount"), "amount");
        assert_eq!(clean_column_name("\"Amount\""), "Amount");
        assert_eq!(clean_column_name("amount"), "amount");
    }

    #[test]
    fn test_transform_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&TransformType::UnionAll).unwrap();
        assert_eq!(json, "\"UNION_ALL\"");
        assert!(TransformType::Coalesce.is_value_transform());
        assert!(!TransformType::Aggregation.is_value_transform());
    }
}
