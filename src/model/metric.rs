//! Extracted metric model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lineage::{ColumnSource, FilterCondition, TransformType};

/// Metric category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricCategory {
    /// A single aggregate over one untransformed source field.
    Atomic,
    /// An aggregate combined with filtering, null-handling or conditions.
    Derived,
    /// A formula over two or more other metrics.
    Composite,
}

impl MetricCategory {
    /// Parse a category name, case-insensitively.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "atomic" => Some(MetricCategory::Atomic),
            "derived" => Some(MetricCategory::Derived),
            "composite" => Some(MetricCategory::Composite),
            _ => None,
        }
    }

    /// Order in which categories are persisted: dependencies first.
    pub fn save_order(&self) -> u8 {
        match self {
            MetricCategory::Atomic => 0,
            MetricCategory::Derived => 1,
            MetricCategory::Composite => 2,
        }
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricCategory::Atomic => "ATOMIC",
            MetricCategory::Derived => "DERIVED",
            MetricCategory::Composite => "COMPOSITE",
        };
        write!(f, "{}", s)
    }
}

/// Confidence tier, shared by classification and field mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::Low => "LOW",
            Confidence::Medium => "MEDIUM",
            Confidence::High => "HIGH",
        };
        write!(f, "{}", s)
    }
}

/// A metric reconstructed from a SQL query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetric {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub category: MetricCategory,
    pub confidence: Confidence,
    /// Expression text the metric was read from.
    pub source_sql: String,
    #[serde(default)]
    pub notes: Vec<String>,

    pub business_process: Option<String>,
    pub aggregation_function: Option<String>,
    pub aggregation_field: Option<String>,

    // Derived
    pub atomic_metric_id: Option<String>,
    pub time_dimension: Option<String>,
    pub time_granularity: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    pub filter_conditions: Option<FilterCondition>,
    #[serde(default)]
    pub comparison_type: Vec<String>,

    // Composite
    pub derived_formula: Option<String>,
    #[serde(default)]
    pub base_metric_ids: Vec<String>,

    pub unit: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    pub transform_type: Option<TransformType>,
    #[serde(default)]
    pub sources: Vec<ColumnSource>,
}

fn default_status() -> String {
    "active".to_string()
}

impl ExtractedMetric {
    /// Empty metric of `category` with a fresh id.
    pub fn new(name: impl Into<String>, category: MetricCategory) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            display_name: String::new(),
            description: String::new(),
            category,
            confidence: Confidence::High,
            source_sql: String::new(),
            notes: Vec::new(),
            business_process: None,
            aggregation_function: None,
            aggregation_field: None,
            atomic_metric_id: None,
            time_dimension: None,
            time_granularity: None,
            dimensions: Vec::new(),
            filter_conditions: None,
            comparison_type: Vec::new(),
            derived_formula: None,
            base_metric_ids: Vec::new(),
            unit: None,
            status: default_status(),
            transform_type: None,
            sources: Vec::new(),
        }
    }

    /// Base table of the first source, if any.
    pub fn source_table(&self) -> Option<&str> {
        self.sources.first().map(|s| s.source_table.as_str())
    }
}

/// Standalone `SELECT` that recomputes `metric` from `table`.
///
/// Attribute keys starting with `_` in the filter conditions are metadata
/// and are not rendered as predicates.
pub fn restore_sql(metric: &ExtractedMetric, table: &str) -> String {
    let value = match (&metric.aggregation_function, &metric.aggregation_field) {
        (Some(function), Some(field)) if function == "COUNT_DISTINCT" => {
            Some(format!("COUNT(DISTINCT {})", field))
        }
        (Some(function), Some(field)) => Some(format!("{}({})", function, field)),
        _ if !metric.source_sql.is_empty() => Some(metric.source_sql.clone()),
        _ => None,
    };
    let mut sql = match value {
        Some(value) => format!("SELECT\n    {} AS {}", value, metric.name),
        None => format!("SELECT\n    {}", metric.name),
    };
    sql.push_str(&format!("\nFROM {}", table));

    let predicates: Vec<String> = metric
        .filter_conditions
        .iter()
        .flatten()
        .filter(|(key, _)| !key.starts_with('_') && key.as_str() != "case_branches")
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => format!("{} = '{}'", key, s.replace('\'', "''")),
            other => format!("{} = {}", key, other),
        })
        .collect();
    if !predicates.is_empty() {
        sql.push_str("\nWHERE 1=1");
        for predicate in predicates {
            sql.push_str(&format!("\n    AND {}", predicate));
        }
    }
    sql
}
