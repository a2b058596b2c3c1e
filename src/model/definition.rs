//! Persisted metric shapes.
//!
//! Atomic metrics are stored on their own; derived and composite metrics
//! share the `MetricDefinition` shape and are told apart by `metric_type`.

use serde::{Deserialize, Serialize};

use super::metric::{ExtractedMetric, MetricCategory};
use crate::lineage::FilterCondition;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicMetric {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub business_process: Option<String>,
    pub aggregation_function: Option<String>,
    pub aggregation_field: Option<String>,
    pub unit: Option<String>,
    pub status: String,
}

impl From<&ExtractedMetric> for AtomicMetric {
    fn from(metric: &ExtractedMetric) -> Self {
        Self {
            id: None,
            name: metric.name.clone(),
            display_name: non_empty(&metric.display_name),
            description: non_empty(&metric.description),
            business_process: metric.business_process.clone(),
            aggregation_function: metric.aggregation_function.clone(),
            aggregation_field: metric.aggregation_field.clone(),
            unit: metric.unit.clone(),
            status: metric.status.clone(),
        }
    }
}

/// Kind tag for a [`MetricDefinition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionType {
    Derived,
    Composite,
}

impl DefinitionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefinitionType::Derived => "derived",
            DefinitionType::Composite => "composite",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "derived" => Some(DefinitionType::Derived),
            "composite" => Some(DefinitionType::Composite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub metric_type: DefinitionType,
    pub atomic_metric_id: Option<String>,
    pub business_scope: Option<String>,
    pub time_dimension: Option<String>,
    pub time_granularity: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    pub filter_conditions: Option<FilterCondition>,
    #[serde(default)]
    pub comparison_type: Vec<String>,
    pub derived_formula: Option<String>,
    #[serde(default)]
    pub base_metric_ids: Vec<String>,
    pub unit: Option<String>,
    pub status: String,
}

impl MetricDefinition {
    /// Definition for a derived or composite metric. Atomic metrics have no
    /// definition shape and yield `None`.
    pub fn from_extracted(metric: &ExtractedMetric) -> Option<Self> {
        let metric_type = match metric.category {
            MetricCategory::Atomic => return None,
            MetricCategory::Derived => DefinitionType::Derived,
            MetricCategory::Composite => DefinitionType::Composite,
        };
        Some(Self {
            id: None,
            name: metric.name.clone(),
            display_name: non_empty(&metric.display_name),
            description: non_empty(&metric.description),
            metric_type,
            atomic_metric_id: metric.atomic_metric_id.clone(),
            business_scope: metric.business_process.clone(),
            time_dimension: metric.time_dimension.clone(),
            time_granularity: metric.time_granularity.clone(),
            dimensions: metric.dimensions.clone(),
            filter_conditions: metric.filter_conditions.clone(),
            comparison_type: metric.comparison_type.clone(),
            derived_formula: metric.derived_formula.clone(),
            base_metric_ids: metric.base_metric_ids.clone(),
            unit: metric.unit.clone(),
            status: metric.status.clone(),
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
