//! Validation of extracted metrics before they are saved.
//!
//! Each category has its own rule set. Every rule runs independently, so a
//! single result carries all problems found on a metric. Validation never
//! modifies the metric.

pub mod resolver;

pub use resolver::{BatchResolver, CatalogSnapshot, MetricResolver};

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::model::{Confidence, ExtractedMetric, MetricCategory, ObjectType};

pub const AGGREGATION_FUNCTIONS: &[&str] =
    &["SUM", "AVG", "COUNT", "MAX", "MIN", "COUNT_DISTINCT"];

pub const TIME_GRANULARITIES: &[&str] = &["minute", "hour", "day", "week", "month", "quarter", "year"];

pub const STATUSES: &[&str] = &["active", "inactive", "deprecated"];

pub const COMPARISON_TYPES: &[&str] = &["YoY", "MoM", "WoW", "QoQ"];

static NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

static FIELD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").unwrap());

static FORMULA_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+\-*/%^(){}0-9A-Za-z_.\[\]\s]+$").unwrap());

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    MissingBusinessProcess,
    BusinessProcessNotFound,
    MissingAggregationFunction,
    InvalidAggregationFunction,
    MissingName,
    InvalidName,
    InvalidStatus,
    MissingAtomicMetric,
    AtomicMetricNotFound,
    InvalidTimeGranularity,
    InvalidTimeDimension,
    InvalidDimension,
    InvalidFilterField,
    NullFilterValue,
    InvalidComparisonType,
    MissingFormula,
    InvalidFormula,
    MissingBaseMetrics,
    BaseMetricNotFound,
    LowConfidence,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::MissingBusinessProcess => "MISSING_BUSINESS_PROCESS",
            ValidationCode::BusinessProcessNotFound => "BUSINESS_PROCESS_NOT_FOUND",
            ValidationCode::MissingAggregationFunction => "MISSING_AGGREGATION_FUNCTION",
            ValidationCode::InvalidAggregationFunction => "INVALID_AGGREGATION_FUNCTION",
            ValidationCode::MissingName => "MISSING_NAME",
            ValidationCode::InvalidName => "INVALID_NAME",
            ValidationCode::InvalidStatus => "INVALID_STATUS",
            ValidationCode::MissingAtomicMetric => "MISSING_ATOMIC_METRIC",
            ValidationCode::AtomicMetricNotFound => "ATOMIC_METRIC_NOT_FOUND",
            ValidationCode::InvalidTimeGranularity => "INVALID_TIME_GRANULARITY",
            ValidationCode::InvalidTimeDimension => "INVALID_TIME_DIMENSION",
            ValidationCode::InvalidDimension => "INVALID_DIMENSION",
            ValidationCode::InvalidFilterField => "INVALID_FILTER_FIELD",
            ValidationCode::NullFilterValue => "NULL_FILTER_VALUE",
            ValidationCode::InvalidComparisonType => "INVALID_COMPARISON_TYPE",
            ValidationCode::MissingFormula => "MISSING_FORMULA",
            ValidationCode::InvalidFormula => "INVALID_FORMULA",
            ValidationCode::MissingBaseMetrics => "MISSING_BASE_METRICS",
            ValidationCode::BaseMetricNotFound => "BASE_METRIC_NOT_FOUND",
            ValidationCode::LowConfidence => "LOW_CONFIDENCE",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub code: ValidationCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub metric_name: String,
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub infos: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            infos: Vec::new(),
        }
    }

    pub fn error(&mut self, code: ValidationCode, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(ValidationIssue {
            code,
            message: message.into(),
        });
    }

    pub fn warning(&mut self, code: ValidationCode, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            code,
            message: message.into(),
        });
    }

    pub fn info(&mut self, code: ValidationCode, message: impl Into<String>) {
        self.infos.push(ValidationIssue {
            code,
            message: message.into(),
        });
    }

    pub fn has_error(&self, code: ValidationCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn has_warning(&self, code: ValidationCode) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Checks extracted metrics against the ontology and the known metrics.
pub struct MetricValidator {
    object_types: HashSet<String>,
    resolvers: Vec<Box<dyn MetricResolver>>,
}

impl MetricValidator {
    pub fn new(object_types: &[ObjectType]) -> Self {
        Self {
            object_types: object_types.iter().map(|t| t.name.clone()).collect(),
            resolvers: Vec::new(),
        }
    }

    /// Add a fallback resolver, consulted after those already registered.
    pub fn with_resolver(mut self, resolver: impl MetricResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    /// Validate one metric against the registered resolvers only.
    pub fn validate(&self, metric: &ExtractedMetric) -> ValidationResult {
        let resolvers: Vec<&dyn MetricResolver> = self.resolvers.iter().map(|r| r.as_ref()).collect();
        self.validate_with(metric, &resolvers)
    }

    /// Validate a batch. References to metrics of the same batch resolve
    /// before the registered resolvers are consulted.
    pub fn validate_batch(&self, metrics: &[ExtractedMetric]) -> Vec<ValidationResult> {
        let batch = BatchResolver::new(metrics);
        let mut resolvers: Vec<&dyn MetricResolver> = Vec::with_capacity(self.resolvers.len() + 1);
        resolvers.push(&batch);
        resolvers.extend(self.resolvers.iter().map(|r| r.as_ref()));
        metrics
            .iter()
            .map(|metric| self.validate_with(metric, &resolvers))
            .collect()
    }

    fn validate_with(
        &self,
        metric: &ExtractedMetric,
        resolvers: &[&dyn MetricResolver],
    ) -> ValidationResult {
        let mut result = ValidationResult::new(&metric.name);
        match metric.category {
            MetricCategory::Atomic => self.validate_atomic(metric, &mut result),
            MetricCategory::Derived => validate_derived(metric, resolvers, &mut result),
            MetricCategory::Composite => validate_composite(metric, resolvers, &mut result),
        }
        if metric.confidence == Confidence::Low {
            result.info(
                ValidationCode::LowConfidence,
                "Metric was inferred with low confidence; review its source mapping",
            );
        }
        result
    }

    fn validate_atomic(&self, metric: &ExtractedMetric, result: &mut ValidationResult) {
        match non_empty(&metric.business_process) {
            None => result.error(
                ValidationCode::MissingBusinessProcess,
                "Atomic metrics must name a business process (object type)",
            ),
            Some(process) if !self.object_types.contains(process) => result.error(
                ValidationCode::BusinessProcessNotFound,
                format!("Business process object type '{}' does not exist", process),
            ),
            Some(_) => {}
        }

        match non_empty(&metric.aggregation_function) {
            None => result.error(
                ValidationCode::MissingAggregationFunction,
                "Atomic metrics must name an aggregation function",
            ),
            Some(function) if !is_valid_aggregation_function(function) => result.error(
                ValidationCode::InvalidAggregationFunction,
                format!(
                    "Unsupported aggregation function '{}', expected one of: {}",
                    function,
                    AGGREGATION_FUNCTIONS.join(", ")
                ),
            ),
            Some(_) => {}
        }

        if metric.name.is_empty() {
            result.warning(ValidationCode::MissingName, "A metric name is recommended");
        } else if !NAME.is_match(&metric.name) {
            result.error(
                ValidationCode::InvalidName,
                format!(
                    "Metric name '{}' may only contain letters, digits and underscores",
                    metric.name
                ),
            );
        }

        if !metric.status.is_empty() && !STATUSES.contains(&metric.status.to_lowercase().as_str()) {
            result.error(
                ValidationCode::InvalidStatus,
                format!(
                    "Invalid status '{}', expected one of: {}",
                    metric.status,
                    STATUSES.join(", ")
                ),
            );
        }
    }
}

fn validate_derived(
    metric: &ExtractedMetric,
    resolvers: &[&dyn MetricResolver],
    result: &mut ValidationResult,
) {
    match non_empty(&metric.atomic_metric_id) {
        None => result.error(
            ValidationCode::MissingAtomicMetric,
            "Derived metrics must reference an atomic metric",
        ),
        Some(id) if !resolvers.iter().any(|r| r.has_atomic_metric(id)) => result.error(
            ValidationCode::AtomicMetricNotFound,
            format!("Referenced atomic metric '{}' does not exist", id),
        ),
        Some(_) => {}
    }

    if let Some(granularity) = non_empty(&metric.time_granularity) {
        if !is_valid_time_granularity(granularity) {
            result.warning(
                ValidationCode::InvalidTimeGranularity,
                format!(
                    "Unknown time granularity '{}', expected one of: {}",
                    granularity,
                    TIME_GRANULARITIES.join(", ")
                ),
            );
        }
    }

    if let Some(dimension) = non_empty(&metric.time_dimension) {
        if !FIELD_NAME.is_match(dimension) {
            result.warning(
                ValidationCode::InvalidTimeDimension,
                format!("Time dimension '{}' does not look like a field name", dimension),
            );
        }
    }

    for dimension in &metric.dimensions {
        if !FIELD_NAME.is_match(dimension) {
            result.warning(
                ValidationCode::InvalidDimension,
                format!("Dimension '{}' does not look like a field name", dimension),
            );
        }
    }

    if let Some(conditions) = &metric.filter_conditions {
        for (field, value) in conditions {
            if !FIELD_NAME.is_match(field) {
                result.warning(
                    ValidationCode::InvalidFilterField,
                    format!("Filter field '{}' does not look like a field name", field),
                );
            }
            if value.is_null() {
                result.warning(
                    ValidationCode::NullFilterValue,
                    format!("Filter value for '{}' is null", field),
                );
            }
        }
    }

    for comparison in &metric.comparison_type {
        if !COMPARISON_TYPES.iter().any(|c| c.eq_ignore_ascii_case(comparison)) {
            result.warning(
                ValidationCode::InvalidComparisonType,
                format!("Unknown comparison type '{}'", comparison),
            );
        }
    }

    if metric.name.is_empty() {
        result.warning(ValidationCode::MissingName, "A metric name is recommended");
    }
}

fn validate_composite(
    metric: &ExtractedMetric,
    resolvers: &[&dyn MetricResolver],
    result: &mut ValidationResult,
) {
    match non_empty(&metric.derived_formula) {
        None => result.error(
            ValidationCode::MissingFormula,
            "Composite metrics must have a formula",
        ),
        Some(formula) if !is_valid_formula(formula) => result.error(
            ValidationCode::InvalidFormula,
            format!("Invalid formula: {}", formula),
        ),
        Some(_) => {}
    }

    if metric.base_metric_ids.is_empty() {
        result.error(
            ValidationCode::MissingBaseMetrics,
            "Composite metrics must reference base metrics",
        );
    }
    for id in &metric.base_metric_ids {
        if !resolvers.iter().any(|r| r.has_metric(id)) {
            result.error(
                ValidationCode::BaseMetricNotFound,
                format!("Referenced base metric '{}' does not exist", id),
            );
        }
    }

    if metric.name.is_empty() {
        result.warning(ValidationCode::MissingName, "A metric name is recommended");
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

pub fn is_valid_aggregation_function(function: &str) -> bool {
    AGGREGATION_FUNCTIONS.contains(&function.to_uppercase().as_str())
}

pub fn is_valid_time_granularity(granularity: &str) -> bool {
    TIME_GRANULARITIES.contains(&granularity.to_lowercase().as_str())
}

/// Balanced parentheses over a restricted arithmetic alphabet.
pub fn is_valid_formula(formula: &str) -> bool {
    let mut depth = 0i32;
    for c in formula.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0 && FORMULA_CHARS.is_match(formula)
}
