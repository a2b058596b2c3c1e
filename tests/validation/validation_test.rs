//! Tests for per-category metric validation.

use metrica::model::{Confidence, ExtractedMetric, MetricCategory, ObjectType};
use metrica::validation::{CatalogSnapshot, MetricValidator, ValidationCode};

fn object_types() -> Vec<ObjectType> {
    vec![ObjectType::new("Order"), ObjectType::new("Refund")]
}

fn atomic(name: &str) -> ExtractedMetric {
    let mut m = ExtractedMetric::new(name, MetricCategory::Atomic);
    m.business_process = Some("Order".to_string());
    m.aggregation_function = Some("SUM".to_string());
    m.aggregation_field = Some("amount".to_string());
    m
}

fn codes(issues: &[metrica::validation::ValidationIssue]) -> Vec<ValidationCode> {
    issues.iter().map(|i| i.code).collect()
}

#[test]
fn test_complete_atomic_metric_is_valid() {
    let result = MetricValidator::new(&object_types()).validate(&atomic("total_amount"));
    assert!(result.is_valid);
    assert!(result.errors.is_empty());
    assert!(result.warnings.is_empty());
}

#[test]
fn test_atomic_rules_run_independently() {
    let mut m = atomic("total amount");
    m.business_process = Some("Invoice".to_string());
    m.aggregation_function = Some("MEDIAN".to_string());
    m.status = "archived".to_string();

    let result = MetricValidator::new(&object_types()).validate(&m);
    assert!(!result.is_valid);
    assert_eq!(
        codes(&result.errors),
        vec![
            ValidationCode::BusinessProcessNotFound,
            ValidationCode::InvalidAggregationFunction,
            ValidationCode::InvalidName,
            ValidationCode::InvalidStatus,
        ]
    );
}

#[test]
fn test_missing_atomic_fields() {
    let mut m = ExtractedMetric::new("total", MetricCategory::Atomic);
    m.confidence = Confidence::Low;

    let result = MetricValidator::new(&object_types()).validate(&m);
    assert!(result.has_error(ValidationCode::MissingBusinessProcess));
    assert!(result.has_error(ValidationCode::MissingAggregationFunction));
    assert_eq!(codes(&result.infos), vec![ValidationCode::LowConfidence]);
}

#[test]
fn test_derived_needs_a_known_atomic() {
    let validator = MetricValidator::new(&object_types());

    let unlinked = ExtractedMetric::new("paid_total", MetricCategory::Derived);
    assert_eq!(
        codes(&validator.validate(&unlinked).errors),
        vec![ValidationCode::MissingAtomicMetric]
    );

    let mut dangling = ExtractedMetric::new("paid_total", MetricCategory::Derived);
    dangling.atomic_metric_id = Some("nope".to_string());
    assert!(validator
        .validate(&dangling)
        .has_error(ValidationCode::AtomicMetricNotFound));

    let persisted = MetricValidator::new(&object_types())
        .with_resolver(CatalogSnapshot::new().with_atomic("saved-1"));
    let mut linked = ExtractedMetric::new("paid_total", MetricCategory::Derived);
    linked.atomic_metric_id = Some("saved-1".to_string());
    assert!(persisted.validate(&linked).is_valid);
}

#[test]
fn test_derived_soft_checks_are_warnings() {
    let base = atomic("amount");
    let mut m = ExtractedMetric::new("monthly_amount", MetricCategory::Derived);
    m.atomic_metric_id = Some(base.id.clone());
    m.time_granularity = Some("fortnight".to_string());
    m.time_dimension = Some("DATE(created_at)".to_string());
    m.comparison_type = vec!["YoY".to_string(), "DoD".to_string()];

    let results = MetricValidator::new(&object_types()).validate_batch(&[base, m]);
    let derived = &results[1];
    assert!(derived.is_valid);
    assert_eq!(
        codes(&derived.warnings),
        vec![
            ValidationCode::InvalidTimeGranularity,
            ValidationCode::InvalidTimeDimension,
            ValidationCode::InvalidComparisonType,
        ]
    );
}

#[test]
fn test_unbalanced_formula_is_one_error() {
    let mut m = ExtractedMetric::new("ratio", MetricCategory::Composite);
    m.derived_formula = Some("(a + b".to_string());
    m.base_metric_ids = vec!["a-id".to_string(), "b-id".to_string()];

    let validator = MetricValidator::new(&object_types()).with_resolver(
        CatalogSnapshot::new()
            .with_definition("a-id")
            .with_definition("b-id"),
    );
    let result = validator.validate(&m);
    assert_eq!(codes(&result.errors), vec![ValidationCode::InvalidFormula]);
}

#[test]
fn test_composite_base_checks() {
    let validator = MetricValidator::new(&object_types());

    let mut empty = ExtractedMetric::new("ratio", MetricCategory::Composite);
    empty.derived_formula = Some("a / b".to_string());
    assert_eq!(
        codes(&validator.validate(&empty).errors),
        vec![ValidationCode::MissingBaseMetrics]
    );

    let mut dangling = empty.clone();
    dangling.base_metric_ids = vec!["gone".to_string()];
    assert_eq!(
        codes(&validator.validate(&dangling).errors),
        vec![ValidationCode::BaseMetricNotFound]
    );

    let mut unformulated = ExtractedMetric::new("ratio", MetricCategory::Composite);
    unformulated.base_metric_ids = vec!["gone".to_string()];
    assert!(validator
        .validate(&unformulated)
        .has_error(ValidationCode::MissingFormula));
}

#[test]
fn test_composite_may_build_on_atomics() {
    let amount = atomic("amount");
    let orders = atomic("orders");
    let mut ratio = ExtractedMetric::new("avg_ticket", MetricCategory::Composite);
    ratio.derived_formula = Some("amount / orders".to_string());
    ratio.base_metric_ids = vec![amount.id.clone(), orders.id.clone()];

    let results = MetricValidator::new(&object_types()).validate_batch(&[amount, orders, ratio.clone()]);
    assert!(results[2].is_valid, "{:?}", results[2].errors);

    let mut persisted = ratio;
    persisted.base_metric_ids = vec!["saved-atomic".to_string()];
    let validator = MetricValidator::new(&object_types())
        .with_resolver(CatalogSnapshot::new().with_atomic("saved-atomic"));
    assert!(validator.validate(&persisted).is_valid);
}

#[test]
fn test_batch_references_resolve_within_the_batch() {
    let amount = atomic("amount");
    let mut paid = ExtractedMetric::new("paid", MetricCategory::Derived);
    paid.atomic_metric_id = Some(amount.id.clone());
    let mut refunded = ExtractedMetric::new("refunded", MetricCategory::Derived);
    refunded.atomic_metric_id = Some(amount.id.clone());
    let mut net = ExtractedMetric::new("net", MetricCategory::Composite);
    net.derived_formula = Some("paid - refunded".to_string());
    net.base_metric_ids = vec![paid.id.clone(), refunded.id.clone()];

    let batch = vec![amount, paid, refunded, net];
    let validator = MetricValidator::new(&object_types());
    let results = validator.validate_batch(&batch);

    assert!(results.iter().all(|r| r.is_valid), "{:?}", results);
    assert!(!validator.validate(&batch[3]).is_valid);
}

#[test]
fn test_codes_render_screaming_snake_case() {
    assert_eq!(ValidationCode::InvalidFormula.as_str(), "INVALID_FORMULA");
    assert_eq!(ValidationCode::BaseMetricNotFound.to_string(), "BASE_METRIC_NOT_FOUND");
}
