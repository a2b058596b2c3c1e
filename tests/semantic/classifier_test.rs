//! Tests for metric classification over extracted lineage.

use metrica::lineage::{LineageExtractor, TransformType};
use metrica::model::{Confidence, ExtractedMetric, MetricCategory};
use metrica::planner::build_plan;
use metrica::semantic::{AggregateMetadata, MetricClassifier};

fn classify_sql(sql: &str) -> Vec<ExtractedMetric> {
    classify_with(MetricClassifier::new(), sql)
}

fn classify_with(classifier: MetricClassifier, sql: &str) -> Vec<ExtractedMetric> {
    let plan = build_plan(sql).unwrap();
    let report = LineageExtractor::new().extract(&plan);
    let metadata = AggregateMetadata::from_plan(&plan);
    classifier.classify(&report.lineages, &metadata)
}

fn by_name<'a>(metrics: &'a [ExtractedMetric], name: &str) -> &'a ExtractedMetric {
    metrics
        .iter()
        .find(|m| m.name == name)
        .unwrap_or_else(|| panic!("no metric named {}", name))
}

const COMPOSITE_SQL: &str = "SELECT a.x + b.y AS z FROM \
    (SELECT customer_id, IFNULL(SUM(amount), 0) AS x FROM orders GROUP BY customer_id) a \
    JOIN (SELECT customer_id, IFNULL(SUM(fee), 0) AS y FROM refunds GROUP BY customer_id) b \
    ON a.customer_id = b.customer_id";

#[test]
fn test_plain_sum_is_atomic() {
    let metrics = classify_sql("SELECT SUM(t.amount) AS total FROM orders t");

    assert_eq!(metrics.len(), 1);
    let total = &metrics[0];
    assert_eq!(total.name, "total");
    assert_eq!(total.category, MetricCategory::Atomic);
    assert_eq!(total.confidence, Confidence::High);
    assert_eq!(total.aggregation_function.as_deref(), Some("SUM"));
    assert_eq!(total.aggregation_field.as_deref(), Some("amount"));
    assert_eq!(total.source_table(), Some("orders"));
    assert_eq!(total.display_name, "total");
}

#[test]
fn test_null_filled_sum_is_derived_over_atomic() {
    let metrics = classify_sql("SELECT IFNULL(SUM(t.amount), 0) AS total FROM orders t");

    assert_eq!(metrics.len(), 2);
    let total = &metrics[0];
    assert_eq!(total.name, "total");
    assert_eq!(total.category, MetricCategory::Derived);
    assert_eq!(total.transform_type, Some(TransformType::Ifnull));
    let conditions = total.filter_conditions.as_ref().unwrap();
    assert_eq!(conditions["_null_default_value"], serde_json::json!("0"));
    assert_eq!(conditions["_is_null_filled"], serde_json::json!(true));

    let amount = &metrics[1];
    assert_eq!(amount.name, "amount");
    assert_eq!(amount.category, MetricCategory::Atomic);
    assert_eq!(amount.aggregation_function.as_deref(), Some("SUM"));
    assert!(amount.filter_conditions.is_none());
}

#[test]
fn test_formula_over_two_metrics_is_composite() {
    let metrics = classify_sql(COMPOSITE_SQL);

    let names: Vec<&str> = metrics.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["z", "x", "amount", "y", "fee"]);

    let z = by_name(&metrics, "z");
    assert_eq!(z.category, MetricCategory::Composite);
    assert_eq!(z.derived_formula.as_deref(), Some("x + y"));
    assert_eq!(
        z.base_metric_ids,
        vec![by_name(&metrics, "x").id.clone(), by_name(&metrics, "y").id.clone()]
    );
    assert_eq!(by_name(&metrics, "x").category, MetricCategory::Derived);
    assert_eq!(by_name(&metrics, "fee").category, MetricCategory::Atomic);
    assert_eq!(by_name(&metrics, "fee").source_table(), Some("refunds"));
}

#[test]
fn test_composite_threshold_is_configurable() {
    let metrics = classify_with(
        MetricClassifier::new().with_min_composite_references(3),
        COMPOSITE_SQL,
    );
    assert!(metrics.iter().all(|m| m.category != MetricCategory::Composite));
}

#[test]
fn test_classification_is_deterministic() {
    let sql = "SELECT region, IFNULL(SUM(amount), 0) AS total, COUNT(DISTINCT customer_id) AS buyers \
               FROM orders GROUP BY region";

    let strip = |metrics: Vec<ExtractedMetric>| -> Vec<ExtractedMetric> {
        metrics
            .into_iter()
            .map(|mut m| {
                m.id.clear();
                m.base_metric_ids.clear();
                m
            })
            .collect()
    };
    assert_eq!(strip(classify_sql(sql)), strip(classify_sql(sql)));
}

#[test]
fn test_count_star_is_low_confidence_atomic() {
    let metrics = classify_sql("SELECT COUNT(*) AS n FROM orders");

    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].category, MetricCategory::Atomic);
    assert_eq!(metrics[0].confidence, Confidence::Low);
    assert_eq!(metrics[0].aggregation_function.as_deref(), Some("COUNT"));
    assert!(!metrics[0].notes.is_empty());
}

#[test]
fn test_distinct_count_is_normalized() {
    let metrics = classify_sql("SELECT COUNT(DISTINCT customer_id) AS buyers FROM orders");
    assert_eq!(metrics[0].aggregation_function.as_deref(), Some("COUNT_DISTINCT"));
}

#[test]
fn test_conditional_sum_is_derived() {
    let metrics = classify_sql(
        "SELECT SUM(CASE WHEN status = 'paid' THEN amount ELSE 0 END) AS paid FROM orders",
    );

    let paid = by_name(&metrics, "paid");
    assert_eq!(paid.category, MetricCategory::Derived);
    assert_eq!(paid.aggregation_field.as_deref(), Some("amount"));
    let conditions = paid.filter_conditions.as_ref().unwrap();
    assert_eq!(conditions["_case_type"], serde_json::json!("AGGREGATION_WITH_CASE"));
}

#[test]
fn test_plain_case_measures_the_then_column() {
    let metrics = classify_sql(
        "SELECT CASE WHEN status = 'a' THEN amount ELSE fee END AS picked FROM orders",
    );

    let picked = by_name(&metrics, "picked");
    assert_eq!(picked.category, MetricCategory::Derived);
    assert_eq!(picked.transform_type, Some(TransformType::Case));
    assert_eq!(picked.aggregation_field.as_deref(), Some("amount"));
}

#[test]
fn test_group_keys_become_dimensions_and_time_bucket() {
    let metrics = classify_sql(
        "SELECT region, MONTH(order_date) AS m, SUM(amount) AS total \
         FROM orders GROUP BY region, MONTH(order_date)",
    );

    assert_eq!(metrics.len(), 1);
    let total = &metrics[0];
    assert_eq!(total.dimensions, vec!["region"]);
    assert_eq!(total.time_dimension.as_deref(), Some("order_date"));
    assert_eq!(total.time_granularity.as_deref(), Some("month"));
}

#[test]
fn test_bare_column_is_low_confidence() {
    let metrics = classify_sql("SELECT amount * 2 AS doubled FROM orders");

    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].name, "doubled");
    assert_eq!(metrics[0].category, MetricCategory::Atomic);
    assert_eq!(metrics[0].confidence, Confidence::Low);
    assert_eq!(metrics[0].aggregation_field.as_deref(), Some("amount"));
}
