//! Tests for column lineage extraction over planned queries.

use metrica::lineage::{ColumnLineage, LineageExtractor, LineageReport, TransformType};
use metrica::planner::{build_plan, RelKind};

fn report(sql: &str) -> LineageReport {
    let plan = build_plan(sql).unwrap();
    LineageExtractor::new().extract(&plan)
}

fn root<'a>(report: &'a LineageReport, name: &str) -> &'a ColumnLineage {
    report
        .root_lineages()
        .into_iter()
        .find(|l| l.output_name == name)
        .unwrap_or_else(|| panic!("no root lineage named {}", name))
}

#[test]
fn test_one_lineage_per_projected_column() {
    let report = report("SELECT amount * 2 AS a, tax AS b, amount + tax AS c FROM orders");

    let roots = report.root_lineages();
    assert_eq!(roots.len(), 3);
    let indexes: Vec<usize> = roots.iter().map(|l| l.output_index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
    assert!(roots.iter().all(|l| l.rel_kind == RelKind::Project && l.node_id == 0));

    let c = root(&report, "c");
    assert_eq!(c.sources.len(), 2);
    assert_eq!(c.input_fields, vec!["amount", "tax"]);
    assert!(report.warnings.is_empty());
}

#[test]
fn test_pass_through_column() {
    let report = report("SELECT amount * 2 AS a, tax AS b FROM orders");
    let b = root(&report, "b");
    assert!(b.is_pass_through());
    assert_eq!(b.transform_type, TransformType::Identity);
    let source = b.single_source().unwrap();
    assert_eq!(source.source_table, "orders");
    assert_eq!(source.source_column, "tax");
    assert!(source.transformations.is_empty());
}

#[test]
fn test_null_filled_aggregate_chain() {
    let report = report("SELECT IFNULL(SUM(amount), 0) AS total FROM orders");
    let total = root(&report, "total");

    assert_eq!(total.transform_type, TransformType::Ifnull);
    assert_eq!(total.aggregation_function.as_deref(), Some("SUM"));
    let condition = total.filter_condition.as_ref().unwrap();
    assert_eq!(condition["_is_null_filled"], serde_json::json!(true));
    assert_eq!(condition["_null_default_value"], serde_json::json!("0"));
    assert_eq!(
        total.sources[0].full_lineage(),
        "orders.amount -> SUM(amount) -> IFNULL(SUM(amount), 0)"
    );

    let aggregate = report
        .lineages
        .iter()
        .find(|l| l.rel_kind == RelKind::Aggregate)
        .unwrap();
    assert!(!aggregate.is_root);
    assert_eq!(aggregate.transform_type, TransformType::Aggregation);
    assert_eq!(aggregate.expression, "SUM(amount)");
}

#[test]
fn test_nested_aliases_resolve_to_base_table() {
    let report = report(
        "SELECT SUM(B.amt) AS total FROM \
         (SELECT A.amt FROM (SELECT o.amount AS amt FROM orders o WHERE o.status = 'paid') A) B",
    );

    let total = root(&report, "total");
    assert_eq!(total.single_source().unwrap().source_table, "orders");
    assert_eq!(total.single_source().unwrap().source_column, "amount");
    for lineage in &report.lineages {
        for source in &lineage.sources {
            assert_eq!(source.source_table, "orders", "{} leaked an alias", lineage.output_name);
        }
    }
}

#[test]
fn test_filter_boundary_carries_predicate() {
    let report = report("SELECT amount FROM orders WHERE status = 'paid'");

    let filtered: Vec<_> = report
        .lineages
        .iter()
        .filter(|l| l.rel_kind == RelKind::Filter)
        .collect();
    assert_eq!(filtered.len(), 2);
    for lineage in filtered {
        assert!(!lineage.is_root);
        let condition = lineage.filter_condition.as_ref().unwrap();
        assert_eq!(condition["_filter_expression"], serde_json::json!("status = 'paid'"));
    }
}

#[test]
fn test_union_sources_are_tagged_by_branch() {
    let report = report("SELECT amount FROM orders_2023 UNION ALL SELECT amount FROM orders_2024");

    let amount = root(&report, "amount");
    assert_eq!(amount.transform_type, TransformType::UnionAll);
    assert_eq!(amount.sources.len(), 2);
    assert_eq!(amount.sources[0].source_table, "orders_2023");
    assert_eq!(amount.sources[0].transformations, vec!["UNION input#0"]);
    assert_eq!(amount.sources[1].source_table, "orders_2024");
    assert_eq!(amount.sources[1].transformations, vec!["UNION input#1"]);
}

#[test]
fn test_composite_join_key_yields_one_path_per_pair() {
    let report = report(
        "SELECT o.amount FROM orders o \
         JOIN customers c ON o.customer_id = c.id AND o.region = c.region",
    );

    let mut pairs: Vec<(String, String, String, String)> = report
        .join_paths
        .iter()
        .map(|p| {
            (
                p.left_table.clone(),
                p.left_column.clone(),
                p.right_table.clone(),
                p.right_column.clone(),
            )
        })
        .collect();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            ("orders".into(), "customer_id".into(), "customers".into(), "id".into()),
            ("orders".into(), "region".into(), "customers".into(), "region".into()),
        ]
    );
}

#[test]
fn test_count_star_has_no_sources_and_no_warning() {
    let report = report("SELECT COUNT(*) AS n FROM orders");
    let n = root(&report, "n");
    assert_eq!(n.aggregation_function.as_deref(), Some("COUNT"));
    assert!(n.sources.is_empty());
    assert!(report.warnings.is_empty());
}

#[test]
fn test_report_serializes_warnings_as_text() {
    let report = report("SELECT SUM(amount) AS total FROM orders");
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["warnings"], serde_json::json!([]));
    assert_eq!(value["lineages"][0]["transform_type"], "AGGREGATION");
    assert_eq!(value["lineages"][0]["sources"][0]["source_column"], "amount");
}
