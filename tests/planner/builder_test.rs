//! Tests for lowering SQL text into relational plans.

use metrica::planner::{build_plan, PlanError, RelKind, RelOperator};

fn kinds(plan: &RelOperator) -> Vec<RelKind> {
    plan.preorder().into_iter().map(RelOperator::kind).collect()
}

#[test]
fn test_grouped_query_plan_shape() {
    let plan = build_plan(
        "SELECT region, SUM(amount) AS total FROM orders WHERE status = 'paid' GROUP BY region",
    )
    .unwrap();

    insta::assert_snapshot!(plan.explain().trim_end(), @r"
    Aggregate(group=[{0}], total=[SUM(amount)])
      Project(region=[region], amount=[amount])
        Filter(condition=[status = 'paid'])
          Scan(table=[orders], columns=[status, region, amount])
    ");
    assert_eq!(plan.row_type(), vec!["region", "total"]);
}

#[test]
fn test_join_keeps_both_sides() {
    let plan = build_plan(
        "SELECT o.amount, c.region FROM orders o LEFT OUTER JOIN customers c ON o.customer_id = c.id",
    )
    .unwrap();

    let join = plan
        .preorder()
        .into_iter()
        .find_map(|node| match node {
            RelOperator::Join(join) => Some(join),
            _ => None,
        })
        .expect("plan should contain a join");
    assert_eq!(join.kind, metrica::planner::JoinKind::Left);
    assert!(join.condition.is_some());
    assert_eq!(plan.scanned_tables(), vec!["orders", "customers"]);
    assert_eq!(plan.row_type(), vec!["amount", "region"]);
}

#[test]
fn test_union_all_branches_are_flattened() {
    let plan = build_plan(
        "SELECT amount FROM orders_2023 \
         UNION ALL SELECT amount FROM orders_2024 \
         UNION ALL SELECT amount FROM orders_2025",
    )
    .unwrap();

    match &plan {
        RelOperator::Union(union) => {
            assert!(union.all);
            assert_eq!(union.inputs.len(), 3);
        }
        other => panic!("expected a union, got {:?}", other.kind()),
    }
}

#[test]
fn test_union_arity_mismatch() {
    let err = build_plan("SELECT a, b FROM t UNION ALL SELECT a FROM u").unwrap_err();
    assert!(matches!(err, PlanError::Unsupported(_)));
}

#[test]
fn test_cte_is_inlined() {
    let plan = build_plan(
        "WITH paid AS (SELECT amount FROM orders WHERE status = 'paid') \
         SELECT SUM(amount) AS total FROM paid",
    )
    .unwrap();
    assert_eq!(plan.scanned_tables(), vec!["orders"]);
    assert_eq!(plan.row_type(), vec!["total"]);
}

#[test]
fn test_having_sits_above_aggregate() {
    let plan = build_plan(
        "SELECT region, SUM(amount) AS total FROM orders GROUP BY region HAVING SUM(amount) > 100",
    )
    .unwrap();
    assert_eq!(
        kinds(&plan)[..2],
        [RelKind::Filter, RelKind::Aggregate]
    );
}

#[test]
fn test_distinct_count_call() {
    let plan = build_plan("SELECT COUNT(DISTINCT customer_id) AS buyers FROM orders").unwrap();
    let RelOperator::Aggregate(agg) = &plan else {
        panic!("expected an aggregate root");
    };
    assert_eq!(agg.agg_calls.len(), 1);
    assert_eq!(agg.agg_calls[0].function, "COUNT");
    assert!(agg.agg_calls[0].distinct);
    assert_eq!(agg.agg_calls[0].name, "buyers");
}

#[test]
fn test_cross_apply_becomes_correlate() {
    let plan = build_plan(
        "SELECT o.id, x.doubled FROM orders o \
         CROSS APPLY (SELECT o.amount * 2 AS doubled FROM dual) x",
    )
    .unwrap();
    assert!(kinds(&plan).contains(&RelKind::Correlate));
}

#[test]
fn test_malformed_sql_is_a_parse_error() {
    let err = build_plan("SELEC amount FROM orders").unwrap_err();
    assert!(matches!(err, PlanError::Sql(_)));
}

#[test]
fn test_unknown_qualifier() {
    let err = build_plan("SELECT x.amount FROM orders o").unwrap_err();
    assert!(matches!(err, PlanError::UnknownTable(q) if q == "x"));
}

#[test]
fn test_empty_input() {
    assert!(matches!(build_plan("   ").unwrap_err(), PlanError::EmptyQuery));
}
