//! Tests for metric dependency linking, cycle detection and
//! business-process resolution.

use metrica::lineage::ColumnSource;
use metrica::lineage::LineageExtractor;
use metrica::model::{ExtractedMetric, MetricCategory, ObjectType};
use metrica::planner::build_plan;
use metrica::semantic::{
    classify, resolve_business_processes, AggregateMetadata, BusinessProcessHints,
    DependencyGraph, MetricHandle, SemanticError,
};

fn extracted(sql: &str) -> Vec<ExtractedMetric> {
    let plan = build_plan(sql).unwrap();
    let report = LineageExtractor::new().extract(&plan);
    classify(&report.lineages, &AggregateMetadata::from_plan(&plan))
}

fn metric(name: &str, category: MetricCategory) -> ExtractedMetric {
    ExtractedMetric::new(name, category)
}

fn sourced(name: &str, category: MetricCategory, table: &str) -> ExtractedMetric {
    let mut m = metric(name, category);
    m.sources.push(ColumnSource {
        source_table: table.to_string(),
        source_column: name.to_string(),
        ordinal: 0,
        transformations: Vec::new(),
    });
    m
}

#[test]
fn test_derived_metric_links_to_its_atomic() {
    let mut metrics = extracted("SELECT IFNULL(SUM(t.amount), 0) AS total FROM orders t");
    let graph = DependencyGraph::build(&mut metrics);

    let atomic_id = metrics[1].id.clone();
    assert_eq!(metrics[0].atomic_metric_id.as_ref(), Some(&atomic_id));
    assert_eq!(graph.edge_count(), 1);
    assert_eq!(graph.dependencies(MetricHandle(0)), vec![MetricHandle(1)]);

    let adjacency = graph.adjacency(&metrics);
    assert_eq!(adjacency[&metrics[0].id], vec![atomic_id]);
}

#[test]
fn test_composite_chain_orders_dependencies_first() {
    let mut metrics = extracted(
        "SELECT a.x + b.y AS z FROM \
         (SELECT customer_id, IFNULL(SUM(amount), 0) AS x FROM orders GROUP BY customer_id) a \
         JOIN (SELECT customer_id, IFNULL(SUM(fee), 0) AS y FROM refunds GROUP BY customer_id) b \
         ON a.customer_id = b.customer_id",
    );
    let graph = DependencyGraph::build(&mut metrics);
    assert!(graph.validate(&metrics).is_ok());

    let order = graph.dependency_order().unwrap();
    let position = |name: &str| {
        let handle = graph.handle_of_name(name).unwrap();
        order.iter().position(|h| *h == handle).unwrap()
    };
    assert!(position("amount") < position("x"));
    assert!(position("fee") < position("y"));
    assert!(position("x") < position("z"));
    assert!(position("y") < position("z"));
}

#[test]
fn test_dependency_depths() {
    let atomic = metric("amount", MetricCategory::Atomic);
    let mut inner = metric("z", MetricCategory::Composite);
    inner.base_metric_ids = vec![atomic.id.clone()];
    let mut outer = metric("q", MetricCategory::Composite);
    outer.base_metric_ids = vec![inner.id.clone()];

    let metrics = vec![outer, inner, atomic];
    let depths = DependencyGraph::from_metrics(&metrics).dependency_depths().unwrap();
    assert_eq!(depths, vec![2, 1, 0]);
}

#[test]
fn test_composite_without_base_ids_links_by_formula() {
    let mut x = metric("x", MetricCategory::Derived);
    x.aggregation_field = Some("amount".to_string());
    let y = metric("y", MetricCategory::Derived);
    let mut z = metric("z", MetricCategory::Composite);
    z.derived_formula = Some("y / x".to_string());

    let mut metrics = vec![x, y, z];
    DependencyGraph::build(&mut metrics);
    assert_eq!(
        metrics[2].base_metric_ids,
        vec![metrics[1].id.clone(), metrics[0].id.clone()]
    );
}

#[test]
fn test_cycle_is_reported_with_names() {
    let mut a = metric("a", MetricCategory::Composite);
    let mut b = metric("b", MetricCategory::Composite);
    a.base_metric_ids = vec![b.id.clone()];
    b.base_metric_ids = vec![a.id.clone()];
    let metrics = vec![a, b];

    let graph = DependencyGraph::from_metrics(&metrics);
    assert_eq!(graph.detect_cycles().len(), 1);
    match graph.validate(&metrics) {
        Err(SemanticError::DependencyCycle(err)) => {
            let mut names = err.cycles[0].clone();
            names.sort();
            assert_eq!(names, vec!["a", "b"]);
        }
        other => panic!("expected a cycle, got {:?}", other),
    }
    assert!(graph.dependency_order().is_err());
}

#[test]
fn test_unknown_id_lookup() {
    let graph = DependencyGraph::from_metrics(&[metric("a", MetricCategory::Atomic)]);
    assert_eq!(
        graph.handle_of("missing"),
        Err(SemanticError::UnknownMetric("missing".to_string()))
    );
}

#[test]
fn test_business_process_flows_from_atomic() {
    let mut atomic = metric("amount", MetricCategory::Atomic);
    atomic.business_process = Some("Order".to_string());
    let mut derived = metric("total", MetricCategory::Derived);
    derived.atomic_metric_id = Some(atomic.id.clone());
    let mut composite = metric("ratio", MetricCategory::Composite);
    composite.base_metric_ids = vec![derived.id.clone()];

    // Composite first so a single sweep is not enough.
    let mut metrics = vec![composite, derived, atomic];
    let graph = DependencyGraph::from_metrics(&metrics);
    let filled = graph.propagate_business_process(&mut metrics);

    assert_eq!(filled, 2);
    assert!(metrics
        .iter()
        .all(|m| m.business_process.as_deref() == Some("Order")));
}

#[test]
fn test_table_mapping_then_default() {
    let mut metrics = vec![
        sourced("amount", MetricCategory::Atomic, "orders"),
        sourced("fee", MetricCategory::Atomic, "unmapped_table"),
    ];
    let graph = DependencyGraph::from_metrics(&metrics);
    let object_types = vec![
        ObjectType::new("workspace"),
        ObjectType::new("Order"),
        ObjectType::new("Refund"),
    ];
    let hints = BusinessProcessHints::new()
        .with_table("ORDERS", "Order")
        .with_default_from(&object_types);

    resolve_business_processes(&mut metrics, &graph, &hints);

    assert_eq!(metrics[0].business_process.as_deref(), Some("Order"));
    assert!(metrics[0].notes.is_empty());
    assert_eq!(metrics[1].business_process.as_deref(), Some("Order"));
    assert_eq!(metrics[1].notes, vec!["Business process defaulted to `Order`"]);
}

#[test]
fn test_no_default_leaves_metric_untagged() {
    let mut metrics = vec![sourced("amount", MetricCategory::Atomic, "orders")];
    let graph = DependencyGraph::from_metrics(&metrics);
    resolve_business_processes(&mut metrics, &graph, &BusinessProcessHints::new());
    assert!(metrics[0].business_process.is_none());
}
