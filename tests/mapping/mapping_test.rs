//! Tests for aligning SQL field references with ontology table mappings.

use metrica::lineage::{JoinPath, LineageExtractor};
use metrica::mapping::{
    collect_field_references, parse_strategies, FieldReference, FieldRole, MappingError,
    MappingResolver, MatchStrategy, TableMappings,
};
use metrica::metadata::InMemoryOntologyStore;
use metrica::model::{Confidence, ObjectType, TableMapping};
use metrica::planner::{build_plan, JoinKind};

fn order_mappings() -> TableMappings {
    [
        TableMapping::new("Order", "orders")
            .with_column("amount", "amount")
            .with_column("userId", "customer")
            .with_column("userid", "customerKey")
            .with_column("status", "orderStatus"),
        TableMapping::new("Customer", "customers").with_column("id", "customerId"),
    ]
    .into_iter()
    .collect()
}

fn select(table: &str, field: &str) -> FieldReference {
    FieldReference::new(FieldRole::Select, Some(table), field, field)
}

#[test]
fn test_exact_match_is_high_confidence() {
    let mapping = MappingResolver::new()
        .resolve_field(&select("orders", "amount"), &order_mappings())
        .unwrap();
    assert_eq!(mapping.object_type, "Order");
    assert_eq!(mapping.object_property, "amount");
    assert_eq!(mapping.strategy, MatchStrategy::Exact);
    assert_eq!(mapping.confidence, Confidence::High);
}

#[test]
fn test_snake_case_match_is_medium_confidence() {
    let mapping = MappingResolver::new()
        .resolve_field(&select("orders", "user_id"), &order_mappings())
        .unwrap();
    assert_eq!(mapping.column_name, "userId");
    assert_eq!(mapping.object_property, "customer");
    assert_eq!(mapping.strategy, MatchStrategy::SnakeCase);
    assert_eq!(mapping.confidence, Confidence::Medium);
}

#[test]
fn test_case_insensitive_runs_before_snake_case() {
    let mapping = MappingResolver::new()
        .resolve_field(&select("ORDERS", "UserID"), &order_mappings())
        .unwrap();
    assert_eq!(mapping.strategy, MatchStrategy::CaseInsensitive);
    assert_eq!(mapping.confidence, Confidence::Medium);
}

#[test]
fn test_custom_strategy_order() {
    let resolver = MappingResolver::with_strategies(vec![MatchStrategy::Exact]);
    let unmapped = resolver
        .resolve_field(&select("orders", "user_id"), &order_mappings())
        .unwrap_err();
    assert_eq!(unmapped.confidence, Confidence::Low);
    assert_eq!(unmapped.suggested_object_type.as_deref(), Some("Order"));
}

#[test]
fn test_parse_strategies() {
    let strategies = parse_strategies(&["exact", "snake-case", "CAMEL"]).unwrap();
    assert_eq!(
        strategies,
        vec![MatchStrategy::Exact, MatchStrategy::SnakeCase, MatchStrategy::CamelCase]
    );
    assert!(matches!(
        parse_strategies(&["fuzzy"]),
        Err(MappingError::UnknownStrategy(name)) if name == "fuzzy"
    ));
}

#[test]
fn test_references_by_clause() {
    let plan = build_plan(
        "SELECT region, SUM(amount) AS total FROM orders WHERE status = 'paid' GROUP BY region",
    )
    .unwrap();
    let report = LineageExtractor::new().extract(&plan);
    let references = collect_field_references(&plan, &report);

    let summary: Vec<(FieldRole, &str)> = references
        .iter()
        .map(|r| (r.role, r.field.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (FieldRole::Select, "region"),
            (FieldRole::Select, "amount"),
            (FieldRole::Where, "status"),
            (FieldRole::GroupBy, "region"),
        ]
    );
    assert!(references.iter().all(|r| r.table.as_deref() == Some("orders")));
    assert_eq!(references[1].aggregation_function.as_deref(), Some("SUM"));
    assert_eq!(references[2].expression, "status = 'paid'");
}

#[test]
fn test_align_collects_object_types_and_joins() {
    let references = vec![
        select("orders", "amount"),
        select("orders", "discount"),
        FieldReference::new(FieldRole::Where, Some("shipments"), "carrier", "carrier = 'ups'"),
    ];
    let joins = vec![JoinPath {
        left_table: "orders".to_string(),
        left_column: "customer_id".to_string(),
        right_table: "customers".to_string(),
        right_column: "id".to_string(),
        join_kind: JoinKind::Inner,
        condition: "customer_id = id".to_string(),
    }];

    let result = MappingResolver::new().align(&references, &order_mappings(), &joins);

    assert_eq!(result.field_mappings.len(), 1);
    assert_eq!(result.unmapped_fields.len(), 2);
    assert_eq!(result.unmapped_fields[0].field, "discount");
    assert_eq!(result.unmapped_fields[0].suggested_object_type.as_deref(), Some("Order"));
    assert_eq!(result.unmapped_fields[1].suggested_object_type, None);
    assert_eq!(result.involved_object_types, vec!["Order", "Customer"]);
    assert_eq!(result.object_type_for_table("CUSTOMERS"), Some("Customer"));
    assert_eq!(result.join_paths[0].right_object_type.as_deref(), Some("Customer"));

    let hints = result.business_process_hints(&[ObjectType::new("Order")]);
    assert_eq!(hints.for_table("orders"), Some("Order"));
}

#[tokio::test]
async fn test_fetch_mappings_from_store() {
    let store = InMemoryOntologyStore::default()
        .with_object_type(ObjectType::new("Order"))
        .with_mapping(TableMapping::new("Order", "orders").with_column("amount", "amount"));

    let mappings =
        TableMappings::fetch(&store, &["orders".to_string(), "refunds".to_string()]).await;
    assert_eq!(mappings.len(), 1);
    assert!(mappings.get("Orders").is_some());
    assert!(mappings.get("refunds").is_none());
}
