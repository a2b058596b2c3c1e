//! End-to-end tests of the SQL paste workflows over in-memory stores.

use std::sync::Arc;

use async_trait::async_trait;
use metrica::llm::{AlignmentSource, LlmClient, LlmResult};
use metrica::metadata::{InMemoryMetricStore, InMemoryOntologyStore, MetricStore};
use metrica::model::{ExtractedMetric, MetricCategory, ObjectType, TableMapping};
use metrica::service::{ParseOptions, SaveRequest, SaveStatus, ServiceError, SqlPasteService};

fn ontology() -> Arc<InMemoryOntologyStore> {
    Arc::new(
        InMemoryOntologyStore::default()
            .with_object_type(ObjectType::new("workspace"))
            .with_object_type(ObjectType::new("Order"))
            .with_mapping(
                TableMapping::new("Order", "orders")
                    .with_column("amount", "amount")
                    .with_column("status", "orderStatus"),
            ),
    )
}

fn service_with(store: Arc<InMemoryMetricStore>) -> SqlPasteService {
    SqlPasteService::new(ontology(), store)
}

fn service() -> SqlPasteService {
    service_with(Arc::new(InMemoryMetricStore::new()))
}

/// Replies with a fixed answer.
struct CannedLlm(&'static str);

#[async_trait]
impl LlmClient for CannedLlm {
    async fn chat(&self, _system_prompt: &str, _user_prompt: &str) -> LlmResult<String> {
        Ok(self.0.to_string())
    }
}

#[tokio::test]
async fn test_parse_atomic_sum() {
    let outcome = service()
        .parse(
            "SELECT SUM(t.amount) AS total FROM orders t WHERE t.status = 'paid'",
            &ParseOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.extracted_metrics.len(), 1);
    let total = &outcome.extracted_metrics[0];
    assert_eq!(total.category, MetricCategory::Atomic);
    assert_eq!(total.business_process.as_deref(), Some("Order"));
    assert!(outcome.all_valid(), "{:?}", outcome.validations);
    assert!(outcome.errors.is_empty());

    let mapped: Vec<&str> = outcome
        .mapping_result
        .field_mappings
        .iter()
        .map(|m| m.object_property.as_str())
        .collect();
    assert_eq!(mapped, vec!["amount", "orderStatus"]);
    assert_eq!(outcome.mapping_result.involved_object_types, vec!["Order"]);
    assert_eq!(outcome.semantic_result.source, AlignmentSource::Heuristic);
    assert_eq!(outcome.suggestions, vec!["All metrics are valid and ready to save"]);
}

#[tokio::test]
async fn test_parse_derived_links_atomic() {
    let outcome = service()
        .parse(
            "SELECT IFNULL(SUM(t.amount), 0) AS total FROM orders t",
            &ParseOptions::default(),
        )
        .await
        .unwrap();

    let metrics = &outcome.extracted_metrics;
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0].category, MetricCategory::Derived);
    assert_eq!(metrics[0].atomic_metric_id.as_ref(), Some(&metrics[1].id));
    assert!(metrics
        .iter()
        .all(|m| m.business_process.as_deref() == Some("Order")));
    assert!(outcome.all_valid(), "{:?}", outcome.validations);
}

#[tokio::test]
async fn test_malformed_sql_is_a_client_error() {
    let err = service()
        .parse("SELEC amount FROM orders", &ParseOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Parse(_)));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_unmapped_table_falls_back_to_default_process() {
    let outcome = service()
        .parse("SELECT SUM(fee) AS fees FROM refunds", &ParseOptions::default())
        .await
        .unwrap();

    let fees = &outcome.extracted_metrics[0];
    assert_eq!(fees.business_process.as_deref(), Some("Order"));
    assert!(fees.notes.iter().any(|n| n.contains("defaulted")));
    assert_eq!(outcome.mapping_result.unmapped_fields.len(), 1);
}

#[tokio::test]
async fn test_llm_requested_but_not_configured() {
    let options = ParseOptions {
        enable_llm: true,
        ..Default::default()
    };
    let outcome = service()
        .parse("SELECT SUM(amount) AS total FROM orders", &options)
        .await
        .unwrap();
    assert!(outcome.suggestions[0].starts_with("LLM is not configured"));
    assert_eq!(outcome.semantic_result.source, AlignmentSource::Heuristic);
}

#[tokio::test]
async fn test_llm_alignment_enriches_metrics() {
    let answer = r#"```json
{"semantic_analysis": {"metrics": [{"sql_field": "total", "recommended_name": "Paid Revenue",
  "business_meaning": "Revenue from paid orders", "unit": "USD", "suggested_metric_type": "DERIVED",
  "confidence": 0.9}]}}
```"#;
    let service = service().with_llm(Arc::new(CannedLlm(answer)));
    let options = ParseOptions {
        enable_llm: true,
        ..Default::default()
    };
    let outcome = service
        .parse("SELECT SUM(amount) AS total FROM orders", &options)
        .await
        .unwrap();

    assert_eq!(outcome.semantic_result.source, AlignmentSource::Llm);
    let total = &outcome.extracted_metrics[0];
    assert_eq!(total.display_name, "Paid Revenue");
    assert_eq!(total.description, "Revenue from paid orders");
    assert_eq!(total.unit.as_deref(), Some("USD"));
    assert_eq!(total.category, MetricCategory::Atomic);
}

#[tokio::test]
async fn test_llm_garbage_falls_back_to_heuristics() {
    let service = service().with_llm(Arc::new(CannedLlm("I cannot help with that.")));
    let options = ParseOptions {
        enable_llm: true,
        ..Default::default()
    };
    let outcome = service
        .parse("SELECT SUM(amount) AS total FROM orders", &options)
        .await
        .unwrap();
    assert!(outcome.suggestions[0].starts_with("LLM semantic analysis failed"));
    assert_eq!(outcome.semantic_result.source, AlignmentSource::Heuristic);
}

#[tokio::test]
async fn test_save_orders_by_category_and_remaps_ids() {
    let store = Arc::new(InMemoryMetricStore::new());
    let service = service_with(store.clone());
    let outcome = service
        .parse(
            "SELECT IFNULL(SUM(t.amount), 0) AS total FROM orders t",
            &ParseOptions::default(),
        )
        .await
        .unwrap();

    let mut request = SaveRequest::new(outcome.extracted_metrics);
    request.workspace_ids = vec!["ws-1".to_string()];
    let result = service.save(&request).await;

    assert!(result.success, "{:?}", result.errors);
    let names: Vec<&str> = result
        .saved_metrics
        .iter()
        .map(|s| s.metric_name.as_str())
        .collect();
    assert_eq!(names, vec!["amount", "total"]);
    assert!(result
        .saved_metrics
        .iter()
        .all(|s| s.status == SaveStatus::Created));

    let atomic_id = &result.saved_ids[0];
    let definition = store
        .get_metric_definition(&result.saved_ids[1])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(definition.atomic_metric_id.as_ref(), Some(atomic_id));
    assert_eq!(store.workspaces_of(atomic_id), Some(vec!["ws-1".to_string()]));
}

async fn is_persisted(store: &InMemoryMetricStore, id: &str) -> bool {
    store.get_atomic_metric(id).await.unwrap().is_some()
        || store.get_metric_definition(id).await.unwrap().is_some()
}

#[tokio::test]
async fn test_save_composite_over_composites_after_its_bases() {
    let store = Arc::new(InMemoryMetricStore::new());
    let service = service_with(store.clone());
    let outcome = service
        .parse(
            "SELECT s.z + s.w AS q FROM \
             (SELECT a.x + b.y AS z, a.x - b.y AS w FROM \
              (SELECT customer_id, IFNULL(SUM(amount), 0) AS x FROM orders GROUP BY customer_id) a \
              JOIN (SELECT customer_id, IFNULL(SUM(fee), 0) AS y FROM refunds GROUP BY customer_id) b \
              ON a.customer_id = b.customer_id) s",
            &ParseOptions::default(),
        )
        .await
        .unwrap();
    let q = outcome
        .extracted_metrics
        .iter()
        .find(|m| m.name == "q")
        .unwrap();
    assert_eq!(q.category, MetricCategory::Composite);
    assert_eq!(q.base_metric_ids.len(), 2);

    let result = service
        .save(&SaveRequest::new(outcome.extracted_metrics.clone()))
        .await;
    assert!(result.success, "{:?}", result.errors);

    let position = |name: &str| {
        result
            .saved_metrics
            .iter()
            .position(|s| s.metric_name == name)
            .unwrap()
    };
    assert!(position("z") < position("q"));
    assert!(position("w") < position("q"));

    for saved in &result.saved_metrics {
        let Some(definition) = store.get_metric_definition(&saved.saved_id).await.unwrap() else {
            continue;
        };
        for id in definition.base_metric_ids.iter().chain(&definition.atomic_metric_id) {
            assert!(
                is_persisted(&store, id).await,
                "{} references unsaved id {}",
                saved.metric_name,
                id
            );
        }
    }
}

#[tokio::test]
async fn test_ratio_over_atomics_is_valid() {
    let outcome = service()
        .parse(
            "SELECT SUM(amount) / COUNT(id) AS avg_ticket FROM orders",
            &ParseOptions::default(),
        )
        .await
        .unwrap();

    let ratio = outcome
        .extracted_metrics
        .iter()
        .position(|m| m.name == "avg_ticket")
        .unwrap();
    assert_eq!(outcome.extracted_metrics[ratio].category, MetricCategory::Composite);
    assert_eq!(outcome.extracted_metrics[ratio].base_metric_ids.len(), 2);
    assert!(
        outcome.validations[ratio].is_valid,
        "{:?}",
        outcome.validations[ratio].errors
    );
}

#[tokio::test]
async fn test_save_updates_metric_with_same_name() {
    let store = Arc::new(InMemoryMetricStore::new());
    let service = service_with(store.clone());

    let mut metric = ExtractedMetric::new("total", MetricCategory::Atomic);
    metric.business_process = Some("Order".to_string());
    metric.aggregation_function = Some("SUM".to_string());
    let first = service.save(&SaveRequest::new(vec![metric.clone()])).await;
    let saved_id = first.saved_ids[0].clone();

    metric.unit = Some("USD".to_string());
    let mut request = SaveRequest::new(vec![metric]);
    request.create_new = false;
    request.existing_ids = vec![saved_id.clone()];
    let second = service.save(&request).await;

    assert_eq!(second.saved_metrics[0].status, SaveStatus::Updated);
    assert_eq!(second.saved_ids, vec![saved_id.clone()]);
    assert_eq!(store.len(), 1);
    let stored = store.get_atomic_metric(&saved_id).await.unwrap().unwrap();
    assert_eq!(stored.unit.as_deref(), Some("USD"));
}

#[tokio::test]
async fn test_save_reports_incomplete_atomic_and_continues() {
    let store = Arc::new(InMemoryMetricStore::new());
    let service = service_with(store.clone());

    let incomplete = ExtractedMetric::new("orphan", MetricCategory::Atomic);
    let mut complete = ExtractedMetric::new("total", MetricCategory::Atomic);
    complete.business_process = Some("Order".to_string());
    complete.aggregation_function = Some("SUM".to_string());

    let result = service
        .save(&SaveRequest::new(vec![incomplete, complete]))
        .await;

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].metric_name, "orphan");
    assert!(result.errors[0].message.contains("business_process"));
    assert_eq!(result.saved_ids.len(), 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_validate_only() {
    let result = service()
        .validate("SELECT COUNT(*) AS n FROM orders")
        .await
        .unwrap();
    assert_eq!(result.extracted_metrics.len(), 1);
    assert!(result.all_valid);
}
