//! In-memory stores, used by tests and the server's default mode.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::store::{MetricStore, OntologyStore, StoreError, StoreResult};
use crate::model::{AtomicMetric, MetricDefinition, ObjectType, Ontology, TableMapping};

// ============================================================================
// Ontology
// ============================================================================

/// Read-only ontology held in memory, in document order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOntologyStore {
    ontology: Ontology,
}

impl InMemoryOntologyStore {
    pub fn new(ontology: Ontology) -> Self {
        Self { ontology }
    }

    /// Load an ontology document. `.json` files are read as JSON, anything
    /// else as TOML.
    pub fn from_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let ontology = if is_json {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content).map_err(|e| StoreError::InvalidDocument(e.to_string()))?
        };
        let store = Self::new(ontology);
        debug!(
            path = %path.display(),
            object_types = store.ontology.object_types.len(),
            mappings = store.ontology.mappings.len(),
            "loaded ontology"
        );
        Ok(store)
    }

    pub fn with_object_type(mut self, object_type: ObjectType) -> Self {
        self.ontology.object_types.push(object_type);
        self
    }

    pub fn with_mapping(mut self, mapping: TableMapping) -> Self {
        self.ontology.mappings.push(mapping);
        self
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }
}

#[async_trait]
impl OntologyStore for InMemoryOntologyStore {
    async fn list_object_types(&self) -> StoreResult<Vec<ObjectType>> {
        Ok(self.ontology.object_types.clone())
    }

    async fn get_object_type(&self, name: &str) -> StoreResult<ObjectType> {
        self.ontology
            .object_types
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| StoreError::ObjectTypeNotFound(name.to_string()))
    }

    async fn get_mappings_by_table(&self, table: &str) -> StoreResult<Vec<TableMapping>> {
        Ok(self
            .ontology
            .mappings
            .iter()
            .filter(|m| m.table_name.eq_ignore_ascii_case(table))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone)]
struct Stored<T> {
    value: T,
    workspace_ids: Vec<String>,
}

/// Metric store backed by concurrent maps.
#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    atomic: DashMap<String, Stored<AtomicMetric>>,
    definitions: DashMap<String, Stored<MetricDefinition>>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.atomic.len() + self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workspaces a stored metric was saved into.
    pub fn workspaces_of(&self, id: &str) -> Option<Vec<String>> {
        self.atomic
            .get(id)
            .map(|s| s.workspace_ids.clone())
            .or_else(|| self.definitions.get(id).map(|s| s.workspace_ids.clone()))
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn create_atomic_metric(
        &self,
        metric: &AtomicMetric,
        workspace_ids: &[String],
    ) -> StoreResult<String> {
        let id = new_id();
        let mut value = metric.clone();
        value.id = Some(id.clone());
        self.atomic.insert(
            id.clone(),
            Stored {
                value,
                workspace_ids: workspace_ids.to_vec(),
            },
        );
        Ok(id)
    }

    async fn create_metric_definition(
        &self,
        definition: &MetricDefinition,
        workspace_ids: &[String],
    ) -> StoreResult<String> {
        let id = new_id();
        let mut value = definition.clone();
        value.id = Some(id.clone());
        self.definitions.insert(
            id.clone(),
            Stored {
                value,
                workspace_ids: workspace_ids.to_vec(),
            },
        );
        Ok(id)
    }

    async fn update_atomic_metric(&self, id: &str, metric: &AtomicMetric) -> StoreResult<()> {
        let mut entry = self
            .atomic
            .get_mut(id)
            .ok_or_else(|| StoreError::MetricNotFound(id.to_string()))?;
        entry.value = metric.clone();
        entry.value.id = Some(id.to_string());
        Ok(())
    }

    async fn update_metric_definition(
        &self,
        id: &str,
        definition: &MetricDefinition,
    ) -> StoreResult<()> {
        let mut entry = self
            .definitions
            .get_mut(id)
            .ok_or_else(|| StoreError::MetricNotFound(id.to_string()))?;
        entry.value = definition.clone();
        entry.value.id = Some(id.to_string());
        Ok(())
    }

    async fn get_atomic_metric(&self, id: &str) -> StoreResult<Option<AtomicMetric>> {
        Ok(self.atomic.get(id).map(|s| s.value.clone()))
    }

    async fn get_metric_definition(&self, id: &str) -> StoreResult<Option<MetricDefinition>> {
        Ok(self.definitions.get(id).map(|s| s.value.clone()))
    }

    async fn list_atomic_metrics(&self) -> StoreResult<Vec<AtomicMetric>> {
        Ok(self.atomic.iter().map(|s| s.value.clone()).collect())
    }

    async fn list_metric_definitions(&self) -> StoreResult<Vec<MetricDefinition>> {
        Ok(self.definitions.iter().map(|s| s.value.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mappings_by_table_ignore_case() {
        let store = InMemoryOntologyStore::default()
            .with_mapping(TableMapping::new("Order", "ORDERS").with_column("amount", "amount"));
        let mappings = store.get_mappings_by_table("orders").await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].object_type, "Order");
    }

    #[tokio::test]
    async fn test_unknown_object_type() {
        let store = InMemoryOntologyStore::default().with_object_type(ObjectType::new("Order"));
        assert!(store.get_object_type("Order").await.is_ok());
        let err = store.get_object_type("Invoice").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_keeps_id() {
        let store = InMemoryMetricStore::new();
        let metric = AtomicMetric::from(&crate::model::ExtractedMetric::new(
            "total",
            crate::model::MetricCategory::Atomic,
        ));
        let id = store
            .create_atomic_metric(&metric, &["ws1".to_string()])
            .await
            .unwrap();
        let mut renamed = metric.clone();
        renamed.name = "grand_total".to_string();
        store.update_atomic_metric(&id, &renamed).await.unwrap();

        let stored = store.get_atomic_metric(&id).await.unwrap().unwrap();
        assert_eq!(stored.name, "grand_total");
        assert_eq!(stored.id.as_deref(), Some(id.as_str()));
        assert_eq!(store.workspaces_of(&id), Some(vec!["ws1".to_string()]));
        assert!(store.update_atomic_metric("nope", &renamed).await.is_err());
    }
}
