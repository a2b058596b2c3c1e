//! Lookups used to check metric references.

use std::collections::HashSet;

use crate::metadata::{MetricStore, StoreResult};
use crate::model::{ExtractedMetric, MetricCategory};

/// Answers whether a referenced metric id exists.
///
/// The validator consults a list of resolvers in order and accepts a
/// reference as soon as one of them knows the id.
pub trait MetricResolver: Send + Sync {
    fn has_atomic_metric(&self, id: &str) -> bool;

    fn has_metric_definition(&self, id: &str) -> bool;

    /// Either kind. Composite metrics may build on atomics or definitions.
    fn has_metric(&self, id: &str) -> bool {
        self.has_atomic_metric(id) || self.has_metric_definition(id)
    }
}

/// Metrics extracted in the same request, referenced by extraction id.
#[derive(Debug, Clone, Copy)]
pub struct BatchResolver<'a> {
    metrics: &'a [ExtractedMetric],
}

impl<'a> BatchResolver<'a> {
    pub fn new(metrics: &'a [ExtractedMetric]) -> Self {
        Self { metrics }
    }

    fn has(&self, id: &str, accept: impl Fn(MetricCategory) -> bool) -> bool {
        self.metrics
            .iter()
            .any(|m| m.id == id && accept(m.category))
    }
}

impl MetricResolver for BatchResolver<'_> {
    fn has_atomic_metric(&self, id: &str) -> bool {
        self.has(id, |c| c == MetricCategory::Atomic)
    }

    fn has_metric_definition(&self, id: &str) -> bool {
        self.has(id, |c| c != MetricCategory::Atomic)
    }
}

/// Ids of persisted metrics, captured from a [`MetricStore`].
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    atomic_ids: HashSet<String>,
    definition_ids: HashSet<String>,
}

impl CatalogSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(store: &dyn MetricStore) -> StoreResult<Self> {
        let atomic = store.list_atomic_metrics().await?;
        let definitions = store.list_metric_definitions().await?;
        Ok(Self {
            atomic_ids: atomic.into_iter().filter_map(|m| m.id).collect(),
            definition_ids: definitions.into_iter().filter_map(|d| d.id).collect(),
        })
    }

    pub fn with_atomic(mut self, id: impl Into<String>) -> Self {
        self.atomic_ids.insert(id.into());
        self
    }

    pub fn with_definition(mut self, id: impl Into<String>) -> Self {
        self.definition_ids.insert(id.into());
        self
    }
}

impl MetricResolver for CatalogSnapshot {
    fn has_atomic_metric(&self, id: &str) -> bool {
        self.atomic_ids.contains(id)
    }

    fn has_metric_definition(&self, id: &str) -> bool {
        self.definition_ids.contains(id)
    }
}
