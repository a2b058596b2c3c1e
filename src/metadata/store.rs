//! Collaborator traits for the ontology catalog and metric persistence.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{AtomicMetric, MetricDefinition, ObjectType, TableMapping};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by ontology and metric stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object type not found: {0}")]
    ObjectTypeNotFound(String),

    #[error("metric not found: {0}")]
    MetricNotFound(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid ontology document: {0}")]
    InvalidDocument(String),

    #[error("Failed to determine data directory")]
    NoDataDir,

    /// The backing service could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Check if the operation may succeed when retried.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Sqlite(err) => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectTypeNotFound(_) | Self::MetricNotFound(_))
    }
}

/// Read access to the ontology: object types and table mappings.
#[async_trait]
pub trait OntologyStore: Send + Sync {
    async fn list_object_types(&self) -> StoreResult<Vec<ObjectType>>;

    /// Fails with [`StoreError::ObjectTypeNotFound`] for unknown names.
    async fn get_object_type(&self, name: &str) -> StoreResult<ObjectType>;

    /// Mappings whose table name equals `table`, case-insensitively.
    async fn get_mappings_by_table(&self, table: &str) -> StoreResult<Vec<TableMapping>>;

    /// Mappings for several tables, fetched in parallel.
    async fn get_mappings_batch(
        &self,
        tables: &[String],
    ) -> StoreResult<Vec<(String, Vec<TableMapping>)>> {
        let futures: Vec<_> = tables
            .iter()
            .map(|table| self.get_mappings_by_table(table))
            .collect();

        let results = futures::future::join_all(futures).await;

        tables
            .iter()
            .cloned()
            .zip(results)
            .map(|(table, result)| result.map(|mappings| (table, mappings)))
            .collect()
    }
}

/// Persistence for extracted metrics.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Store a new atomic metric and return its id.
    async fn create_atomic_metric(
        &self,
        metric: &AtomicMetric,
        workspace_ids: &[String],
    ) -> StoreResult<String>;

    /// Store a new derived or composite definition and return its id.
    async fn create_metric_definition(
        &self,
        definition: &MetricDefinition,
        workspace_ids: &[String],
    ) -> StoreResult<String>;

    async fn update_atomic_metric(&self, id: &str, metric: &AtomicMetric) -> StoreResult<()>;

    async fn update_metric_definition(
        &self,
        id: &str,
        definition: &MetricDefinition,
    ) -> StoreResult<()>;

    async fn get_atomic_metric(&self, id: &str) -> StoreResult<Option<AtomicMetric>>;

    async fn get_metric_definition(&self, id: &str) -> StoreResult<Option<MetricDefinition>>;

    async fn list_atomic_metrics(&self) -> StoreResult<Vec<AtomicMetric>>;

    async fn list_metric_definitions(&self) -> StoreResult<Vec<MetricDefinition>>;
}
