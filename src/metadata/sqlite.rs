//! SQLite-backed metric store.
//!
//! Metrics are stored as JSON documents keyed by id, one table per
//! persisted shape. The default database lives under the platform data
//! directory (`<data_dir>/metrica/metrics.db`).

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

use super::store::{MetricStore, StoreError, StoreResult};
use crate::model::{AtomicMetric, MetricDefinition};

const ATOMIC_TABLE: &str = "atomic_metrics";
const DEFINITION_TABLE: &str = "metric_definitions";

pub struct SqliteMetricStore {
    conn: Mutex<Connection>,
}

impl SqliteMetricStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    pub fn default_path() -> StoreResult<PathBuf> {
        let base = dirs::data_dir().ok_or(StoreError::NoDataDir)?;
        Ok(base.join("metrica").join("metrics.db"))
    }

    fn init(&self) -> StoreResult<()> {
        self.lock()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS atomic_metrics (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                body TEXT NOT NULL,
                workspace_ids TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS metric_definitions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                body TEXT NOT NULL,
                workspace_ids TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn insert<T: Serialize>(
        &self,
        table: &str,
        name: &str,
        body: &T,
        workspace_ids: &[String],
    ) -> StoreResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::to_string(body)?;
        let workspaces = serde_json::to_string(workspace_ids)?;
        self.lock()?.execute(
            &format!(
                "INSERT INTO {} (id, name, body, workspace_ids, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                table
            ),
            params![id, name, body, workspaces, now()],
        )?;
        Ok(id)
    }

    fn update<T: Serialize>(&self, table: &str, id: &str, name: &str, body: &T) -> StoreResult<()> {
        let body = serde_json::to_string(body)?;
        let changed = self.lock()?.execute(
            &format!(
                "UPDATE {} SET name = ?2, body = ?3, updated_at = ?4 WHERE id = ?1",
                table
            ),
            params![id, name, body, now()],
        )?;
        if changed == 0 {
            return Err(StoreError::MetricNotFound(id.to_string()));
        }
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: &str, id: &str) -> StoreResult<Option<T>> {
        let body: Option<String> = self
            .lock()?
            .query_row(
                &format!("SELECT body FROM {} WHERE id = ?1", table),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(&self, table: &str) -> StoreResult<Vec<(String, T)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT id, body FROM {} ORDER BY name", table))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut items = Vec::new();
        for row in rows {
            let (id, body) = row?;
            items.push((id, serde_json::from_str(&body)?));
        }
        Ok(items)
    }

    /// Workspaces a stored metric was saved into.
    pub fn workspaces_of(&self, id: &str) -> StoreResult<Option<Vec<String>>> {
        let conn = self.lock()?;
        for table in [ATOMIC_TABLE, DEFINITION_TABLE] {
            let workspaces: Option<String> = conn
                .query_row(
                    &format!("SELECT workspace_ids FROM {} WHERE id = ?1", table),
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(workspaces) = workspaces {
                return Ok(Some(serde_json::from_str(&workspaces)?));
            }
        }
        Ok(None)
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl MetricStore for SqliteMetricStore {
    async fn create_atomic_metric(
        &self,
        metric: &AtomicMetric,
        workspace_ids: &[String],
    ) -> StoreResult<String> {
        self.insert(ATOMIC_TABLE, &metric.name, metric, workspace_ids)
    }

    async fn create_metric_definition(
        &self,
        definition: &MetricDefinition,
        workspace_ids: &[String],
    ) -> StoreResult<String> {
        self.insert(DEFINITION_TABLE, &definition.name, definition, workspace_ids)
    }

    async fn update_atomic_metric(&self, id: &str, metric: &AtomicMetric) -> StoreResult<()> {
        self.update(ATOMIC_TABLE, id, &metric.name, metric)
    }

    async fn update_metric_definition(
        &self,
        id: &str,
        definition: &MetricDefinition,
    ) -> StoreResult<()> {
        self.update(DEFINITION_TABLE, id, &definition.name, definition)
    }

    async fn get_atomic_metric(&self, id: &str) -> StoreResult<Option<AtomicMetric>> {
        Ok(self.get::<AtomicMetric>(ATOMIC_TABLE, id)?.map(|mut m| {
            m.id = Some(id.to_string());
            m
        }))
    }

    async fn get_metric_definition(&self, id: &str) -> StoreResult<Option<MetricDefinition>> {
        Ok(self.get::<MetricDefinition>(DEFINITION_TABLE, id)?.map(|mut d| {
            d.id = Some(id.to_string());
            d
        }))
    }

    async fn list_atomic_metrics(&self) -> StoreResult<Vec<AtomicMetric>> {
        Ok(self
            .list::<AtomicMetric>(ATOMIC_TABLE)?
            .into_iter()
            .map(|(id, mut m)| {
                m.id = Some(id);
                m
            })
            .collect())
    }

    async fn list_metric_definitions(&self) -> StoreResult<Vec<MetricDefinition>> {
        Ok(self
            .list::<MetricDefinition>(DEFINITION_TABLE)?
            .into_iter()
            .map(|(id, mut d)| {
                d.id = Some(id);
                d
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExtractedMetric, MetricCategory};

    #[tokio::test]
    async fn test_roundtrip_atomic_metric() {
        let store = SqliteMetricStore::open_in_memory().unwrap();
        let mut extracted = ExtractedMetric::new("total", MetricCategory::Atomic);
        extracted.aggregation_function = Some("SUM".to_string());
        let metric = AtomicMetric::from(&extracted);

        let id = store
            .create_atomic_metric(&metric, &["ws1".to_string()])
            .await
            .unwrap();
        let stored = store.get_atomic_metric(&id).await.unwrap().unwrap();
        assert_eq!(stored.name, "total");
        assert_eq!(stored.aggregation_function.as_deref(), Some("SUM"));
        assert_eq!(stored.id.as_deref(), Some(id.as_str()));
        assert_eq!(store.workspaces_of(&id).unwrap(), Some(vec!["ws1".to_string()]));
    }

    #[tokio::test]
    async fn test_update_missing_definition_fails() {
        let store = SqliteMetricStore::open_in_memory().unwrap();
        let mut extracted = ExtractedMetric::new("z", MetricCategory::Composite);
        extracted.derived_formula = Some("x + y".to_string());
        let definition = MetricDefinition::from_extracted(&extracted).unwrap();
        let err = store
            .update_metric_definition("missing", &definition)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.list_metric_definitions().await.unwrap().is_empty());
    }
}
