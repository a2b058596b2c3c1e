//! Ontology catalog and metric persistence.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SqlPasteService                          │
//! └─────────────────────────────────────────────────────────────────┘
//!                 │                               │
//!                 ▼                               ▼
//! ┌───────────────────────────────┐ ┌───────────────────────────────┐
//! │        OntologyStore          │ │          MetricStore          │
//! │  - list_object_types()        │ │  - create_atomic_metric()     │
//! │  - get_object_type()          │ │  - create_metric_definition() │
//! │  - get_mappings_by_table()    │ │  - update_*() / get_*()       │
//! └───────────────────────────────┘ └───────────────────────────────┘
//!                 │                          │            │
//!                 ▼                          ▼            ▼
//!        InMemoryOntologyStore     InMemoryMetricStore  SqliteMetricStore
//! ```

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::{InMemoryMetricStore, InMemoryOntologyStore};
pub use sqlite::SqliteMetricStore;
pub use store::{MetricStore, OntologyStore, StoreError, StoreResult};
