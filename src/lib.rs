//! # Metrica
//!
//! Turns pasted analytical SQL into governed metric definitions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      SQL text                            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [planner]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Relational plan (Scan/Filter/Project/...)         │
//! │        + column origin oracle                            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [lineage]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Column lineage (sources, transforms, join paths)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [semantic]
//! ┌─────────────────────────────────────────────────────────┐
//! │  Classified metrics (ATOMIC/DERIVED/COMPOSITE)           │
//! │  + dependency graph + business processes                 │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!            ┌─────────────┼──────────────┐
//!            ▼ [mapping]   ▼ [llm]        ▼ [validation]
//!      ontology fields  semantic      rule checks
//!                       alignment
//!                          │
//!                          ▼ [service / metadata]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Saved atomic metrics and metric definitions            │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod lineage;
pub mod llm;
pub mod mapping;
pub mod metadata;
pub mod model;
pub mod planner;
pub mod semantic;
pub mod service;
pub mod validation;

#[cfg(feature = "server")]
pub mod web;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::lineage::{ColumnLineage, LineageExtractor, LineageReport};
    pub use crate::mapping::{MappingResolver, MappingResult};
    pub use crate::metadata::{MetricStore, OntologyStore};
    pub use crate::model::{ExtractedMetric, MetricCategory};
    pub use crate::planner::{build_plan, RelOperator};
    pub use crate::semantic::{AggregateMetadata, MetricClassifier};
    pub use crate::service::{ParseOptions, ParseOutcome, SaveRequest, SqlPasteService};
    pub use crate::validation::MetricValidator;
}
