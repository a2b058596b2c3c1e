//! Metric and ontology data model.

pub mod definition;
pub mod metric;
pub mod ontology;

pub use definition::{AtomicMetric, DefinitionType, MetricDefinition};
pub use metric::{restore_sql, Confidence, ExtractedMetric, MetricCategory};
pub use ontology::{is_system_type, ObjectType, Ontology, Property, TableMapping};
