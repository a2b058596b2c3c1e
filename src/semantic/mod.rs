//! Semantic layer: metric classification and metric dependencies.
//!
//! Classification runs over the lineages of one extraction:
//!
//! 1. **Aggregate metadata** - group keys (with time granularity) and
//!    aggregate calls of the plan
//! 2. **Classify** - ATOMIC / DERIVED / COMPOSITE metrics from lineages
//! 3. **Link** - DERIVED → ATOMIC and COMPOSITE → base metric references
//! 4. **Propagate** - business processes along dependency edges, with
//!    mapping and default fallbacks

pub mod aggregate;
pub mod classifier;
pub mod dependency_graph;
pub mod error;

pub use aggregate::{time_function_granularity, AggregateCallInfo, AggregateMetadata, GroupKey};
pub use classifier::{classify, normalize_aggregation, MetricClassifier};
pub use dependency_graph::{
    resolve_business_processes, BusinessProcessHints, DependencyGraph, DependencyKind,
    MetricHandle,
};
pub use error::{DependencyCycleError, SemanticError, SemanticResult};
