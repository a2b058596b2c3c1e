//! Dependencies between extracted metrics.
//!
//! Metrics live in an arena indexed by [`MetricHandle`]; edges run from a
//! metric to the metrics it is computed from (DERIVED → ATOMIC,
//! COMPOSITE → DERIVED or ATOMIC). The graph also drives business-process
//! propagation along those edges.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tracing::{debug, warn};

use crate::model::{is_system_type, Confidence, ExtractedMetric, MetricCategory, ObjectType};

use super::classifier::find_name;
use super::error::{DependencyCycleError, SemanticError, SemanticResult};

/// Dense index of a metric in the slice the graph was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    /// Derived metric → its atomic metric.
    Atomic,
    /// Composite metric → one of its base metrics.
    Base,
}

pub struct DependencyGraph {
    graph: DiGraph<MetricHandle, DependencyKind>,
    nodes: Vec<NodeIndex>,
    by_id: HashMap<String, MetricHandle>,
    by_name: HashMap<String, MetricHandle>,
}

impl DependencyGraph {
    /// Link metrics that are missing their references, then build the graph.
    ///
    /// DERIVED metrics without an atomic id are linked to the ATOMIC metric
    /// named after (or aggregating) their aggregation field. COMPOSITE
    /// metrics without base ids get every DERIVED metric named in their
    /// formula, in order of appearance.
    pub fn build(metrics: &mut [ExtractedMetric]) -> Self {
        link_atomic_metrics(metrics);
        link_base_metrics(metrics);
        Self::from_metrics(metrics)
    }

    /// Graph over the references metrics already carry.
    pub fn from_metrics(metrics: &[ExtractedMetric]) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = Vec::with_capacity(metrics.len());
        let mut by_id = HashMap::new();
        let mut by_name = HashMap::new();
        for (i, metric) in metrics.iter().enumerate() {
            let handle = MetricHandle(i);
            nodes.push(graph.add_node(handle));
            by_id.insert(metric.id.clone(), handle);
            by_name.entry(metric.name.to_lowercase()).or_insert(handle);
        }

        let mut this = Self {
            graph,
            nodes,
            by_id,
            by_name,
        };
        for (i, metric) in metrics.iter().enumerate() {
            if let Some(atomic) = &metric.atomic_metric_id {
                this.add_edge(MetricHandle(i), atomic, DependencyKind::Atomic);
            }
            for base in &metric.base_metric_ids {
                this.add_edge(MetricHandle(i), base, DependencyKind::Base);
            }
        }
        debug!(
            metrics = this.graph.node_count(),
            edges = this.graph.edge_count(),
            "built metric dependency graph"
        );
        this
    }

    fn add_edge(&mut self, from: MetricHandle, to_id: &str, kind: DependencyKind) {
        match self.by_id.get(to_id) {
            Some(&to) => {
                self.graph.add_edge(self.nodes[from.0], self.nodes[to.0], kind);
            }
            None => debug!(to = to_id, "dependency on a metric outside this batch"),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn handle_of(&self, id: &str) -> SemanticResult<MetricHandle> {
        self.by_id
            .get(id)
            .copied()
            .ok_or_else(|| SemanticError::UnknownMetric(id.to_string()))
    }

    pub fn handle_of_name(&self, name: &str) -> Option<MetricHandle> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    /// Direct dependencies of `handle`, in the order they were recorded.
    pub fn dependencies(&self, handle: MetricHandle) -> Vec<MetricHandle> {
        let Some(&node) = self.nodes.get(handle.0) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges(node).collect();
        edges.sort_by_key(|e| e.id().index());
        edges.into_iter().map(|e| self.graph[e.target()]).collect()
    }

    /// Metric id → ids it depends on.
    pub fn adjacency(&self, metrics: &[ExtractedMetric]) -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        for (i, metric) in metrics.iter().enumerate().take(self.nodes.len()) {
            let deps = self.dependencies(MetricHandle(i));
            if deps.is_empty() {
                continue;
            }
            map.insert(
                metric.id.clone(),
                deps.iter().map(|h| metrics[h.0].id.clone()).collect(),
            );
        }
        map
    }

    /// Strongly connected components that form cycles, including
    /// single metrics that reference themselves.
    pub fn detect_cycles(&self) -> Vec<Vec<MetricHandle>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                if scc.len() == 1 {
                    self.graph.edges_connecting(scc[0], scc[0]).next().is_some()
                } else {
                    true
                }
            })
            .map(|scc| scc.into_iter().map(|idx| self.graph[idx]).collect())
            .collect()
    }

    pub fn validate(&self, metrics: &[ExtractedMetric]) -> SemanticResult<()> {
        let cycles = self.detect_cycles();
        match cycles.as_slice() {
            [] => Ok(()),
            [single] if single.len() == 1 => {
                Err(SemanticError::SelfReference(metrics[single[0].0].name.clone()))
            }
            _ => Err(DependencyCycleError {
                cycles: cycles
                    .iter()
                    .map(|cycle| cycle.iter().map(|h| metrics[h.0].name.clone()).collect())
                    .collect(),
            }
            .into()),
        }
    }

    /// Handles with every dependency before its dependents.
    pub fn dependency_order(&self) -> SemanticResult<Vec<MetricHandle>> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order.into_iter().rev().map(|idx| self.graph[idx]).collect()),
            Err(cycle) => {
                let handle = self.graph[cycle.node_id()];
                Err(DependencyCycleError {
                    cycles: vec![vec![handle.0.to_string()]],
                }
                .into())
            }
        }
    }

    /// Length of the longest dependency chain below each metric, indexed by
    /// handle. Metrics with no in-batch dependencies have depth 0.
    pub fn dependency_depths(&self) -> SemanticResult<Vec<usize>> {
        let mut depths = vec![0; self.nodes.len()];
        for handle in self.dependency_order()? {
            depths[handle.0] = self
                .dependencies(handle)
                .iter()
                .map(|dep| depths[dep.0] + 1)
                .max()
                .unwrap_or(0);
        }
        Ok(depths)
    }

    /// Fill missing business processes from, in order, the atomic metric,
    /// the first base metric, and the first dependency. Repeats until
    /// nothing changes; returns how many metrics were filled.
    pub fn propagate_business_process(&self, metrics: &mut [ExtractedMetric]) -> usize {
        let mut filled = 0;
        loop {
            let mut changed = false;
            for i in 0..metrics.len().min(self.nodes.len()) {
                if metrics[i].business_process.is_some() {
                    continue;
                }
                let tag_of = |id: &String| {
                    self.by_id
                        .get(id)
                        .and_then(|h| metrics[h.0].business_process.clone())
                };
                let inherited = metrics[i]
                    .atomic_metric_id
                    .as_ref()
                    .and_then(tag_of)
                    .or_else(|| metrics[i].base_metric_ids.first().and_then(tag_of))
                    .or_else(|| {
                        self.dependencies(MetricHandle(i))
                            .first()
                            .and_then(|h| metrics[h.0].business_process.clone())
                    });
                if let Some(process) = inherited {
                    metrics[i].business_process = Some(process);
                    filled += 1;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        filled
    }
}

// ============================================================================
// Linking
// ============================================================================

fn link_atomic_metrics(metrics: &mut [ExtractedMetric]) {
    for i in 0..metrics.len() {
        let metric = &metrics[i];
        if metric.category != MetricCategory::Derived || metric.atomic_metric_id.is_some() {
            continue;
        }
        let Some(field) = metric.aggregation_field.clone() else {
            continue;
        };
        let target = metrics
            .iter()
            .enumerate()
            .filter(|(j, m)| {
                *j != i
                    && m.category == MetricCategory::Atomic
                    && (m.name.eq_ignore_ascii_case(&field)
                        || m.sources.iter().any(|s| s.clean_column().eq_ignore_ascii_case(&field)))
            })
            .max_by_key(|(j, m)| (m.confidence != Confidence::Low, std::cmp::Reverse(*j)))
            .map(|(_, m)| m.id.clone());
        if let Some(id) = target {
            metrics[i].atomic_metric_id = Some(id);
        }
    }
}

fn link_base_metrics(metrics: &mut [ExtractedMetric]) {
    for i in 0..metrics.len() {
        let metric = &metrics[i];
        if metric.category != MetricCategory::Composite || !metric.base_metric_ids.is_empty() {
            continue;
        }
        let Some(formula) = metric.derived_formula.clone() else {
            continue;
        };
        let mut hits: Vec<(usize, String)> = metrics
            .iter()
            .enumerate()
            .filter(|(j, m)| *j != i && m.category == MetricCategory::Derived)
            .filter_map(|(_, m)| find_name(&formula, &m.name).map(|pos| (pos, m.id.clone())))
            .collect();
        hits.sort_by_key(|(pos, _)| *pos);
        metrics[i].base_metric_ids = hits.into_iter().map(|(_, id)| id).collect();
    }
}

// ============================================================================
// Business-process fallbacks
// ============================================================================

/// Fallback tiers for metrics propagation leaves untagged: the object type
/// mapped to the metric's source table, then a default object type.
#[derive(Debug, Clone, Default)]
pub struct BusinessProcessHints {
    by_table: HashMap<String, String>,
    default_object_type: Option<String>,
}

impl BusinessProcessHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &str, object_type: impl Into<String>) -> Self {
        self.by_table
            .entry(table.to_lowercase())
            .or_insert_with(|| object_type.into());
        self
    }

    /// Use the first non-system object type as the last resort.
    pub fn with_default_from(mut self, object_types: &[ObjectType]) -> Self {
        self.default_object_type = object_types
            .iter()
            .find(|t| !is_system_type(&t.name))
            .map(|t| t.name.clone());
        self
    }

    pub fn for_table(&self, table: &str) -> Option<&str> {
        self.by_table.get(&table.to_lowercase()).map(String::as_str)
    }
}

/// Assign business processes: propagate, then the table mapping of each
/// untagged metric, propagate again, then the default. Metrics that get
/// the default are logged; the rest stay untagged.
pub fn resolve_business_processes(
    metrics: &mut [ExtractedMetric],
    graph: &DependencyGraph,
    hints: &BusinessProcessHints,
) {
    graph.propagate_business_process(metrics);

    for metric in metrics.iter_mut().filter(|m| m.business_process.is_none()) {
        let mapped = metric
            .sources
            .iter()
            .find_map(|s| hints.for_table(&s.source_table));
        if let Some(object_type) = mapped {
            metric.business_process = Some(object_type.to_string());
        }
    }
    graph.propagate_business_process(metrics);

    for metric in metrics.iter_mut().filter(|m| m.business_process.is_none()) {
        match &hints.default_object_type {
            Some(default) => {
                warn!(
                    metric = %metric.name,
                    business_process = %default,
                    "business process unresolved, using default object type"
                );
                metric.business_process = Some(default.clone());
                metric
                    .notes
                    .push(format!("Business process defaulted to `{}`", default));
            }
            None => warn!(metric = %metric.name, "business process unresolved"),
        }
    }
}
