//! Metric classification.
//!
//! Turns column lineages into [`ExtractedMetric`]s in three passes:
//!
//! 1. Aggregates and null-handling/conditional transforms become ATOMIC or
//!    DERIVED metrics.
//! 2. Expressions over other metrics become COMPOSITE, innermost first, so a
//!    composite can build on another one.
//! 3. Root outputs not covered yet either name the single metric they pass
//!    through, are skipped as dimensions, or become LOW-confidence ATOMIC
//!    bare fields.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::LazyLock;

use inflector::Inflector;
use regex::Regex;
use tracing::debug;

use crate::lineage::{ColumnLineage, TransformType};
use crate::model::{Confidence, ExtractedMetric, MetricCategory};
use crate::planner::RelKind;

use super::aggregate::AggregateMetadata;

pub const DEFAULT_MIN_COMPOSITE_REFERENCES: usize = 2;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Classify with default settings.
pub fn classify(lineages: &[ColumnLineage], metadata: &AggregateMetadata) -> Vec<ExtractedMetric> {
    MetricClassifier::new().classify(lineages, metadata)
}

#[derive(Debug, Clone)]
pub struct MetricClassifier {
    min_composite_references: usize,
}

impl Default for MetricClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// A metric plus the lineage it came from.
struct Classified {
    lineage: usize,
    node_id: usize,
    /// Field name other expressions use to refer to this metric.
    key: String,
    metric: ExtractedMetric,
}

impl MetricClassifier {
    pub fn new() -> Self {
        Self {
            min_composite_references: DEFAULT_MIN_COMPOSITE_REFERENCES,
        }
    }

    /// Number of metric references that makes an expression COMPOSITE.
    pub fn with_min_composite_references(mut self, min: usize) -> Self {
        self.min_composite_references = min.max(1);
        self
    }

    pub fn classify(&self, lineages: &[ColumnLineage], metadata: &AggregateMetadata) -> Vec<ExtractedMetric> {
        let mut classified: Vec<Classified> = Vec::new();
        let mut deferred: Vec<usize> = Vec::new();

        // Pass 1: aggregates and value transforms.
        for (i, lineage) in lineages.iter().enumerate() {
            if !matches!(lineage.rel_kind, RelKind::Project | RelKind::Aggregate) {
                continue;
            }
            let value_transform = lineage.transform_type.is_value_transform();
            if lineage.aggregation_function.is_none() && !value_transform {
                continue;
            }
            // Plain arithmetic over several aggregate outputs may turn out
            // to be a formula over metrics.
            if lineage.rel_kind == RelKind::Project && !value_transform && lineage.input_fields.len() >= 2 {
                deferred.push(i);
                continue;
            }
            classified.push(self.measure(i, lineage, metadata));
        }

        // Pass 2: formulas over metrics, innermost first.
        let mut candidates: Vec<usize> = lineages
            .iter()
            .enumerate()
            .filter(|(_, l)| {
                l.rel_kind == RelKind::Project
                    && l.aggregation_function.is_none()
                    && l.transform_type == TransformType::Identity
                    && !l.input_fields.is_empty()
                    && !l.is_pass_through()
            })
            .map(|(i, _)| i)
            .chain(deferred.iter().copied())
            .collect();
        candidates.sort_by_key(|&i| (Reverse(lineages[i].node_id), lineages[i].output_index));

        for i in candidates {
            let lineage = &lineages[i];
            let base_ids = referenced_metrics(&lineage.expression, lineage.node_id, &classified);
            if base_ids.len() >= self.min_composite_references {
                classified.push(self.composite(i, lineage, base_ids));
            } else if deferred.contains(&i) {
                classified.push(self.measure(i, lineage, metadata));
            }
        }

        // Pass 3: root outputs.
        for (i, lineage) in lineages.iter().enumerate() {
            if !lineage.is_root
                || lineage.transform_type == TransformType::GroupKey
                || classified.iter().any(|c| c.lineage == i)
            {
                continue;
            }
            if lineage.is_pass_through() {
                let field = &lineage.input_fields[0];
                let matches: Vec<usize> = classified
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.node_id > lineage.node_id && c.key.eq_ignore_ascii_case(field))
                    .map(|(k, _)| k)
                    .collect();
                match matches.as_slice() {
                    [only] => {
                        rename(&mut classified[*only].metric, &lineage.output_name);
                        continue;
                    }
                    [] => {}
                    _ => continue,
                }
                if metadata.is_group_key(field) || metadata.is_group_key(&lineage.output_name) {
                    continue;
                }
            }
            classified.push(self.bare_field(i, lineage));
        }

        classified.sort_by_key(|c| c.lineage);
        let mut metrics: Vec<ExtractedMetric> = classified.into_iter().map(|c| c.metric).collect();
        dedupe_names(&mut metrics);
        for metric in &mut metrics {
            metric.display_name = metric.name.to_camel_case();
        }
        debug!(
            lineages = lineages.len(),
            metrics = metrics.len(),
            "classified metrics"
        );
        metrics
    }

    /// ATOMIC or DERIVED metric for an aggregate or transformed column.
    fn measure(&self, i: usize, lineage: &ColumnLineage, metadata: &AggregateMetadata) -> Classified {
        let function = lineage
            .aggregation_function
            .as_deref()
            .map(|f| normalize_aggregation(f, lineage.distinct));

        let (category, confidence) = if lineage.sources.is_empty() {
            (MetricCategory::Atomic, Confidence::Low)
        } else if function.is_some() && is_raw_aggregate(lineage) {
            (MetricCategory::Atomic, Confidence::High)
        } else if lineage.single_source().is_some() {
            (MetricCategory::Derived, Confidence::High)
        } else {
            (MetricCategory::Derived, Confidence::Medium)
        };

        let mut metric = ExtractedMetric::new(metric_name(lineage), category);
        metric.confidence = confidence;
        metric.source_sql = lineage.expression.clone();
        metric.aggregation_function = function;
        metric.aggregation_field = aggregation_field(lineage);
        metric.transform_type = Some(lineage.transform_type);
        metric.description = lineage.transform_type.description().to_string();
        metric.sources = lineage.sources.clone();
        if category == MetricCategory::Derived {
            metric.filter_conditions = lineage.filter_condition.clone();
        }
        if lineage.sources.is_empty() {
            metric
                .notes
                .push("No base-table origin found for this column".to_string());
        }
        apply_group_keys(&mut metric, lineage.node_id, metadata);

        Classified {
            lineage: i,
            node_id: lineage.node_id,
            key: lineage.output_name.clone(),
            metric,
        }
    }

    fn composite(&self, i: usize, lineage: &ColumnLineage, base_ids: Vec<String>) -> Classified {
        let mut metric = ExtractedMetric::new(metric_name(lineage), MetricCategory::Composite);
        metric.source_sql = lineage.expression.clone();
        metric.derived_formula = Some(lineage.expression.clone());
        metric.description = format!("Formula over {} metrics", base_ids.len());
        metric.base_metric_ids = base_ids;
        metric.sources = lineage.sources.clone();
        Classified {
            lineage: i,
            node_id: lineage.node_id,
            key: lineage.output_name.clone(),
            metric,
        }
    }

    /// Bare field reference: ATOMIC with LOW confidence.
    fn bare_field(&self, i: usize, lineage: &ColumnLineage) -> Classified {
        let mut metric = ExtractedMetric::new(metric_name(lineage), MetricCategory::Atomic);
        metric.confidence = Confidence::Low;
        metric.source_sql = lineage.expression.clone();
        metric.aggregation_field = lineage.sources.first().map(|s| s.clean_column().to_string());
        metric.transform_type = Some(lineage.transform_type);
        metric.description = lineage.transform_type.description().to_string();
        metric.sources = lineage.sources.clone();
        metric
            .notes
            .push("No aggregate found; check whether this column is a metric".to_string());
        Classified {
            lineage: i,
            node_id: lineage.node_id,
            key: lineage.output_name.clone(),
            metric,
        }
    }
}

/// One untransformed source whose chain holds at most the aggregate call.
fn is_raw_aggregate(lineage: &ColumnLineage) -> bool {
    if lineage.filter_condition.is_some() || lineage.filter_arg_index.is_some() {
        return false;
    }
    match lineage.single_source() {
        Some(source) => {
            source.transformations.len() <= 1
                && source.transformations.iter().all(|t| *t == lineage.expression)
        }
        None => false,
    }
}

fn aggregation_field(lineage: &ColumnLineage) -> Option<String> {
    let from_case = lineage
        .filter_condition
        .as_ref()
        .and_then(|c| c.get("_aggregation_field"))
        .and_then(|v| v.as_str())
        .filter(|field| !is_synthetic_name(field))
        .map(str::to_string);
    from_case.or_else(|| lineage.sources.first().map(|s| s.clean_column().to_string()))
}

/// Normalise an aggregate function name to SUM/COUNT/AVG/MAX/MIN, with
/// COUNT_DISTINCT for distinct counts. Anything unrecognised counts as SUM.
pub fn normalize_aggregation(function: &str, distinct: bool) -> String {
    let upper = function.to_uppercase();
    let name = if upper.contains("COUNT") {
        if distinct || upper.contains("DISTINCT") {
            "COUNT_DISTINCT"
        } else {
            "COUNT"
        }
    } else if upper.contains("SUM") {
        "SUM"
    } else if upper.contains("AVG") {
        "AVG"
    } else if upper.contains("MAX") {
        "MAX"
    } else if upper.contains("MIN") {
        "MIN"
    } else {
        "SUM"
    };
    name.to_string()
}

/// Generated field names like `SUM(amount)` or `EXPR$0`.
pub fn is_synthetic_name(name: &str) -> bool {
    !IDENTIFIER.is_match(name)
}

/// The alias, lower-cased, or the cleaned source column for synthetic
/// names.
fn metric_name(lineage: &ColumnLineage) -> String {
    let alias = lineage.output_name.trim();
    if !is_synthetic_name(alias) {
        return alias.to_lowercase();
    }
    match lineage.sources.first() {
        Some(source) => source.clean_column().to_lowercase(),
        None => format!("metric_{}", lineage.output_index),
    }
}

fn rename(metric: &mut ExtractedMetric, output_name: &str) {
    if is_synthetic_name(output_name) {
        return;
    }
    let name = output_name.to_lowercase();
    if metric.name != name {
        metric.notes.push(format!("Named after output column `{}`", output_name));
        metric.name = name;
    }
}

fn apply_group_keys(metric: &mut ExtractedMetric, node_id: usize, metadata: &AggregateMetadata) {
    for key in metadata.group_keys_for(node_id) {
        match key.time_granularity {
            Some(granularity) => {
                if metric.time_dimension.is_none() {
                    metric.time_dimension = Some(key.column.clone());
                    metric.time_granularity = Some(granularity.to_string());
                }
            }
            None => {
                if !metric.dimensions.contains(&key.column) {
                    metric.dimensions.push(key.column.clone());
                }
            }
        }
    }
}

/// Ids of metrics below `node_id` whose field name occurs in `expression`,
/// in order of first occurrence.
fn referenced_metrics(expression: &str, node_id: usize, classified: &[Classified]) -> Vec<String> {
    let mut hits: Vec<(usize, &str)> = classified
        .iter()
        .filter(|c| c.node_id > node_id)
        .filter_map(|c| find_name(expression, &c.key).map(|pos| (pos, c.metric.id.as_str())))
        .collect();
    hits.sort_by_key(|(pos, _)| *pos);
    let mut ids: Vec<String> = Vec::new();
    for (_, id) in hits {
        if !ids.iter().any(|i| i == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Byte offset of the first occurrence of `name` in `expression` that is
/// not part of a longer identifier. Case-insensitive.
pub fn find_name(expression: &str, name: &str) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    let haystack = expression.to_ascii_lowercase();
    let needle = name.to_ascii_lowercase();
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';

    let mut start = 0;
    while let Some(offset) = haystack[start..].find(&needle) {
        let pos = start + offset;
        let end = pos + needle.len();
        let before = haystack[..pos].chars().next_back();
        let after = haystack[end..].chars().next();
        if !before.is_some_and(is_ident) && !after.is_some_and(is_ident) {
            return Some(pos);
        }
        start = pos + needle.chars().next().map_or(1, char::len_utf8);
    }
    None
}

fn dedupe_names(metrics: &mut [ExtractedMetric]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for metric in metrics.iter_mut() {
        let count = seen.entry(metric.name.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            metric.name = format!("{}_{}", metric.name, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_name_respects_word_boundaries() {
        assert_eq!(find_name("x + y", "x"), Some(0));
        assert_eq!(find_name("max_x + y", "x"), None);
        assert_eq!(find_name("Total / COUNT(total_2)", "total"), Some(0));
        assert_eq!(find_name("a + SUM(amount)", "SUM(amount)"), Some(4));
    }

    #[test]
    fn test_normalize_aggregation() {
        assert_eq!(normalize_aggregation("count", true), "COUNT_DISTINCT");
        assert_eq!(normalize_aggregation("COUNT", false), "COUNT");
        assert_eq!(normalize_aggregation("AVG", false), "AVG");
        assert_eq!(normalize_aggregation("STDDEV", false), "SUM");
    }

    #[test]
    fn test_synthetic_names() {
        assert!(is_synthetic_name("SUM(amount)"));
        assert!(is_synthetic_name("EXPR$0"));
        assert!(!is_synthetic_name("total_amount"));
    }

    #[test]
    fn test_dedupe_names() {
        let mut metrics = vec![
            ExtractedMetric::new("t", MetricCategory::Atomic),
            ExtractedMetric::new("t", MetricCategory::Atomic),
        ];
        dedupe_names(&mut metrics);
        assert_eq!(metrics[0].name, "t");
        assert_eq!(metrics[1].name, "t_2");
    }
}
