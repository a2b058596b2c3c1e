//! Alignment of SQL field references with ontology properties.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use super::strategy::{match_column, MatchStrategy};
use crate::lineage::{clean_column_name, JoinPath, LineageReport, TransformType};
use crate::metadata::OntologyStore;
use crate::model::{Confidence, ObjectType, TableMapping};
use crate::planner::{origins_of, JoinKind, RelOperator};
use crate::semantic::BusinessProcessHints;

static TIME_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:DATE|YEAR|MONTH|DAY|HOUR|MINUTE|SECOND|WEEK|QUARTER)\s*\(\s*([^()]+?)\s*\)\s*$")
        .unwrap()
});

/// Strip a leading time-function wrapper: `DATE(o.created_at)` →
/// `o.created_at`. Other expressions are returned unchanged.
pub fn strip_time_function(field: &str) -> &str {
    match TIME_FUNCTION.captures(field).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => field.trim(),
    }
}

// ============================================================================
// Field references
// ============================================================================

/// Query clause a field reference comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldRole {
    Select,
    Where,
    GroupBy,
}

/// A base-table column referenced by the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldReference {
    pub role: FieldRole,
    pub table: Option<String>,
    pub field: String,
    /// Expression the field was read from.
    pub expression: String,
    pub aggregation_function: Option<String>,
}

impl FieldReference {
    pub fn new(role: FieldRole, table: Option<&str>, field: &str, expression: &str) -> Self {
        Self {
            role,
            table: table.map(str::to_string),
            field: field.to_string(),
            expression: expression.to_string(),
            aggregation_function: None,
        }
    }

    pub fn is_aggregated(&self) -> bool {
        self.aggregation_function.is_some()
    }
}

/// Base-table fields referenced by the select list, the WHERE predicates
/// and the GROUP BY keys of `plan`, deduplicated per clause.
pub fn collect_field_references(plan: &RelOperator, report: &LineageReport) -> Vec<FieldReference> {
    let mut references: Vec<FieldReference> = Vec::new();
    let mut push = |reference: FieldReference| {
        let duplicate = references.iter().any(|r| {
            r.role == reference.role
                && r.field.eq_ignore_ascii_case(&reference.field)
                && r.table.as_deref().map(str::to_lowercase)
                    == reference.table.as_deref().map(str::to_lowercase)
        });
        if !duplicate {
            references.push(reference);
        }
    };

    for lineage in report.root_lineages() {
        for source in &lineage.sources {
            let mut reference = FieldReference::new(
                FieldRole::Select,
                Some(&source.source_table),
                source.clean_column(),
                &lineage.expression,
            );
            reference.aggregation_function = lineage.aggregation_function.clone();
            push(reference);
        }
    }

    for node in plan.preorder() {
        let RelOperator::Filter(filter) = node else {
            continue;
        };
        // HAVING predicates read aggregate outputs, not table columns.
        if matches!(filter.input.as_ref(), RelOperator::Aggregate(_)) {
            continue;
        }
        let expression = filter.condition.to_string();
        for index in filter.condition.input_refs() {
            for origin in origins_of(&filter.input, index).unwrap_or_default() {
                push(FieldReference::new(
                    FieldRole::Where,
                    Some(&origin.table),
                    clean_column_name(&origin.column),
                    &expression,
                ));
            }
        }
    }

    for lineage in report
        .lineages
        .iter()
        .filter(|l| l.transform_type == TransformType::GroupKey)
    {
        let stripped = clean_column_name(strip_time_function(&lineage.expression));
        let source = lineage.sources.first();
        let field = match source {
            Some(source) if !is_plain_identifier(stripped) => source.clean_column(),
            _ => stripped,
        };
        push(FieldReference::new(
            FieldRole::GroupBy,
            source.map(|s| s.source_table.as_str()),
            field,
            &lineage.expression,
        ));
    }

    references
}

fn is_plain_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMapping {
    pub role: FieldRole,
    pub sql_field: String,
    pub sql_table: String,
    pub object_type: String,
    pub object_property: String,
    /// Column name as written in the mapping.
    pub column_name: String,
    pub confidence: Confidence,
    pub strategy: MatchStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmappedField {
    pub role: FieldRole,
    pub sql_expression: String,
    pub sql_table: Option<String>,
    pub field: String,
    pub aggregated: bool,
    pub confidence: Confidence,
    /// Object type mapped to the field's table, if the table has a mapping.
    pub suggested_object_type: Option<String>,
}

/// Join between two tables with the object types they map to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectJoinPath {
    pub join_kind: JoinKind,
    pub left_table: String,
    pub left_column: String,
    pub left_object_type: Option<String>,
    pub right_table: String,
    pub right_column: String,
    pub right_object_type: Option<String>,
    pub condition: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappingResult {
    pub field_mappings: Vec<FieldMapping>,
    pub unmapped_fields: Vec<UnmappedField>,
    /// Object types touched by the query, first-seen order.
    pub involved_object_types: Vec<String>,
    pub table_to_object: BTreeMap<String, String>,
    pub join_paths: Vec<ObjectJoinPath>,
}

impl MappingResult {
    pub fn object_type_for_table(&self, table: &str) -> Option<&str> {
        self.table_to_object
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(table))
            .map(|(_, o)| o.as_str())
    }

    /// Fallback tiers for business-process resolution: table mappings, then
    /// the first non-system object type.
    pub fn business_process_hints(&self, object_types: &[ObjectType]) -> BusinessProcessHints {
        self.table_to_object
            .iter()
            .fold(BusinessProcessHints::new(), |hints, (table, object_type)| {
                hints.with_table(table, object_type.clone())
            })
            .with_default_from(object_types)
    }
}

// ============================================================================
// Table mappings
// ============================================================================

/// Table mappings keyed by lower-cased table name. The first mapping seen
/// for a table wins.
#[derive(Debug, Clone, Default)]
pub struct TableMappings {
    by_table: HashMap<String, TableMapping>,
}

impl TableMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mapping: TableMapping) {
        self.by_table
            .entry(mapping.table_name.to_lowercase())
            .or_insert(mapping);
    }

    pub fn get(&self, table: &str) -> Option<&TableMapping> {
        self.by_table.get(&table.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.by_table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_table.is_empty()
    }

    /// Fetch mappings for `tables`. A failed lookup leaves that table
    /// unmapped and is logged.
    pub async fn fetch(store: &dyn OntologyStore, tables: &[String]) -> Self {
        let mut mappings = Self::new();
        let futures: Vec<_> = tables
            .iter()
            .map(|table| store.get_mappings_by_table(table))
            .collect();
        let results = futures::future::join_all(futures).await;
        for (table, result) in tables.iter().zip(results) {
            match result {
                Ok(found) => found.into_iter().for_each(|m| mappings.insert(m)),
                Err(error) => warn!(%table, %error, "failed to load table mappings"),
            }
        }
        mappings
    }
}

impl FromIterator<TableMapping> for TableMappings {
    fn from_iter<I: IntoIterator<Item = TableMapping>>(iter: I) -> Self {
        let mut mappings = Self::new();
        for mapping in iter {
            mappings.insert(mapping);
        }
        mappings
    }
}

// ============================================================================
// Resolver
// ============================================================================

#[derive(Debug, Clone)]
pub struct MappingResolver {
    strategies: Vec<MatchStrategy>,
}

impl Default for MappingResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingResolver {
    pub fn new() -> Self {
        Self {
            strategies: MatchStrategy::DEFAULT_ORDER.to_vec(),
        }
    }

    pub fn with_strategies(strategies: Vec<MatchStrategy>) -> Self {
        Self { strategies }
    }

    pub fn strategies(&self) -> &[MatchStrategy] {
        &self.strategies
    }

    /// Map one reference, or explain why it stays unmapped.
    pub fn resolve_field(
        &self,
        reference: &FieldReference,
        mappings: &TableMappings,
    ) -> Result<FieldMapping, UnmappedField> {
        let unmapped = |suggested: Option<&str>| UnmappedField {
            role: reference.role,
            sql_expression: reference.expression.clone(),
            sql_table: reference.table.clone(),
            field: reference.field.clone(),
            aggregated: reference.is_aggregated(),
            confidence: Confidence::Low,
            suggested_object_type: suggested.map(str::to_string),
        };

        let Some(table) = reference.table.as_deref() else {
            return Err(unmapped(None));
        };
        let Some(mapping) = mappings.get(table) else {
            return Err(unmapped(None));
        };
        match match_column(&self.strategies, &reference.field, &mapping.column_property_map) {
            Some(hit) => Ok(FieldMapping {
                role: reference.role,
                sql_field: reference.field.clone(),
                sql_table: table.to_string(),
                object_type: mapping.object_type.clone(),
                object_property: hit.property.to_string(),
                column_name: hit.column.to_string(),
                confidence: hit.strategy.confidence(),
                strategy: hit.strategy,
            }),
            None => Err(unmapped(Some(&mapping.object_type))),
        }
    }

    pub fn align(
        &self,
        references: &[FieldReference],
        mappings: &TableMappings,
        joins: &[JoinPath],
    ) -> MappingResult {
        let mut result = MappingResult::default();
        let note_table = |result: &mut MappingResult, table: &str| {
            if let Some(mapping) = mappings.get(table) {
                result
                    .table_to_object
                    .entry(table.to_string())
                    .or_insert_with(|| mapping.object_type.clone());
                if !result.involved_object_types.contains(&mapping.object_type) {
                    result.involved_object_types.push(mapping.object_type.clone());
                }
            }
        };

        for reference in references {
            if let Some(table) = &reference.table {
                note_table(&mut result, table);
            }
            match self.resolve_field(reference, mappings) {
                Ok(mapping) => result.field_mappings.push(mapping),
                Err(unmapped) => result.unmapped_fields.push(unmapped),
            }
        }

        for join in joins {
            note_table(&mut result, &join.left_table);
            note_table(&mut result, &join.right_table);
            result.join_paths.push(ObjectJoinPath {
                join_kind: join.join_kind,
                left_table: join.left_table.clone(),
                left_column: join.left_column.clone(),
                left_object_type: mappings.get(&join.left_table).map(|m| m.object_type.clone()),
                right_table: join.right_table.clone(),
                right_column: join.right_column.clone(),
                right_object_type: mappings.get(&join.right_table).map(|m| m.object_type.clone()),
                condition: join.condition.clone(),
            });
        }

        debug!(
            mapped = result.field_mappings.len(),
            unmapped = result.unmapped_fields.len(),
            object_types = result.involved_object_types.len(),
            "aligned fields with ontology"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_time_function() {
        assert_eq!(strip_time_function("DATE(o.created_at)"), "o.created_at");
        assert_eq!(strip_time_function("year( order_date )"), "order_date");
        assert_eq!(strip_time_function("UPPER(region)"), "UPPER(region)");
        assert_eq!(strip_time_function(" region "), "region");
    }

    #[test]
    fn test_unmapped_table_has_no_suggestion() {
        let resolver = MappingResolver::new();
        let reference = FieldReference::new(FieldRole::Select, Some("orders"), "amount", "amount");
        let unmapped = resolver
            .resolve_field(&reference, &TableMappings::new())
            .unwrap_err();
        assert_eq!(unmapped.confidence, Confidence::Low);
        assert_eq!(unmapped.suggested_object_type, None);
    }
}
