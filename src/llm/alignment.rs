//! Semantic alignment of extracted metrics with business vocabulary.
//!
//! The model is asked for business meanings, names and units of the
//! measures and dimensions of a query. Its answer only enriches the
//! descriptive fields of already classified metrics.

use std::fmt::Write;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::LlmClient;
use super::error::{LlmError, LlmResult};
use crate::mapping::MappingResult;
use crate::model::{ExtractedMetric, MetricCategory, ObjectType};

/// Confidence given to heuristic alignments.
const HEURISTIC_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticMetric {
    pub sql_field: String,
    pub business_meaning: Option<String>,
    pub recommended_name: Option<String>,
    pub aggregation_type: Option<String>,
    pub suggested_metric_type: Option<String>,
    pub unit: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticDimension {
    pub sql_field: String,
    pub business_meaning: Option<String>,
    pub is_time_dimension: bool,
    pub is_enum: bool,
    pub enum_values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeAnalysis {
    pub time_field: Option<String>,
    pub time_granularity: Option<String>,
    pub time_range: Option<TimeRange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentSource {
    Llm,
    #[default]
    Heuristic,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticAlignment {
    pub metrics: Vec<SemanticMetric>,
    pub dimensions: Vec<SemanticDimension>,
    pub time_analysis: Option<TimeAnalysis>,
    #[serde(skip_deserializing)]
    pub source: AlignmentSource,
}

// ============================================================================
// Prompts
// ============================================================================

pub fn system_prompt(object_types: &[ObjectType], mapping: &MappingResult) -> String {
    let mut prompt = String::from(
        "You are a data metrics expert. Align the SQL query with the business model below \
         and answer with JSON only.\n\n## Object types\n\n",
    );
    for object_type in object_types.iter().filter(|t| !t.is_system()) {
        let _ = write!(prompt, "- {}", object_type.name);
        if let Some(description) = &object_type.description {
            let _ = write!(prompt, ": {}", description);
        }
        prompt.push('\n');
        for property in &object_type.properties {
            let _ = writeln!(prompt, "  - {} ({})", property.name, property.data_type);
        }
    }

    prompt.push_str("\n## Existing mappings\n\n");
    if mapping.table_to_object.is_empty() {
        prompt.push_str("(none)\n");
    }
    for (table, object_type) in &mapping.table_to_object {
        let _ = writeln!(prompt, "- table {} -> {}", table, object_type);
    }
    for field in &mapping.field_mappings {
        let _ = writeln!(
            prompt,
            "- {}.{} -> {}.{}",
            field.sql_table, field.sql_field, field.object_type, field.object_property
        );
    }

    prompt.push_str(
        "\n## Output format\n\n\
         {\"semantic_analysis\": {\
         \"metrics\": [{\"sql_field\", \"business_meaning\", \"recommended_name\", \
         \"aggregation_type\", \"suggested_metric_type\", \"unit\", \"confidence\"}], \
         \"dimensions\": [{\"sql_field\", \"business_meaning\", \"is_time_dimension\", \
         \"is_enum\", \"enum_values\"}], \
         \"time_analysis\": {\"time_field\", \"time_granularity\", \"time_range\": {\"start\", \"end\"}}}}\n",
    );
    prompt
}

pub fn user_prompt(sql: &str, metrics: &[ExtractedMetric]) -> String {
    let mut prompt = format!("## SQL\n\n{}\n\n## Extracted measures\n\n", sql.trim());
    for metric in metrics {
        let _ = writeln!(
            prompt,
            "- {} [{}]: {}",
            metric.name, metric.category, metric.source_sql
        );
    }
    let mut dimensions: Vec<&str> = Vec::new();
    for dimension in metrics.iter().flat_map(|m| &m.dimensions) {
        if !dimensions.contains(&dimension.as_str()) {
            dimensions.push(dimension);
        }
    }
    if !dimensions.is_empty() {
        let _ = writeln!(prompt, "\n## Group by\n\n{}", dimensions.join(", "));
    }
    prompt
}

// ============================================================================
// Response parsing
// ============================================================================

/// Parse a model answer. The JSON may be fenced in a code block and may be
/// wrapped in a `semantic_analysis` object.
pub fn parse_response(text: &str) -> LlmResult<SemanticAlignment> {
    let json = strip_code_fence(text);
    let mut value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    if let Some(inner) = value.get_mut("semantic_analysis") {
        value = inner.take();
    }
    if !value.is_object() {
        return Err(LlmError::InvalidResponse("expected a JSON object".to_string()));
    }
    let mut alignment: SemanticAlignment =
        serde_json::from_value(value).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    alignment.source = AlignmentSource::Llm;
    Ok(alignment)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.strip_prefix("json").unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}

// ============================================================================
// Alignment
// ============================================================================

/// Alignment derived from the classifier output alone.
pub fn heuristic_alignment(metrics: &[ExtractedMetric]) -> SemanticAlignment {
    let mut alignment = SemanticAlignment::default();
    for metric in metrics {
        alignment.metrics.push(SemanticMetric {
            sql_field: metric.source_sql.clone(),
            business_meaning: metric.aggregation_field.clone(),
            recommended_name: Some(metric.name.clone()),
            aggregation_type: metric.aggregation_function.clone(),
            suggested_metric_type: Some(metric.category.to_string()),
            unit: metric.unit.clone(),
            confidence: HEURISTIC_CONFIDENCE,
        });
        for dimension in &metric.dimensions {
            if !alignment.dimensions.iter().any(|d| &d.sql_field == dimension) {
                alignment.dimensions.push(SemanticDimension {
                    sql_field: dimension.clone(),
                    ..Default::default()
                });
            }
        }
        if alignment.time_analysis.is_none() && metric.time_dimension.is_some() {
            alignment.time_analysis = Some(TimeAnalysis {
                time_field: metric.time_dimension.clone(),
                time_granularity: metric.time_granularity.clone(),
                time_range: None,
            });
        }
    }
    alignment
}

/// Ask `client` for an alignment of `metrics`.
pub async fn request_alignment(
    client: &dyn LlmClient,
    sql: &str,
    metrics: &[ExtractedMetric],
    object_types: &[ObjectType],
    mapping: &MappingResult,
) -> LlmResult<SemanticAlignment> {
    let system = system_prompt(object_types, mapping);
    let user = user_prompt(sql, metrics);
    let answer = client.chat(&system, &user).await?;
    let alignment = parse_response(&answer)?;
    debug!(
        metrics = alignment.metrics.len(),
        dimensions = alignment.dimensions.len(),
        "parsed semantic alignment"
    );
    Ok(alignment)
}

/// Copy display names, descriptions and units from an LLM alignment onto
/// the matching metrics. Returns how many metrics were enriched.
pub fn apply_alignment(metrics: &mut [ExtractedMetric], alignment: &SemanticAlignment) -> usize {
    if alignment.source != AlignmentSource::Llm {
        return 0;
    }
    let mut enriched = 0;
    for metric in metrics.iter_mut() {
        let Some(semantic) = alignment.metrics.iter().find(|s| refers_to(s, metric)) else {
            continue;
        };
        if let Some(name) = semantic.recommended_name.as_ref().filter(|n| !n.is_empty()) {
            metric.display_name = name.clone();
        }
        if let Some(meaning) = semantic.business_meaning.as_ref().filter(|m| !m.is_empty()) {
            metric.description = meaning.clone();
        }
        if metric.unit.is_none() {
            metric.unit = semantic.unit.clone();
        }
        if let Some(suggested) = semantic
            .suggested_metric_type
            .as_deref()
            .and_then(MetricCategory::from_str)
            .filter(|c| *c != metric.category)
        {
            metric.notes.push(format!(
                "Semantic analysis suggests {} instead of {}",
                suggested, metric.category
            ));
        }
        enriched += 1;
    }
    enriched
}

fn refers_to(semantic: &SemanticMetric, metric: &ExtractedMetric) -> bool {
    let squash = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase()
    };
    let field = squash(&semantic.sql_field);
    !field.is_empty() && (field == squash(&metric.source_sql) || field == squash(&metric.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_wrapped_response() {
        let answer = "```json\n{\"semantic_analysis\": {\"metrics\": [{\"sql_field\": \"SUM(amount)\", \
                      \"recommended_name\": \"Revenue\", \"unit\": \"USD\", \"confidence\": 0.9}]}}\n```";
        let alignment = parse_response(answer).unwrap();
        assert_eq!(alignment.source, AlignmentSource::Llm);
        assert_eq!(alignment.metrics.len(), 1);
        assert_eq!(alignment.metrics[0].recommended_name.as_deref(), Some("Revenue"));
        assert!(alignment.dimensions.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(parse_response("[1, 2]"), Err(LlmError::InvalidResponse(_))));
        assert!(matches!(parse_response("not json"), Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn test_apply_keeps_category() {
        let mut metric = ExtractedMetric::new("total", MetricCategory::Atomic);
        metric.source_sql = "SUM(amount)".to_string();
        let alignment = SemanticAlignment {
            metrics: vec![SemanticMetric {
                sql_field: "sum( amount )".to_string(),
                recommended_name: Some("Revenue".to_string()),
                suggested_metric_type: Some("DERIVED".to_string()),
                unit: Some("USD".to_string()),
                ..Default::default()
            }],
            source: AlignmentSource::Llm,
            ..Default::default()
        };

        let mut metrics = vec![metric];
        assert_eq!(apply_alignment(&mut metrics, &alignment), 1);
        assert_eq!(metrics[0].category, MetricCategory::Atomic);
        assert_eq!(metrics[0].display_name, "Revenue");
        assert_eq!(metrics[0].unit.as_deref(), Some("USD"));
        assert_eq!(metrics[0].notes.len(), 1);
    }
}
