//! Request and result types of the SQL paste workflows.

use serde::{Deserialize, Serialize};

use crate::lineage::{ColumnLineage, JoinPath};
use crate::llm::SemanticAlignment;
use crate::mapping::MappingResult;
use crate::model::{Confidence, ExtractedMetric};
use crate::validation::ValidationResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    #[serde(alias = "enableLLM", alias = "enableLlm")]
    pub enable_llm: bool,
    #[serde(alias = "workspaceId")]
    pub workspace_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseOutcome {
    pub original_sql: String,
    /// Rendered plan tree.
    pub plan: String,
    pub lineages: Vec<ColumnLineage>,
    pub join_paths: Vec<JoinPath>,
    pub extracted_metrics: Vec<ExtractedMetric>,
    pub validations: Vec<ValidationResult>,
    pub mapping_result: MappingResult,
    pub semantic_result: SemanticAlignment,
    pub suggestions: Vec<String>,
    /// Non-fatal problems met along the way.
    pub errors: Vec<String>,
}

impl ParseOutcome {
    pub fn all_valid(&self) -> bool {
        self.validations.iter().all(|v| v.errors.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationOnlyResult {
    pub original_sql: String,
    pub extracted_metrics: Vec<ExtractedMetric>,
    pub validations: Vec<ValidationResult>,
    pub suggestions: Vec<String>,
    pub all_valid: bool,
}

impl From<ParseOutcome> for ValidationOnlyResult {
    fn from(outcome: ParseOutcome) -> Self {
        let all_valid = outcome.all_valid();
        Self {
            original_sql: outcome.original_sql,
            extracted_metrics: outcome.extracted_metrics,
            validations: outcome.validations,
            suggestions: outcome.suggestions,
            all_valid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRequest {
    pub metrics: Vec<ExtractedMetric>,
    /// When false, metrics whose name matches one of `existing_ids` update
    /// that metric instead of creating a new one.
    #[serde(default = "default_create_new", alias = "createNew")]
    pub create_new: bool,
    #[serde(default, alias = "existingIds", alias = "existingMetricIds")]
    pub existing_ids: Vec<String>,
    #[serde(default, alias = "workspaceIds")]
    pub workspace_ids: Vec<String>,
}

fn default_create_new() -> bool {
    true
}

impl SaveRequest {
    pub fn new(metrics: Vec<ExtractedMetric>) -> Self {
        Self {
            metrics,
            create_new: true,
            existing_ids: Vec::new(),
            workspace_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedMetric {
    pub metric_name: String,
    pub saved_id: String,
    pub status: SaveStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveError {
    pub metric_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SaveResult {
    pub success: bool,
    pub saved_ids: Vec<String>,
    pub saved_metrics: Vec<SavedMetric>,
    pub errors: Vec<SaveError>,
}

/// Review hints for a parsed batch.
pub fn suggestions(metrics: &[ExtractedMetric], validations: &[ValidationResult]) -> Vec<String> {
    let mut suggestions = Vec::new();

    if metrics.iter().any(|m| m.confidence == Confidence::Low) {
        suggestions.push(
            "Some fields could not be mapped automatically; check the table mappings".to_string(),
        );
    }

    let invalid = validations.iter().filter(|v| !v.errors.is_empty()).count();
    if invalid > 0 {
        suggestions.push(format!(
            "{} metric(s) have validation errors; fix them before saving",
            invalid
        ));
    }

    let incomplete = metrics
        .iter()
        .filter(|m| m.name.is_empty() || m.business_process.is_none())
        .count();
    if incomplete > 0 {
        suggestions.push(format!(
            "{} metric(s) are incomplete; add a name and a business process",
            incomplete
        ));
    }

    if suggestions.is_empty() {
        suggestions.push("All metrics are valid and ready to save".to_string());
    }
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricCategory;

    #[test]
    fn test_clean_batch_is_ready() {
        let mut metric = ExtractedMetric::new("total", MetricCategory::Atomic);
        metric.business_process = Some("Order".to_string());
        let hints = suggestions(&[metric], &[ValidationResult::new("total")]);
        assert_eq!(hints, vec!["All metrics are valid and ready to save".to_string()]);
    }

    #[test]
    fn test_counts_problems() {
        let mut low = ExtractedMetric::new("a", MetricCategory::Atomic);
        low.confidence = Confidence::Low;
        let other = ExtractedMetric::new("b", MetricCategory::Atomic);
        let mut broken = ValidationResult::new("a");
        broken.error(crate::validation::ValidationCode::MissingBusinessProcess, "missing");

        let hints = suggestions(&[low, other], &[broken, ValidationResult::new("b")]);
        assert_eq!(hints.len(), 3);
        assert!(hints[1].starts_with("1 metric(s) have validation errors"));
        assert!(hints[2].starts_with("2 metric(s) are incomplete"));
    }

    #[test]
    fn test_save_request_accepts_camel_case() {
        let request: SaveRequest = serde_json::from_str(
            r#"{"metrics": [], "createNew": false, "existingIds": ["m1"], "workspaceIds": ["w"]}"#,
        )
        .unwrap();
        assert!(!request.create_new);
        assert_eq!(request.existing_ids, vec!["m1".to_string()]);
        assert_eq!(request.workspace_ids, vec!["w".to_string()]);
    }
}
