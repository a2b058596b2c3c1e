//! SQL paste workflows: parse a query into metrics, validate them, save them.
//!
//! ```text
//! SQL ─▶ plan ─▶ lineage ─▶ classify ─▶ link + propagate ─▶ validate
//!                   │                        ▲
//!                   └──▶ ontology mapping ───┘
//! ```
//!
//! Only a malformed query fails a parse. Every other problem (ontology
//! lookups, LLM calls, dependency cycles) is logged and reported on the
//! outcome.

pub mod outcome;

pub use outcome::{
    suggestions, ParseOptions, ParseOutcome, SaveError, SaveRequest, SaveResult, SaveStatus,
    SavedMetric, ValidationOnlyResult,
};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Settings, StoreSettings};
use crate::lineage::LineageExtractor;
use crate::llm::{apply_alignment, heuristic_alignment, request_alignment, LlmClient};
use crate::mapping::{collect_field_references, MappingResolver, TableMappings};
use crate::metadata::{MetricStore, OntologyStore, StoreError, StoreResult};
use crate::model::{AtomicMetric, ExtractedMetric, MetricCategory, MetricDefinition, ObjectType};
use crate::planner::{build_plan, PlanError};
use crate::semantic::{
    resolve_business_processes, AggregateMetadata, DependencyGraph, MetricClassifier,
};
use crate::validation::{CatalogSnapshot, MetricValidator};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("SQL parse failed: {0}")]
    Parse(#[from] PlanError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Atomic metric '{metric}' is missing required field '{field}'")]
    MissingField { metric: String, field: &'static str },

    #[error("Metric '{0}' cannot be stored as a metric definition")]
    NotADefinition(String),
}

impl ServiceError {
    /// Errors caused by the request itself rather than by a collaborator.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::MissingField { .. } | Self::NotADefinition(_))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Retry policy for retriable store errors: exponential backoff starting
/// at `backoff`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&StoreSettings::default())
    }
}

impl From<&StoreSettings> for RetryPolicy {
    fn from(settings: &StoreSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            backoff: settings.retry_backoff(),
        }
    }
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Err(error) if error.is_retriable() && attempt < self.max_retries => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!(%operation, %error, attempt, ?delay, "retrying store call");
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

pub struct SqlPasteService {
    ontology: Arc<dyn OntologyStore>,
    metrics: Arc<dyn MetricStore>,
    llm: Option<Arc<dyn LlmClient>>,
    classifier: MetricClassifier,
    resolver: MappingResolver,
    retry: RetryPolicy,
}

impl SqlPasteService {
    pub fn new(ontology: Arc<dyn OntologyStore>, metrics: Arc<dyn MetricStore>) -> Self {
        Self {
            ontology,
            metrics,
            llm: None,
            classifier: MetricClassifier::new(),
            resolver: MappingResolver::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Apply the classification, mapping and retry sections of `settings`.
    pub fn configured(mut self, settings: &Settings) -> Result<Self, crate::config::SettingsError> {
        self.classifier = MetricClassifier::new()
            .with_min_composite_references(settings.classification.min_composite_references);
        self.resolver = MappingResolver::with_strategies(settings.mapping.match_strategies()?);
        self.retry = RetryPolicy::from(&settings.store);
        Ok(self)
    }

    pub fn with_llm(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(client);
        self
    }

    pub fn with_classifier(mut self, classifier: MetricClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_resolver(mut self, resolver: MappingResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // ========================================================================
    // Parse
    // ========================================================================

    pub async fn parse(&self, sql: &str, options: &ParseOptions) -> ServiceResult<ParseOutcome> {
        info!(sql = %preview(sql), "parsing SQL");
        let plan = build_plan(sql)?;
        let mut errors = Vec::new();

        let report = LineageExtractor::new().extract(&plan);
        errors.extend(report.warnings.iter().map(|w| w.to_string()));

        let metadata = AggregateMetadata::from_plan(&plan);
        let mut metrics = self.classifier.classify(&report.lineages, &metadata);
        debug!(
            lineages = report.lineages.len(),
            metrics = metrics.len(),
            "classified lineages"
        );

        let object_types = match self
            .retry
            .run("list_object_types", || self.ontology.list_object_types())
            .await
        {
            Ok(types) => types,
            Err(error) => {
                warn!(%error, "failed to load object types");
                errors.push(format!("Ontology unavailable: {}", error));
                Vec::new()
            }
        };

        let references = collect_field_references(&plan, &report);
        let mappings = TableMappings::fetch(self.ontology.as_ref(), &plan.scanned_tables()).await;
        let mapping_result = self.resolver.align(&references, &mappings, &report.join_paths);

        let graph = DependencyGraph::build(&mut metrics);
        if let Err(error) = graph.validate(&metrics) {
            warn!(%error, "metric dependencies are inconsistent");
            errors.push(error.to_string());
        }
        let hints = mapping_result.business_process_hints(&object_types);
        resolve_business_processes(&mut metrics, &graph, &hints);

        let mut llm_suggestions = Vec::new();
        let semantic_result = if options.enable_llm {
            match &self.llm {
                Some(client) => {
                    match request_alignment(
                        client.as_ref(),
                        sql,
                        &metrics,
                        &object_types,
                        &mapping_result,
                    )
                    .await
                    {
                        Ok(alignment) => {
                            let enriched = apply_alignment(&mut metrics, &alignment);
                            debug!(enriched, "applied semantic alignment");
                            alignment
                        }
                        Err(error) => {
                            warn!(%error, "LLM semantic analysis failed");
                            llm_suggestions.push(
                                "LLM semantic analysis failed; showing heuristic results".to_string(),
                            );
                            heuristic_alignment(&metrics)
                        }
                    }
                }
                None => {
                    llm_suggestions.push(
                        "LLM is not configured; showing heuristic results".to_string(),
                    );
                    heuristic_alignment(&metrics)
                }
            }
        } else {
            heuristic_alignment(&metrics)
        };

        let validations = self.validator(&object_types).await.validate_batch(&metrics);
        let mut suggestions = llm_suggestions;
        suggestions.extend(outcome::suggestions(&metrics, &validations));

        info!(
            metrics = metrics.len(),
            invalid = validations.iter().filter(|v| !v.is_valid).count(),
            mapped = mapping_result.field_mappings.len(),
            unmapped = mapping_result.unmapped_fields.len(),
            "SQL parsed"
        );

        Ok(ParseOutcome {
            original_sql: sql.to_string(),
            plan: plan.explain(),
            lineages: report.lineages,
            join_paths: report.join_paths,
            extracted_metrics: metrics,
            validations,
            mapping_result,
            semantic_result,
            suggestions,
            errors,
        })
    }

    async fn validator(&self, object_types: &[ObjectType]) -> MetricValidator {
        let catalog = match self
            .retry
            .run("load_catalog", || CatalogSnapshot::load(self.metrics.as_ref()))
            .await
        {
            Ok(catalog) => catalog,
            Err(error) => {
                warn!(%error, "failed to load stored metrics for validation");
                CatalogSnapshot::new()
            }
        };
        MetricValidator::new(object_types).with_resolver(catalog)
    }

    /// Parse and validate without the LLM step.
    pub async fn validate(&self, sql: &str) -> ServiceResult<ValidationOnlyResult> {
        let outcome = self.parse(sql, &ParseOptions::default()).await?;
        Ok(outcome.into())
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Save a batch: ATOMIC metrics first, then DERIVED, then COMPOSITE,
    /// and within a category every metric after the metrics it references.
    /// References to metrics of the batch are rewritten to the saved ids. A
    /// failed metric is reported and the rest of the batch still runs.
    pub async fn save(&self, request: &SaveRequest) -> SaveResult {
        let ordered = save_order(&request.metrics);

        let mut result = SaveResult {
            success: true,
            ..Default::default()
        };
        let mut saved_ids: HashMap<String, String> = HashMap::new();

        for metric in ordered {
            match self.save_one(metric, request, &saved_ids).await {
                Ok((saved_id, status)) => {
                    debug!(metric = %metric.name, %saved_id, ?status, "saved metric");
                    saved_ids.insert(metric.id.clone(), saved_id.clone());
                    result.saved_ids.push(saved_id.clone());
                    result.saved_metrics.push(SavedMetric {
                        metric_name: metric.name.clone(),
                        saved_id,
                        status,
                    });
                }
                Err(error) => {
                    warn!(metric = %metric.name, %error, "failed to save metric");
                    result.success = false;
                    result.errors.push(SaveError {
                        metric_name: metric.name.clone(),
                        message: error.to_string(),
                    });
                }
            }
        }

        info!(
            saved = result.saved_ids.len(),
            failed = result.errors.len(),
            "saved metrics"
        );
        result
    }

    async fn save_one(
        &self,
        metric: &ExtractedMetric,
        request: &SaveRequest,
        saved_ids: &HashMap<String, String>,
    ) -> ServiceResult<(String, SaveStatus)> {
        let remap = |id: &String| saved_ids.get(id).cloned().unwrap_or_else(|| id.clone());
        let mut metric = metric.clone();
        metric.atomic_metric_id = metric.atomic_metric_id.as_ref().map(remap);
        metric.base_metric_ids = metric.base_metric_ids.iter().map(remap).collect();

        if metric.category == MetricCategory::Atomic {
            self.save_atomic(&metric, request).await
        } else {
            self.save_definition(&metric, request).await
        }
    }

    async fn save_atomic(
        &self,
        metric: &ExtractedMetric,
        request: &SaveRequest,
    ) -> ServiceResult<(String, SaveStatus)> {
        for (field, value) in [
            ("business_process", &metric.business_process),
            ("aggregation_function", &metric.aggregation_function),
        ] {
            if value.as_deref().map_or(true, str::is_empty) {
                return Err(ServiceError::MissingField {
                    metric: metric.name.clone(),
                    field,
                });
            }
        }

        let atomic = AtomicMetric::from(metric);
        if !request.create_new {
            for id in &request.existing_ids {
                let existing = self
                    .retry
                    .run("get_atomic_metric", || self.metrics.get_atomic_metric(id))
                    .await?;
                if existing.is_some_and(|e| e.name == metric.name) {
                    self.retry
                        .run("update_atomic_metric", || {
                            self.metrics.update_atomic_metric(id, &atomic)
                        })
                        .await?;
                    return Ok((id.clone(), SaveStatus::Updated));
                }
            }
        }

        let id = self
            .retry
            .run("create_atomic_metric", || {
                self.metrics
                    .create_atomic_metric(&atomic, &request.workspace_ids)
            })
            .await?;
        Ok((id, SaveStatus::Created))
    }

    async fn save_definition(
        &self,
        metric: &ExtractedMetric,
        request: &SaveRequest,
    ) -> ServiceResult<(String, SaveStatus)> {
        let definition = MetricDefinition::from_extracted(metric)
            .ok_or_else(|| ServiceError::NotADefinition(metric.name.clone()))?;

        if !request.create_new {
            for id in &request.existing_ids {
                let existing = self
                    .retry
                    .run("get_metric_definition", || self.metrics.get_metric_definition(id))
                    .await?;
                if existing.is_some_and(|e| e.name == metric.name) {
                    self.retry
                        .run("update_metric_definition", || {
                            self.metrics.update_metric_definition(id, &definition)
                        })
                        .await?;
                    return Ok((id.clone(), SaveStatus::Updated));
                }
            }
        }

        let id = self
            .retry
            .run("create_metric_definition", || {
                self.metrics
                    .create_metric_definition(&definition, &request.workspace_ids)
            })
            .await?;
        Ok((id, SaveStatus::Created))
    }
}

fn preview(sql: &str) -> String {
    let flat: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(100) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

/// Batch order for saving: by category, then by dependency depth, keeping
/// the request order otherwise. A cyclic batch falls back to category order.
fn save_order(metrics: &[ExtractedMetric]) -> Vec<&ExtractedMetric> {
    let depths = match DependencyGraph::from_metrics(metrics).dependency_depths() {
        Ok(depths) => depths,
        Err(error) => {
            warn!(%error, "metric batch has a dependency cycle, saving by category only");
            vec![0; metrics.len()]
        }
    };
    let mut ordered: Vec<(usize, &ExtractedMetric)> = metrics.iter().enumerate().collect();
    ordered.sort_by_key(|(i, m)| (m.category.save_order(), depths[*i]));
    ordered.into_iter().map(|(_, m)| m).collect()
}
