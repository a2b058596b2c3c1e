//! Metrica CLI - Extract metric definitions from pasted SQL
//!
//! Usage:
//!   metrica parse <file.sql> [--llm] [--format json|text]
//!   metrica lineage <file.sql> [--explain]
//!   metrica validate <file.sql>
//!   metrica serve [--port <port>]
//!
//! Use `-` as the file to read SQL from stdin.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use metrica::config::{Settings, StoreBackend};
use metrica::lineage::LineageExtractor;
use metrica::llm::ProcessLlmClient;
use metrica::metadata::{
    InMemoryMetricStore, InMemoryOntologyStore, MetricStore, OntologyStore, SqliteMetricStore,
};
use metrica::planner::build_plan;
use metrica::service::{ParseOptions, ParseOutcome, SqlPasteService};
use tracing::{debug, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "metrica")]
#[command(about = "Metrica - Turn analytical SQL into governed metric definitions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, classify and validate the metrics of a query
    Parse {
        /// Path to the .sql file, or `-` for stdin
        file: PathBuf,

        /// Ask the configured LLM bridge for semantic alignment
        #[arg(long)]
        llm: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the column lineage of a query
    Lineage {
        /// Path to the .sql file, or `-` for stdin
        file: PathBuf,

        /// Print the relational plan as well
        #[arg(long)]
        explain: bool,
    },

    /// Validate the metrics of a query without saving anything
    Validate {
        /// Path to the .sql file, or `-` for stdin
        file: PathBuf,
    },

    /// Run the REST server
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human readable summary
    Text,
    /// Full parse outcome as JSON
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&settings);

    match cli.command {
        Commands::Parse { file, llm, format } => cmd_parse(&settings, file, llm, format).await,
        Commands::Lineage { file, explain } => cmd_lineage(file, explain),
        Commands::Validate { file } => cmd_validate(&settings, file).await,
        #[cfg(feature = "server")]
        Commands::Serve { port } => cmd_serve(settings, port).await,
    }
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if settings.logging.json {
        registry.with(fmt::layer().json().with_writer(io::stderr)).try_init()
    } else {
        registry.with(fmt::layer().with_writer(io::stderr)).try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to init logging: {}", e);
    }
}

fn read_sql(file: &Path) -> Result<String, ExitCode> {
    let result = if file.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer).map(|_| buffer)
    } else {
        fs::read_to_string(file)
    };
    result.map_err(|e| {
        eprintln!("Error reading '{}': {}", file.display(), e);
        ExitCode::FAILURE
    })
}

/// Wire the service from the configured stores and LLM bridge.
fn build_service(settings: &Settings, want_llm: bool) -> Result<SqlPasteService, String> {
    let ontology: Arc<dyn OntologyStore> = match settings.ontology_path().map_err(|e| e.to_string())? {
        Some(path) => Arc::new(InMemoryOntologyStore::from_file(&path).map_err(|e| {
            format!("failed to load ontology '{}': {}", path.display(), e)
        })?),
        None => Arc::new(InMemoryOntologyStore::default()),
    };

    let metrics: Arc<dyn MetricStore> = match settings.store.backend {
        StoreBackend::Memory => Arc::new(InMemoryMetricStore::new()),
        StoreBackend::Sqlite => {
            let path = match settings.store_path().map_err(|e| e.to_string())? {
                Some(path) => path,
                None => SqliteMetricStore::default_path().map_err(|e| e.to_string())?,
            };
            debug!(path = %path.display(), "opening metric store");
            Arc::new(SqliteMetricStore::open(&path).map_err(|e| e.to_string())?)
        }
    };

    let mut service = SqlPasteService::new(ontology, metrics)
        .configured(settings)
        .map_err(|e| e.to_string())?;

    if want_llm {
        match settings.llm_command().map_err(|e| e.to_string())? {
            Some(command) => {
                let api_key = settings.llm.resolved_api_key().map_err(|e| e.to_string())?;
                let client = ProcessLlmClient::from_settings(&settings.llm, &command, api_key)
                    .map_err(|e| format!("failed to start LLM bridge: {}", e))?;
                service = service.with_llm(Arc::new(client));
            }
            None => warn!("no llm.command configured, using heuristic alignment"),
        }
    }
    Ok(service)
}

async fn cmd_parse(settings: &Settings, file: PathBuf, llm: bool, format: OutputFormat) -> ExitCode {
    let sql = match read_sql(&file) {
        Ok(sql) => sql,
        Err(code) => return code,
    };
    let service = match build_service(settings, llm || settings.llm.enabled) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let options = ParseOptions {
        enable_llm: llm || settings.llm.enabled,
        ..Default::default()
    };
    let outcome = match service.parse(&sql, &options).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&outcome) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing result: {}", e);
                return ExitCode::FAILURE;
            }
        },
        OutputFormat::Text => print_outcome(&outcome),
    }

    if outcome.all_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_outcome(outcome: &ParseOutcome) {
    println!("Metrics:");
    for metric in &outcome.extracted_metrics {
        println!(
            "  - {} [{} / {:?}] {}",
            metric.name, metric.category, metric.confidence, metric.source_sql
        );
        if let Some(process) = &metric.business_process {
            println!("      business process: {}", process);
        }
        if let Some(formula) = &metric.derived_formula {
            println!("      formula: {}", formula);
        }
        if !metric.base_metric_ids.is_empty() {
            println!("      based on: {}", metric.base_metric_ids.join(", "));
        }
    }

    let issues: Vec<_> = outcome
        .validations
        .iter()
        .filter(|v| !v.errors.is_empty() || !v.warnings.is_empty())
        .collect();
    if !issues.is_empty() {
        println!();
        println!("Validation:");
        for validation in issues {
            for issue in &validation.errors {
                println!("  error   {}: [{}] {}", validation.metric_name, issue.code, issue.message);
            }
            for issue in &validation.warnings {
                println!("  warning {}: [{}] {}", validation.metric_name, issue.code, issue.message);
            }
        }
    }

    if !outcome.errors.is_empty() {
        println!();
        println!("Problems:");
        for error in &outcome.errors {
            println!("  - {}", error);
        }
    }

    println!();
    for suggestion in &outcome.suggestions {
        println!("{}", suggestion);
    }
}

fn cmd_lineage(file: PathBuf, explain: bool) -> ExitCode {
    let sql = match read_sql(&file) {
        Ok(sql) => sql,
        Err(code) => return code,
    };
    let plan = match build_plan(&sql) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if explain {
        println!("{}", plan.explain());
    }

    let report = LineageExtractor::new().extract(&plan);
    for lineage in report.root_lineages() {
        println!("{} ({})", lineage.output_name, lineage.transform_type);
        if lineage.sources.is_empty() {
            println!("    <no base column>");
        }
        for source in &lineage.sources {
            println!("    {}", source.full_lineage());
        }
    }

    if !report.join_paths.is_empty() {
        println!();
        println!("Joins:");
        for join in &report.join_paths {
            println!(
                "  {}.{} = {}.{} ({:?})",
                join.left_table, join.left_column, join.right_table, join.right_column, join.join_kind
            );
        }
    }

    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }
    ExitCode::SUCCESS
}

async fn cmd_validate(settings: &Settings, file: PathBuf) -> ExitCode {
    let sql = match read_sql(&file) {
        Ok(sql) => sql,
        Err(code) => return code,
    };
    let service = match build_service(settings, false) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match service.validate(&sql).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for validation in &result.validations {
        for issue in &validation.errors {
            eprintln!("{}: [{}] {}", validation.metric_name, issue.code, issue.message);
        }
    }

    if result.all_valid {
        println!("OK: {} metric(s) valid", result.extracted_metrics.len());
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(feature = "server")]
async fn cmd_serve(mut settings: Settings, port: Option<u16>) -> ExitCode {
    if let Some(port) = port {
        settings.server.port = port;
    }
    let service = match build_service(&settings, settings.llm.enabled) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match metrica::web::serve(service, &settings.server).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
