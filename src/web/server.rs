//! Axum REST surface for the SQL paste workflows.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::ServerSettings;
use crate::service::{ParseOptions, SaveRequest, ServiceError, SqlPasteService};

pub struct AppState {
    pub service: SqlPasteService,
}

/// Build the axum router with all routes.
pub fn router(state: Arc<AppState>, cors: bool) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/sql-paste/parse", post(parse_sql))
        .route("/sql-paste/save", post(save_metrics))
        .route("/sql-paste/validate", post(validate_sql));

    let router = if cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };
    router.with_state(state)
}

pub async fn serve(
    service: SqlPasteService,
    settings: &ServerSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(Arc::new(AppState { service }), settings.cors);
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "metrica server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(ServiceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            warn!(error = %self.0, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        Self(error)
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Deserialize)]
struct SqlRequest {
    sql: String,
    #[serde(default)]
    options: ParseOptions,
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /sql-paste/parse
async fn parse_sql(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SqlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.service.parse(&req.sql, &req.options).await?;
    Ok(Json(outcome))
}

/// POST /sql-paste/validate
async fn validate_sql(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SqlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.service.validate(&req.sql).await?;
    Ok(Json(result))
}

/// POST /sql-paste/save
async fn save_metrics(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveRequest>,
) -> impl IntoResponse {
    Json(state.service.save(&req).await)
}
