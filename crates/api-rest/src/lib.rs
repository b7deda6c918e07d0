//! # API REST
//!
//! REST API of the MTB bridge.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, status codes)
//!
//! The mapping work is done by [`mtb_core::MtbService`]. Its collaborators block, so every
//! handler runs the service call on the blocking thread pool.

#![warn(rust_2018_idioms)]

use api_shared::{
    CbioportalRest, ClinicalDatum, Deletions, GeneticAlteration, HealthRes, HealthService, Mtb,
    Reasoning, Reference, TherapyRecommendation, Treatment,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use mtb_core::{MtbError, MtbService};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    service: Arc<MtbService>,
}

impl AppState {
    pub fn new(service: Arc<MtbService>) -> Self {
        Self { service }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        read_mtbs,
        store_mtbs,
        delete_mtbs,
        recommendations_by_alteration,
        pmids_by_alteration,
    ),
    components(schemas(
        HealthRes,
        CbioportalRest,
        Mtb,
        TherapyRecommendation,
        Reasoning,
        ClinicalDatum,
        GeneticAlteration,
        Reference,
        Treatment,
        Deletions,
    ))
)]
pub struct ApiDoc;

/// Build the REST router with CORS and Swagger UI.
pub fn router(service: Arc<MtbService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/mtb/:patient_id",
            get(read_mtbs).put(store_mtbs).delete(delete_mtbs),
        )
        .route("/mtb/alteration", post(recommendations_by_alteration))
        .route("/mtb/alteration/pmid", post(pmids_by_alteration))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(service))
}

// ============================================================================
// Errors
// ============================================================================

/// Service error rendered as a status code and a short message.
pub struct ApiError(MtbError);

impl From<MtbError> for ApiError {
    fn from(err: MtbError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MtbError::InvalidInput(_) | MtbError::Mapping(_) => StatusCode::BAD_REQUEST,
            MtbError::Repository(_) | MtbError::Transport(_) | MtbError::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::warn!(error = %self.0, "request rejected");
        }
        (status, self.0.to_string()).into_response()
    }
}

/// Run a blocking service call off the async runtime.
async fn blocking<T, F>(state: AppState, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&MtbService) -> Result<T, MtbError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(&state.service))
        .await
        .map_err(|e| ApiError(MtbError::Repository(format!("request worker failed: {e}"))))?
        .map_err(ApiError::from)
}

// ============================================================================
// Handlers
// ============================================================================

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
async fn health() -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    get,
    path = "/mtb/{patient_id}",
    params(("patient_id" = String, Path, description = "Portal patient id")),
    responses(
        (status = 200, description = "The patient's MTB sessions", body = CbioportalRest),
        (status = 502, description = "Repository unavailable")
    )
)]
/// Read a patient's MTB sessions from the repository.
async fn read_mtbs(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<Json<CbioportalRest>, ApiError> {
    let record = blocking(state, move |service| service.read(&patient_id)).await?;
    Ok(Json(record))
}

#[utoipa::path(
    put,
    path = "/mtb/{patient_id}",
    params(("patient_id" = String, Path, description = "Portal patient id")),
    request_body = CbioportalRest,
    responses(
        (status = 201, description = "Stored; echoes the request body", body = CbioportalRest),
        (status = 400, description = "Missing ids"),
        (status = 502, description = "Repository or HL7 v2 receiver failed")
    )
)]
/// Store a patient's MTB sessions and, when enabled, send the HL7 v2 messages.
async fn store_mtbs(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
    Json(body): Json<CbioportalRest>,
) -> Result<(StatusCode, Json<CbioportalRest>), ApiError> {
    let body = blocking(state, move |service| {
        service.put(&patient_id, &body.mtbs)?;
        Ok(body)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(body)))
}

#[utoipa::path(
    delete,
    path = "/mtb/{patient_id}",
    params(("patient_id" = String, Path, description = "Portal patient id")),
    request_body = Deletions,
    responses(
        (status = 200, description = "Deleted; echoes the request body", body = Deletions),
        (status = 502, description = "Repository failed")
    )
)]
async fn delete_mtbs(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
    Json(body): Json<Deletions>,
) -> Result<Json<Deletions>, ApiError> {
    let body = blocking(state, move |service| {
        service.delete(&patient_id, &body)?;
        Ok(body)
    })
    .await?;
    Ok(Json(body))
}

#[utoipa::path(
    post,
    path = "/mtb/alteration",
    request_body = Vec<GeneticAlteration>,
    responses(
        (status = 200, description = "Therapy recommendations derived from the alterations", body = Vec<TherapyRecommendation>)
    )
)]
/// Therapy recommendations across all patients that are derived from any given alteration.
async fn recommendations_by_alteration(
    State(state): State<AppState>,
    Json(alterations): Json<Vec<GeneticAlteration>>,
) -> Result<Json<Vec<TherapyRecommendation>>, ApiError> {
    let found = blocking(state, move |service| {
        service.therapy_recommendations_by_alteration(&alterations)
    })
    .await?;
    Ok(Json(found))
}

#[utoipa::path(
    post,
    path = "/mtb/alteration/pmid",
    request_body = Vec<GeneticAlteration>,
    responses(
        (status = 200, description = "PMIDs cited for the alterations", body = Vec<u64>)
    )
)]
async fn pmids_by_alteration(
    State(state): State<AppState>,
    Json(alterations): Json<Vec<GeneticAlteration>>,
) -> Result<Json<Vec<u64>>, ApiError> {
    let pmids = blocking(state, move |service| {
        service.pmids_by_alteration(&alterations)
    })
    .await?;
    Ok(Json(pmids))
}
