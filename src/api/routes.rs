//! API route definitions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::warn;

use super::state::AppState;
use crate::analysis::{AnalysisError, Cohort};
use crate::pipeline::CohortReport;
use crate::storage;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/cohorts", get(list_cohorts))
        .route("/cohorts/{product}/{region}/anomalies", get(anomalies))
        .route("/cohorts/{product}/{region}/impacts", get(impacts))
        .route("/cohorts/{product}/{region}/summary", get(summary))
        .route("/cohorts/{product}/{region}/backtest", get(backtest))
}

/// Error body for every non-2xx handler response.
pub enum ApiError {
    UnknownCohort(Cohort),
    Analysis(AnalysisError),
    Task(String),
}

impl From<AnalysisError> for ApiError {
    fn from(e: AnalysisError) -> Self {
        ApiError::Analysis(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::UnknownCohort(cohort) => {
                (StatusCode::NOT_FOUND, format!("unknown cohort {cohort}"))
            }
            ApiError::Analysis(e) => {
                let status = match &e {
                    AnalysisError::DataNotFound { .. } => StatusCode::NOT_FOUND,
                    AnalysisError::Storage(_) | AnalysisError::Pool(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status, e.to_string())
            }
            ApiError::Task(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        warn!(status = status.as_u16(), error = %message, "request failed");
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

/// Catalog selection lists, plus which catalog cohorts have stored rows.
async fn list_cohorts(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pool = state.pool.clone();
    let stored = tokio::task::spawn_blocking(move || storage::list_cohorts(&pool))
        .await
        .map_err(|e| ApiError::Task(format!("cohort listing aborted: {e}")))??;

    let catalog = &state.config.catalog;
    let (available, missing): (Vec<Cohort>, Vec<Cohort>) = catalog
        .products
        .iter()
        .flat_map(|p| catalog.regions.iter().map(move |r| Cohort::new(p, r)))
        .partition(|c| stored.contains(c));

    Ok(Json(json!({
        "data": {
            "products": catalog.products,
            "regions": catalog.regions,
            "prices": catalog.prices,
            "available": available,
            "missing": missing,
        },
        "meta": { "total": catalog.products.len() * catalog.regions.len() }
    })))
}

/// Check the cohort against the catalog and look up its price.
fn resolve(state: &AppState, product: String, region: String) -> Result<(Cohort, f64), ApiError> {
    let catalog = &state.config.catalog;
    if !catalog.contains(&product, &region) {
        return Err(ApiError::UnknownCohort(Cohort::new(product, region)));
    }
    let price = catalog
        .price(&product)
        .ok_or_else(|| AnalysisError::MissingPrice {
            product: product.clone(),
        })?;
    Ok((Cohort::new(product, region), price))
}

async fn cohort_report(
    state: AppState,
    product: String,
    region: String,
) -> Result<CohortReport, ApiError> {
    let (cohort, price) = resolve(&state, product, region)?;
    let report = tokio::task::spawn_blocking(move || {
        state.pipeline.analyze_stored(&state.pool, &cohort, price)
    })
    .await
    .map_err(|e| ApiError::Task(format!("analysis task aborted: {e}")))??;
    Ok(report)
}

async fn anomalies(
    State(state): State<AppState>,
    Path((product, region)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let report = cohort_report(state, product, region).await?;
    Ok(Json(json!({
        "data": report.anomalies,
        "meta": {
            "cohort": report.cohort,
            "total": report.anomalies.len(),
            "flagged": report.anomaly_count(),
        }
    })))
}

async fn impacts(
    State(state): State<AppState>,
    Path((product, region)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let report = cohort_report(state, product, region).await?;
    Ok(Json(json!({
        "data": report.impacts.events,
        "meta": {
            "cohort": report.cohort,
            "price_per_unit": report.price_per_unit,
            "total": report.impacts.len(),
        }
    })))
}

async fn summary(
    State(state): State<AppState>,
    Path((product, region)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let report = cohort_report(state, product, region).await?;
    let text = report.summary.as_ref().map(|s| s.render());
    Ok(Json(json!({
        "data": { "summary": report.summary, "text": text },
        "meta": { "cohort": report.cohort }
    })))
}

async fn backtest(
    State(state): State<AppState>,
    Path((product, region)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let (cohort, _) = resolve(&state, product, region)?;
    let task_cohort = cohort.clone();
    let report = tokio::task::spawn_blocking(move || {
        state.pipeline.backtest_stored(&state.pool, &task_cohort)
    })
    .await
    .map_err(|e| ApiError::Task(format!("backtest task aborted: {e}")))??;

    Ok(Json(json!({
        "data": report,
        "meta": { "cohort": cohort }
    })))
}
