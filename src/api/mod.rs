//! HTTP surface for the search orchestrator.
//!
//! A thin layer: validate, delegate, map errors. Everything else lives in
//! the pipeline.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::error::{KashshafError, SearchError, VectorError};
use crate::search::types::{SearchParams, SearchResponse};
use crate::search::SearchOrchestrator;

/// Shared state for the API router.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<SearchOrchestrator>,
}

/// Build the API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/search", post(search_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn search_handler(
    State(state): State<ApiState>,
    Json(params): Json<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let response = state.orchestrator.search(params).await?;
    Ok(Json(response))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler() -> Response {
    use prometheus::Encoder;

    let metrics = crate::metrics::get_metrics();
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metrics.registry.gather(), &mut buffer) {
        tracing::warn!(error = %e, "metrics encoding failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (StatusCode::OK, buffer).into_response()
}

/// Error envelope returned to callers.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// HTTP mapping of pipeline errors.
pub struct ApiError(KashshafError);

impl From<KashshafError> for ApiError {
    fn from(e: KashshafError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            KashshafError::Search(
                SearchError::InvalidQuery(message) | SearchError::InvalidParameter(message),
            ) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "invalid_request".to_string(),
                    message: Some(message.clone()),
                },
            ),
            KashshafError::Vector(VectorError::CollectionMissing(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    error: "indexes_uninitialized".to_string(),
                    message: Some("Collection not found".to_string()),
                },
            ),
            e => {
                tracing::error!(error = %e, "search request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "internal_error".to_string(),
                        message: None,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: KashshafError) -> StatusCode {
        ApiError(e).into_response().status()
    }

    #[test]
    fn test_validation_maps_to_400() {
        let e = SearchError::InvalidQuery("query must not be empty".to_string()).into();
        assert_eq!(status_of(e), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_collection_missing_maps_to_503() {
        let e = VectorError::CollectionMissing("pages_v3".to_string()).into();
        assert_eq!(status_of(e), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_other_errors_map_to_500() {
        let e = KashshafError::Repository("db down".to_string());
        assert_eq!(status_of(e), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
