use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use trashmap_core::Insight;

use crate::middleware::RequestId;
use crate::scheduler::RunOutcome;

use super::{
    map_store_error, normalize_limit, rejection_error, ApiError, ApiResponse, AppState,
};

const DEFAULT_INSIGHT_LIMIT: usize = 12;
const MAX_INSIGHT_LIMIT: usize = 288;

#[derive(Debug, Deserialize)]
pub(super) struct InsightsQuery {
    pub limit: Option<i64>,
}

pub(super) async fn list_insights(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    query: Result<Query<InsightsQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Insight>>>, ApiError> {
    let Query(query) = query.map_err(|e| rejection_error(req_id.0.clone(), &e))?;
    let limit = normalize_limit(query.limit, DEFAULT_INSIGHT_LIMIT, MAX_INSIGHT_LIMIT);
    Ok(ApiResponse::new(
        state.store.list_insights(Some(limit)).await,
        req_id.0,
    ))
}

pub(super) async fn latest_insight(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Insight>>, ApiError> {
    match state.store.latest_insight().await {
        Some(insight) => Ok(ApiResponse::new(insight, req_id.0)),
        None => Err(ApiError::new(
            req_id.0,
            "not_found",
            "no insight has been generated yet",
        )),
    }
}

/// Runs the insight job now, through the same overlap guard as the cron job.
pub(super) async fn run_insight(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<(StatusCode, Json<ApiResponse<Insight>>), ApiError> {
    match state.insights.run_once().await {
        Ok(RunOutcome::Completed(insight)) => {
            Ok((StatusCode::CREATED, ApiResponse::new(insight, req_id.0)))
        }
        Ok(RunOutcome::Skipped) => Err(ApiError::new(
            req_id.0,
            "conflict",
            "an insight run is already in progress",
        )),
        Err(e) => Err(map_store_error(req_id.0, &e)),
    }
}
