//! Read-only views derived from the whole detection set.

use axum::{extract::State, Extension, Json};
use serde::Serialize;
use trashmap_core::{
    build_heatmap, compute_predictions, compute_stats, Detection, HeatmapPoint, Insight,
    LocationTrend, PeakHour, Predictions, Stats,
};

use crate::middleware::RequestId;

use super::{ApiResponse, AppState};

const NOT_ENOUGH_DATA: &str = "Need more data for predictions";

/// Everything the map renderer needs in one poll.
#[derive(Debug, Serialize)]
pub(super) struct DashboardData {
    pub detections: Vec<Detection>,
    pub latest_insight: Option<Insight>,
    pub heatmap: Vec<HeatmapPoint>,
    pub stats: Stats,
}

#[derive(Debug, Serialize)]
pub(super) struct HeatmapData {
    pub points: Vec<HeatmapPoint>,
    pub total_points: usize,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(super) enum PredictionsData {
    Ready(Predictions),
    NotEnoughData {
        peak_trash_hours: Vec<PeakHour>,
        high_risk_locations: Vec<LocationTrend>,
        message: &'static str,
    },
}

impl From<Option<Predictions>> for PredictionsData {
    fn from(predictions: Option<Predictions>) -> Self {
        predictions.map_or(
            Self::NotEnoughData {
                peak_trash_hours: Vec::new(),
                high_risk_locations: Vec::new(),
                message: NOT_ENOUGH_DATA,
            },
            Self::Ready,
        )
    }
}

pub(super) async fn dashboard(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<DashboardData>> {
    let detections = state.store.list_detections(None).await;
    let latest_insight = state.store.latest_insight().await;

    let data = DashboardData {
        heatmap: build_heatmap(&detections),
        stats: compute_stats(&detections),
        detections,
        latest_insight,
    };
    ApiResponse::new(data, req_id.0)
}

pub(super) async fn heatmap(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<HeatmapData>> {
    let points = build_heatmap(&state.store.all_detections().await);
    let total_points = points.len();
    ApiResponse::new(
        HeatmapData {
            points,
            total_points,
        },
        req_id.0,
    )
}

pub(super) async fn stats(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<Stats>> {
    let stats = compute_stats(&state.store.all_detections().await);
    ApiResponse::new(stats, req_id.0)
}

pub(super) async fn predictions(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<PredictionsData>> {
    let predictions = compute_predictions(&state.store.all_detections().await);
    ApiResponse::new(predictions.into(), req_id.0)
}
