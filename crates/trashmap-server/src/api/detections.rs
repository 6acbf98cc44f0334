use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::QueryRejection,
        Multipart, Path, Query, State,
    },
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use trashmap_core::{Detection, UploadMetadata};
use trashmap_store::image_digest;

use crate::middleware::RequestId;

use super::{
    map_store_error, normalize_limit, rejection_error, ApiError, ApiResponse, AppState,
};

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 500;
const FALLBACK_MIME: &str = "image/jpeg";

#[derive(Debug, Serialize)]
pub(super) struct IngestResult {
    pub detection_id: String,
    pub items_found: usize,
    /// `None` when the frame held no trash and nothing was stored.
    pub detection: Option<Detection>,
}

#[derive(Debug, Serialize)]
pub(super) struct ClearResult {
    pub cleared: usize,
}

#[derive(Debug, Deserialize)]
pub(super) struct ListQuery {
    pub limit: Option<i64>,
}

struct UploadParts {
    image: Bytes,
    mime_type: String,
    metadata: String,
}

/// `POST /api/v1/detections`: multipart `image` + `metadata`.
///
/// The classifier runs before anything touches the store, so a failed call
/// leaves no image or record behind.
pub(super) async fn create_detection(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<ApiResponse<IngestResult>>), ApiError> {
    let rid = req_id.0;
    let multipart = multipart.map_err(|e| rejection_error(rid.clone(), &e))?;
    let parts = read_upload(multipart, state.max_upload_bytes)
        .await
        .map_err(|(code, message)| ApiError::new(rid.clone(), code, message))?;

    let upload = UploadMetadata::from_json(&parts.metadata)
        .and_then(|meta| meta.validate(Utc::now()))
        .map_err(|e| ApiError::new(rid.clone(), "validation_error", e.to_string()))?;

    if state.store.get_detection(&upload.detection_id).await.is_some() {
        return Err(ApiError::new(
            rid,
            "conflict",
            format!("detection '{}' already exists", upload.detection_id),
        ));
    }

    let items = state
        .vision
        .classify_image(&parts.image, &parts.mime_type)
        .await
        .map_err(|e| {
            tracing::error!(
                detection_id = %upload.detection_id,
                error = %e,
                "ingest: classification failed"
            );
            ApiError::new(
                rid.clone(),
                "classifier_unavailable",
                "image classification failed; nothing was stored",
            )
        })?;

    let detection_id = upload.detection_id.clone();
    let digest = image_digest(&parts.image);
    let Some(detection) =
        Detection::from_classification(upload, items, digest, state.vision.vision_model())
    else {
        tracing::info!(detection_id = %detection_id, "ingest: no trash in frame; not stored");
        return Ok((
            StatusCode::OK,
            ApiResponse::new(
                IngestResult {
                    detection_id,
                    items_found: 0,
                    detection: None,
                },
                rid,
            ),
        ));
    };

    state
        .store
        .insert_detection(detection.clone(), &parts.image)
        .await
        .map_err(|e| map_store_error(rid.clone(), &e))?;

    tracing::info!(
        detection_id = %detection.detection_id,
        items = detection.item_count(),
        location = %detection.gps.label(),
        "ingest: detection stored"
    );

    Ok((
        StatusCode::CREATED,
        ApiResponse::new(
            IngestResult {
                detection_id,
                items_found: detection.item_count(),
                detection: Some(detection),
            },
            rid,
        ),
    ))
}

/// Collects the `image` and `metadata` parts, ignoring any others.
async fn read_upload(
    mut multipart: Multipart,
    max_upload_bytes: usize,
) -> Result<UploadParts, (&'static str, String)> {
    let mut image = None;
    let mut mime_type = None;
    let mut metadata = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(ToOwned::to_owned);
        match name.as_deref() {
            Some("image") => {
                mime_type = field
                    .content_type()
                    .filter(|ct| ct.starts_with("image/"))
                    .map(ToOwned::to_owned);
                image = Some(field.bytes().await.map_err(multipart_error)?);
            }
            Some("metadata") => {
                metadata = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let image = image.ok_or(("validation_error", "missing 'image' part".to_string()))?;
    if image.is_empty() {
        return Err(("validation_error", "'image' part is empty".to_string()));
    }
    if image.len() > max_upload_bytes {
        return Err((
            "payload_too_large",
            format!("image exceeds {max_upload_bytes} bytes"),
        ));
    }
    let metadata = metadata.ok_or(("validation_error", "missing 'metadata' part".to_string()))?;

    Ok(UploadParts {
        image,
        mime_type: mime_type.unwrap_or_else(|| FALLBACK_MIME.to_string()),
        metadata,
    })
}

fn multipart_error(error: MultipartError) -> (&'static str, String) {
    let code = if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "validation_error"
    };
    (code, error.body_text())
}

pub(super) async fn list_detections(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Detection>>>, ApiError> {
    let Query(query) = query.map_err(|e| rejection_error(req_id.0.clone(), &e))?;
    let limit = normalize_limit(query.limit, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT);
    let data = state.store.list_detections(Some(limit)).await;
    Ok(ApiResponse::new(data, req_id.0))
}

pub(super) async fn get_detection(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(detection_id): Path<String>,
) -> Result<Json<ApiResponse<Detection>>, ApiError> {
    match state.store.get_detection(&detection_id).await {
        Some(detection) => Ok(ApiResponse::new(detection, req_id.0)),
        None => Err(ApiError::new(
            req_id.0,
            "not_found",
            format!("detection '{detection_id}' not found"),
        )),
    }
}

pub(super) async fn clear_detections(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<ClearResult>>, ApiError> {
    let cleared = state
        .store
        .clear_detections()
        .await
        .map_err(|e| map_store_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(ClearResult { cleared }, req_id.0))
}
