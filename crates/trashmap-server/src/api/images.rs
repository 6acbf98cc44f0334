use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Extension,
};

use crate::middleware::RequestId;

use super::{map_store_error, ApiError, AppState};

/// `GET /images/{file_name}`: a stored frame. Names are checked against the
/// detection-id alphabet before any filesystem access.
pub(super) async fn get_image(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(file_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state
        .store
        .read_image(&file_name)
        .await
        .map_err(|e| map_store_error(req_id.0, &e))?;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}
