//! Serve artifacts for the filesystem blob backend. Other backends
//! advertise their own URLs and never hit this route.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use super::{ApiError, AppState};

pub(crate) async fn serve_blob(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let local = state.storage.local_path(&path)?;
    let bytes = tokio::fs::read(&local)
        .await
        .map_err(|_| ApiError::NotFound("blob"))?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}
