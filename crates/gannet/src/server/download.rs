//! The download redirector: resolve a client download request to a built
//! artifact, or fall back to the upstream URL while a build is scheduled.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use gannet_tasks::Task;

use super::{ApiError, AppState};

pub(crate) async fn download_build(
    State(state): State<AppState>,
    Path((index_slug, platform_slug, package_name, version, build_id, _filename)): Path<(
        String,
        String,
        String,
        String,
        i64,
        String,
    )>,
) -> Result<Response, ApiError> {
    // O(1) by build id; fall back to the full coordinate tuple when the id
    // is stale.
    let detail = match state.store.build_detail(build_id).await? {
        Some(detail) => detail,
        None => {
            let canonical = AppState::normalized(&package_name)?;
            state
                .store
                .find_build_detail(&index_slug, &platform_slug, &canonical, &version)
                .await?
                .ok_or(ApiError::NotFound("build"))?
        }
    };

    if let Some(blob) = detail.build.artifact_blob.clone().filter(|_| detail.build.is_built()) {
        if state.always_redirect_downloads {
            let url = state.storage.url(&blob)?;
            return Ok(found(url.as_str()));
        }
        // Serve straight from the blob store, skipping the extra hop.
        let path = state.storage.local_path(&blob)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| ApiError::NotFound("blob"))?;
        return Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response());
    }

    // Unbuilt: schedule the build and send the client upstream for now; it
    // is expected to retry later.
    debug!(build_id = detail.build.id, "scheduling build on download");
    state
        .queue
        .enqueue(&Task::Build {
            build_id: detail.build.id,
            force: false,
        })
        .await?;
    Ok(found(detail.original_url()))
}

/// A plain 302, which is what simple-index clients expect.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}
