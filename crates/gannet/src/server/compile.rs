//! The compile endpoint: synchronous from the client's perspective, but
//! internally "enqueue job → wait → read row", so the work happens on the
//! worker pool with the same at-least-once semantics as everything else.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use gannet_store::CompilationStatus;
use gannet_tasks::Task;

use super::{ApiError, AppState};

pub(crate) async fn compile_requirements(
    State(state): State<AppState>,
    Path((index_slugs, platform_slug)): Path<(String, String)>,
    body: String,
) -> Result<Response, ApiError> {
    let platform = state.platform(&platform_slug).await?;
    let indexes = state.indexes(&index_slugs).await?;

    let row = state.store.create_compiled(platform.id, &body).await?;
    let task = Task::Compile {
        compiled_id: row.id,
        index_slugs: indexes.iter().map(|index| index.slug.clone()).collect(),
    };
    if let Err(err) = state.queue.enqueue_and_wait(&task).await {
        warn!(compiled_id = row.id, "compile task did not complete: {err}");
    }

    let row = state
        .store
        .compiled_by_id(row.id)
        .await?
        .ok_or(ApiError::NotFound("compiled requirements"))?;
    match row.status {
        CompilationStatus::Compiled => Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            row.compiled_requirements.unwrap_or_default(),
        )
            .into_response()),
        CompilationStatus::Failed | CompilationStatus::Pending => Ok((
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!(
                "Requirements could not be compiled (#{})\n\n{}",
                row.id, row.compilation_log
            ),
        )
            .into_response()),
    }
}
