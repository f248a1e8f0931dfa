//! The HTTP surface: simple-index link listings, download redirects, the
//! compile and resolve endpoints, and blob serving for the filesystem
//! backend.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use thiserror::Error;
use url::Url;

use gannet_cache::LinkCache;
use gannet_normalize::PackageName;
use gannet_storage::BlobStore;
use gannet_store::{BackingIndex, BuildDetail, MetadataStore, Platform, StoreError};
use gannet_tasks::TaskQueue;

mod blobs;
mod compile;
mod download;
mod links;
mod resolve;

#[derive(Clone)]
pub struct AppState {
    pub store: MetadataStore,
    pub storage: BlobStore,
    pub cache: Arc<LinkCache>,
    pub queue: TaskQueue,
    pub public_url: Url,
    pub always_redirect_downloads: bool,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route(
            "/d/:index_slugs/:platform_slug/:package_name/",
            get(links::package_links),
        )
        .route(
            "/d/:index_slugs/:platform_slug/:package_name/:version/download/:build_id/:filename",
            get(download::download_build),
        )
        .route(
            "/d/:index_slugs/:platform_slug/+compile",
            post(compile::compile_requirements),
        )
        .route(
            "/d/:index_slugs/:platform_slug/+resolve",
            post(resolve::resolve_requirements),
        )
        .route("/blobs/*path", get(blobs::serve_blob))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<gannet_client::Error> for ApiError {
    fn from(err: gannet_client::Error) -> Self {
        match err {
            gannet_client::Error::PackageNotFound(_) => Self::NotFound("package"),
            other if other.is_transient() => Self::Unavailable(other.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<gannet_tasks::TaskError> for ApiError {
    fn from(err: gannet_tasks::TaskError) -> Self {
        match err {
            gannet_tasks::TaskError::Store(err) => err.into(),
            gannet_tasks::TaskError::Client(err) => err.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<url::ParseError> for ApiError {
    fn from(err: url::ParseError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<gannet_storage::StorageError> for ApiError {
    fn from(err: gannet_storage::StorageError) -> Self {
        match err {
            gannet_storage::StorageError::NotFound(_)
            | gannet_storage::StorageError::InvalidPath(_) => Self::NotFound("blob"),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl AppState {
    /// Resolve a `slug('+'slug)*` index set, preserving request order.
    pub(crate) async fn indexes(&self, index_slugs: &str) -> Result<Vec<BackingIndex>, ApiError> {
        let mut indexes = Vec::new();
        for slug in index_slugs.split('+') {
            indexes.push(
                self.store
                    .index_by_slug(slug)
                    .await
                    .map_err(|_| ApiError::NotFound("backing index"))?,
            );
        }
        Ok(indexes)
    }

    pub(crate) async fn platform(&self, platform_slug: &str) -> Result<Platform, ApiError> {
        self.store
            .platform_by_slug(platform_slug)
            .await
            .map_err(|_| ApiError::NotFound("platform"))
    }

    /// The URL to advertise for a build: the blob itself when built (and
    /// direct serving is allowed), else the download-redirect endpoint.
    pub(crate) fn advertised_url(&self, detail: &BuildDetail) -> Result<Url, ApiError> {
        if !self.always_redirect_downloads {
            if let Some(blob) = &detail.build.artifact_blob {
                return Ok(self.storage.url(blob)?);
            }
        }
        Ok(self.public_url.join(&format!(
            "d/{}/{}/{}/{}/download/{}/{}",
            detail.index.slug,
            detail.platform.slug,
            detail.package.slug,
            detail.release.version,
            detail.build.id,
            detail.filename(),
        ))?)
    }

    pub(crate) fn normalized(package_name: &str) -> Result<PackageName, ApiError> {
        PackageName::new(package_name).map_err(|_| ApiError::NotFound("package"))
    }
}

/// Lightweight liveness probe used by deployment health checks.
pub async fn healthz(State(_): State<AppState>) -> &'static str {
    "ok"
}
