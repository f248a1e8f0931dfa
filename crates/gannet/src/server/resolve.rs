//! The resolve endpoint: turn `name==version` lines into one absolute
//! download URL per line. Bare URLs pass through untouched. Ranges are
//! rejected; only exact `==` pins are accepted here.

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use pep440_rs::Version;
use pep508_rs::{Requirement, VersionOrUrl};

use gannet_client::best_release;
use gannet_normalize::PackageName;
use gannet_store::{BackingIndex, BuildDetail, Platform, Release};
use gannet_tasks::index_client;

use super::{ApiError, AppState};

pub(crate) async fn resolve_requirements(
    State(state): State<AppState>,
    Path((index_slugs, platform_slug)): Path<(String, String)>,
    body: String,
) -> Result<Response, ApiError> {
    let platform = state.platform(&platform_slug).await?;
    let indexes = state.indexes(&index_slugs).await?;

    let mut urls = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with("https://") || line.starts_with("http://") {
            urls.push(line.to_string());
            continue;
        }

        let (name, version) = parse_pin(line)?;
        let detail = find_release(&state, &indexes, &platform, &name, &version).await?;
        let url = state.advertised_url(&detail)?;
        urls.push(url.to_string());
    }

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        urls.join("\n"),
    )
        .into_response())
}

/// Accept exactly one `==` specifier per line.
fn parse_pin(line: &str) -> Result<(PackageName, Version), ApiError> {
    let requirement = Requirement::from_str(line)
        .map_err(|err| ApiError::BadRequest(format!("invalid requirement `{line}`: {err}")))?;
    let Some(VersionOrUrl::VersionSpecifier(specifiers)) = &requirement.version_or_url else {
        return Err(ApiError::BadRequest(format!(
            "`{line}`: exactly one `==` specifier is required"
        )));
    };
    let mut iter = specifiers.iter();
    let (Some(specifier), None) = (iter.next(), iter.next()) else {
        return Err(ApiError::BadRequest(format!(
            "`{line}`: exactly one `==` specifier is required"
        )));
    };
    let rendered = specifier.to_string();
    let version = rendered
        .strip_prefix("==")
        .filter(|rest| !rest.starts_with('='))
        .ok_or_else(|| ApiError::BadRequest(format!("`{line}`: only `==` is supported here")))?;
    let version = Version::from_str(version.trim())
        .map_err(|err| ApiError::BadRequest(format!("`{line}`: {err}")))?;
    let name = PackageName::new(&requirement.name)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    Ok((name, version))
}

/// Find the pinned release across the index set, importing the single
/// version from the upstream when it is not cached locally yet.
async fn find_release(
    state: &AppState,
    indexes: &[BackingIndex],
    platform: &Platform,
    name: &PackageName,
    version: &Version,
) -> Result<BuildDetail, ApiError> {
    for index in indexes {
        let release = match state.store.package_by_slug(index.id, name).await? {
            Some(package) => find_local(state, package.id, version).await?,
            None => None,
        };
        let release = match release {
            Some(release) => Some(release),
            None => import_version(state, index, name, version).await?,
        };
        if let Some(release) = release {
            let build = state
                .store
                .get_or_create_build(release.id, platform.id)
                .await?;
            return state
                .store
                .build_detail(build.id)
                .await?
                .ok_or(ApiError::NotFound("build"));
        }
    }
    Err(ApiError::NotFound("release"))
}

async fn find_local(
    state: &AppState,
    package_id: i64,
    version: &Version,
) -> Result<Option<Release>, ApiError> {
    // Exact string match first, then the version-scheme equivalence
    // (`1.0` == `1.0.0`).
    if let Some(release) = state
        .store
        .release_by_version(package_id, &version.to_string())
        .await?
    {
        return Ok(Some(release));
    }
    for release in state.store.releases_for_package(package_id).await? {
        if Version::from_str(&release.version).is_ok_and(|parsed| parsed == *version) {
            return Ok(Some(release));
        }
    }
    Ok(None)
}

/// Fetch one version's descriptors from the upstream and persist the best
/// release, creating the package lazily.
async fn import_version(
    state: &AppState,
    index: &BackingIndex,
    name: &PackageName,
    version: &Version,
) -> Result<Option<Release>, ApiError> {
    let client = index_client(index)?;
    let descriptors = match client
        .get_version_releases(name, &version.to_string())
        .await
    {
        Ok(descriptors) => descriptors,
        Err(gannet_client::Error::PackageNotFound(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let Some(best) = best_release(&descriptors) else {
        return Ok(None);
    };
    let package = state
        .store
        .get_or_create_package(index.id, name.as_str(), name)
        .await?;
    let release = state
        .store
        .upsert_release(package.id, &version.to_string(), &best.url, &best.md5_digest)
        .await?;
    state.cache.invalidate_package(&index.slug, name);
    Ok(Some(release))
}
