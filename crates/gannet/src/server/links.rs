//! The link listing: per (index set, platform, package), the list of
//! downloadable artifact URLs, memoized in the link cache.

use std::collections::HashSet;
use std::fmt::Write;
use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use tracing::debug;

use gannet_cache::CacheKey;
use gannet_store::BuildDetail;

use super::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub(crate) struct ListingParams {
    cache: Option<String>,
}

pub(crate) async fn package_links(
    State(state): State<AppState>,
    Path((index_slugs, platform_slug, package_name)): Path<(String, String, String)>,
    Query(params): Query<ListingParams>,
) -> Result<Response, ApiError> {
    let canonical = AppState::normalized(&package_name)?;

    // Non-canonical spellings get a 301 to the canonical form and are
    // never cached.
    if canonical.as_str() != package_name {
        return Ok((
            StatusCode::MOVED_PERMANENTLY,
            [(
                header::LOCATION,
                format!("/d/{index_slugs}/{platform_slug}/{canonical}/"),
            )],
        )
            .into_response());
    }

    let use_cache = params.cache.as_deref() != Some("off");
    let slugs: Vec<&str> = index_slugs.split('+').collect();
    let key = CacheKey::links(&slugs, &platform_slug, &canonical);
    if use_cache {
        if let Some(rendered) = state.cache.get(&key) {
            return Ok(Html(rendered).into_response());
        }
    }

    let platform = state.platform(&platform_slug).await?;
    let indexes = state.indexes(&index_slugs).await?;

    // First-seen wins across indexes, preserving index priority.
    let mut seen_versions: HashSet<String> = HashSet::new();
    let mut items: Vec<BuildDetail> = Vec::new();
    let mut found = false;
    for index in &indexes {
        let Some(package) = state.store.package_by_slug(index.id, &canonical).await? else {
            continue;
        };
        found = true;

        let mut listed = Vec::new();
        for (release, build) in state.store.listed_builds(package.id, platform.id).await? {
            // Backfill missing placeholders so every release advertises a
            // download.
            let build = match build {
                Some(build) => build,
                None => {
                    state
                        .store
                        .get_or_create_build(release.id, platform.id)
                        .await?
                }
            };
            let version = pep440_rs::Version::from_str(&release.version).ok();
            listed.push((
                version,
                BuildDetail {
                    build,
                    release,
                    package: package.clone(),
                    index: index.clone(),
                    platform: platform.clone(),
                },
            ));
        }
        // Descending by parsed version; unparsable versions sink to the
        // bottom.
        listed.sort_by(|(a, _), (b, _)| b.cmp(a));

        for (_, detail) in listed {
            if seen_versions.insert(detail.release.version.clone()) {
                items.push(detail);
            }
        }
    }
    if !found {
        return Err(ApiError::NotFound("package"));
    }

    let rendered = render(&state, canonical.as_str(), &items)?;
    if use_cache {
        state.cache.set(key, rendered.clone());
    } else {
        debug!(package = %canonical, "cache bypassed");
    }
    Ok(Html(rendered).into_response())
}

fn render(state: &AppState, package_name: &str, items: &[BuildDetail]) -> Result<String, ApiError> {
    let title = html_escape::encode_text(package_name);
    let mut body = String::new();
    let _ = writeln!(body, "<!DOCTYPE html>");
    let _ = writeln!(body, "<html>");
    let _ = writeln!(body, "  <head><title>Links for {title}</title></head>");
    let _ = writeln!(body, "  <body>");
    let _ = writeln!(body, "    <h1>Links for {title}</h1>");
    for detail in items {
        let mut href = state.advertised_url(detail)?;
        href.set_fragment(Some(&format!("md5={}", detail.digest())));
        let _ = writeln!(
            body,
            "    <a href=\"{}\">{}</a><br/>",
            html_escape::encode_double_quoted_attribute(href.as_str()),
            html_escape::encode_text(detail.filename()),
        );
    }
    let _ = writeln!(body, "  </body>");
    let _ = writeln!(body, "</html>");
    Ok(body)
}
