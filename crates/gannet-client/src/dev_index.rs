//! The `dev-index` backend: a devpi-style index speaking the PEP 691
//! simple JSON API.
//!
//! Dev indexes have no changelog RPC. The server publishes its current
//! serial in the `X-DEVPI-SERIAL` response header; when it has moved past
//! the watermark, the full project listing is replayed as change events at
//! that serial, which re-imports are cheap enough to absorb.

use std::collections::BTreeMap;

use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::trace;
use url::Url;

use gannet_normalize::PackageName;

use crate::client::ChangeEvent;
use crate::descriptor::ReleaseDescriptor;
use crate::Error;

const ACCEPT_SIMPLE_JSON: &str = "application/vnd.pypi.simple.v1+json";
const SERIAL_HEADER: &str = "X-DEVPI-SERIAL";

#[derive(Debug, Deserialize)]
struct ProjectPage {
    files: Vec<SimpleFile>,
}

#[derive(Debug, Deserialize)]
struct SimpleFile {
    filename: String,
    url: String,
    #[serde(default)]
    hashes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct IndexPage {
    projects: Vec<ProjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    name: String,
}

pub(crate) async fn get_package_releases(
    client: &ClientWithMiddleware,
    base: &Url,
    name: &PackageName,
) -> Result<BTreeMap<String, Vec<ReleaseDescriptor>>, Error> {
    let url = base.join(&format!("{name}/"))?;
    trace!("fetching simple page for {name} from {url}");
    let response = client
        .get(url.clone())
        .header("Accept", ACCEPT_SIMPLE_JSON)
        .send()
        .await?;
    if response.status() == StatusCode::NOT_FOUND {
        return Err(Error::PackageNotFound(name.to_string()));
    }
    let bytes = response.error_for_status()?.bytes().await?;
    let page: ProjectPage = serde_json::from_slice(&bytes)
        .map_err(|err| Error::from_json_err(err, url.to_string()))?;

    let mut releases: BTreeMap<String, Vec<ReleaseDescriptor>> = BTreeMap::new();
    for file in page.files {
        let md5_digest = file.hashes.get("md5").cloned().unwrap_or_default();
        if let Some((version, descriptor)) =
            ReleaseDescriptor::from_filename(name, &file.filename, file.url, md5_digest)
        {
            releases.entry(version).or_default().push(descriptor);
        }
    }
    Ok(releases)
}

pub(crate) async fn get_version_releases(
    client: &ClientWithMiddleware,
    base: &Url,
    name: &PackageName,
    version: &str,
) -> Result<Vec<ReleaseDescriptor>, Error> {
    let mut releases = get_package_releases(client, base, name).await?;
    Ok(releases.remove(version).unwrap_or_default())
}

pub(crate) async fn updated_packages(
    client: &ClientWithMiddleware,
    base: &Url,
    since: Option<i64>,
) -> Result<Vec<ChangeEvent>, Error> {
    let response = client
        .get(base.clone())
        .header("Accept", ACCEPT_SIMPLE_JSON)
        .send()
        .await?
        .error_for_status()?;
    let serial = response
        .headers()
        .get(SERIAL_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok());
    let Some(serial) = serial else {
        return Err(Error::Protocol(format!("missing {SERIAL_HEADER} header")));
    };
    if since.is_some_and(|watermark| serial <= watermark) {
        return Ok(Vec::new());
    }

    let bytes = response.bytes().await?;
    let page: IndexPage = serde_json::from_slice(&bytes)
        .map_err(|err| Error::from_json_err(err, base.to_string()))?;

    let mut events: Vec<ChangeEvent> = page
        .projects
        .into_iter()
        .map(|project| ChangeEvent {
            name: Some(project.name),
            serial,
        })
        .collect();
    // Advance the watermark even when the index is empty.
    events.push(ChangeEvent { name: None, serial });
    Ok(events)
}
