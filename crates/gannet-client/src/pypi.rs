//! The `simple-xmlrpc` backend: a PyPI-style index with a JSON release
//! listing and the XML-RPC changelog API.

use std::collections::BTreeMap;

use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::trace;
use url::Url;

use gannet_normalize::PackageName;

use crate::client::ChangeEvent;
use crate::descriptor::{DistKind, ReleaseDescriptor};
use crate::xmlrpc::{self, Value};
use crate::Error;

#[derive(Debug, Deserialize)]
struct ProjectJson {
    releases: BTreeMap<String, Vec<FileJson>>,
}

#[derive(Debug, Deserialize)]
struct VersionJson {
    urls: Vec<FileJson>,
}

#[derive(Debug, Deserialize)]
struct FileJson {
    packagetype: String,
    url: String,
    filename: String,
    #[serde(default)]
    md5_digest: Option<String>,
    #[serde(default)]
    digests: Digests,
}

#[derive(Debug, Default, Deserialize)]
struct Digests {
    #[serde(default)]
    md5: Option<String>,
}

impl FileJson {
    fn into_descriptor(self) -> ReleaseDescriptor {
        let md5_digest = self
            .md5_digest
            .or(self.digests.md5)
            .unwrap_or_default();
        ReleaseDescriptor {
            kind: DistKind::parse(&self.packagetype),
            url: self.url,
            md5_digest,
            filename: self.filename,
        }
    }
}

pub(crate) async fn get_package_releases(
    client: &ClientWithMiddleware,
    base: &Url,
    name: &PackageName,
) -> Result<BTreeMap<String, Vec<ReleaseDescriptor>>, Error> {
    let url = base.join(&format!("pypi/{name}/json"))?;
    trace!("fetching releases for {name} from {url}");
    let response = client.get(url.clone()).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
        return Err(Error::PackageNotFound(name.to_string()));
    }
    let bytes = response.error_for_status()?.bytes().await?;
    let project: ProjectJson = serde_json::from_slice(&bytes)
        .map_err(|err| Error::from_json_err(err, url.to_string()))?;
    Ok(project
        .releases
        .into_iter()
        .map(|(version, files)| {
            (
                version,
                files.into_iter().map(FileJson::into_descriptor).collect(),
            )
        })
        .collect())
}

pub(crate) async fn get_version_releases(
    client: &ClientWithMiddleware,
    base: &Url,
    name: &PackageName,
    version: &str,
) -> Result<Vec<ReleaseDescriptor>, Error> {
    let url = base.join(&format!("pypi/{name}/{version}/json"))?;
    let response = client.get(url.clone()).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
        return Err(Error::PackageNotFound(name.to_string()));
    }
    let bytes = response.error_for_status()?.bytes().await?;
    let version: VersionJson = serde_json::from_slice(&bytes)
        .map_err(|err| Error::from_json_err(err, url.to_string()))?;
    Ok(version
        .urls
        .into_iter()
        .map(FileJson::into_descriptor)
        .collect())
}

/// Change events since the given serial.
///
/// With no watermark yet, the full `list_packages_with_serial` mapping
/// stands in for the changelog: every package is reported at its current
/// serial, which a fresh sync imports from scratch.
pub(crate) async fn updated_packages(
    client: &ClientWithMiddleware,
    base: &Url,
    since: Option<i64>,
) -> Result<Vec<ChangeEvent>, Error> {
    let response = match since {
        Some(serial) => {
            call(client, base, "changelog_since_serial", &[Value::Int(serial)]).await?
        }
        None => call(client, base, "list_packages_with_serial", &[]).await?,
    };

    let mut events = Vec::new();
    match response {
        Value::Array(entries) => {
            // changelog entries: [name, version, timestamp, action, serial]
            for entry in entries {
                let Value::Array(fields) = entry else {
                    return Err(Error::BadXml("changelog entry is not an array".to_string()));
                };
                let name = fields.first().and_then(|field| match field {
                    Value::Str(name) => Some(name.clone()),
                    _ => None,
                });
                let serial = fields
                    .get(4)
                    .and_then(Value::as_int)
                    .ok_or_else(|| Error::BadXml("changelog entry without serial".to_string()))?;
                events.push(ChangeEvent { name, serial });
            }
        }
        Value::Struct(members) => {
            // list_packages_with_serial: {name: serial}
            for (name, serial) in members {
                let serial = serial
                    .as_int()
                    .ok_or_else(|| Error::BadXml("package serial is not an int".to_string()))?;
                events.push(ChangeEvent {
                    name: Some(name),
                    serial,
                });
            }
            // Deliver in serial order so watermark persistence stays
            // resumable.
            events.sort_by_key(|event| event.serial);
        }
        _ => return Err(Error::BadXml("unexpected changelog response".to_string())),
    }
    Ok(events)
}

async fn call(
    client: &ClientWithMiddleware,
    base: &Url,
    method: &str,
    params: &[Value],
) -> Result<Value, Error> {
    let url = base.join("pypi")?;
    let body = xmlrpc::render_call(method, params);
    let response = client
        .post(url)
        .header("Content-Type", "text/xml")
        .body(body)
        .send()
        .await?
        .error_for_status()?;
    let text = response.text().await?;
    xmlrpc::parse_response(&text)
}
