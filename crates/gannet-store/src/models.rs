use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown {what}: {value}")]
pub struct ParseKindError {
    what: &'static str,
    value: String,
}

/// A build target: an isolated container environment described by an opaque
/// JSON spec (image reference, environment variables, command template, and
/// the marker environment the resolver evaluates against).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Platform {
    pub id: i64,
    pub slug: String,
    pub kind: PlatformKind,
    #[sqlx(json)]
    pub spec: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
pub enum PlatformKind {
    #[sqlx(rename = "container")]
    #[serde(rename = "container")]
    Container,
}

impl FromStr for PlatformKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "container" => Ok(Self::Container),
            _ => Err(ParseKindError {
                what: "platform kind",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => f.write_str("container"),
        }
    }
}

/// An upstream package index.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct BackingIndex {
    pub id: i64,
    pub slug: String,
    pub url: String,
    pub backend: IndexBackendKind,
    /// Monotonically non-decreasing watermark of the last applied upstream
    /// change event, or `None` before the first sync.
    pub last_update_serial: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
pub enum IndexBackendKind {
    #[sqlx(rename = "simple-xmlrpc")]
    #[serde(rename = "simple-xmlrpc")]
    SimpleXmlRpc,
    #[sqlx(rename = "dev-index")]
    #[serde(rename = "dev-index")]
    DevIndex,
}

impl FromStr for IndexBackendKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple-xmlrpc" => Ok(Self::SimpleXmlRpc),
            "dev-index" => Ok(Self::DevIndex),
            _ => Err(ParseKindError {
                what: "index backend",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for IndexBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SimpleXmlRpc => f.write_str("simple-xmlrpc"),
            Self::DevIndex => f.write_str("dev-index"),
        }
    }
}

/// A named distribution within a backing index, created lazily on first
/// reference. `slug` is the normalized name; `name` preserves the upstream
/// spelling.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Package {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub index_id: i64,
}

/// One version of a package, with its canonical upstream download URL and
/// MD5 digest. Both are non-empty for every row created through the store.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Release {
    pub id: i64,
    pub package_id: i64,
    pub version: String,
    pub url: String,
    pub md5_digest: String,
}

/// The materialization of a release for a platform. An unbuilt row is a
/// placeholder that still advertises the upstream URL.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Build {
    pub id: i64,
    pub release_id: i64,
    pub platform_id: i64,
    /// Blob-store path of the built artifact, if any.
    pub artifact_blob: Option<String>,
    /// MD5 of the built artifact (not of the upstream source).
    pub md5_digest: Option<String>,
    pub filesize: Option<i64>,
    /// Unix seconds at which the last successful build started.
    pub build_timestamp: Option<i64>,
    /// Wall-clock seconds the last successful build took.
    pub build_duration: Option<i64>,
    #[sqlx(json(nullable))]
    pub metadata: Option<serde_json::Value>,
    pub build_log: String,
}

impl Build {
    pub fn is_built(&self) -> bool {
        self.artifact_blob.is_some()
    }
}

/// A build row joined with everything needed to name it: its release,
/// package, index and platform.
#[derive(Debug, Clone)]
pub struct BuildDetail {
    pub build: Build,
    pub release: Release,
    pub package: Package,
    pub index: BackingIndex,
    pub platform: Platform,
}

impl BuildDetail {
    /// The canonical upstream URL of the release this build materializes.
    pub fn original_url(&self) -> &str {
        &self.release.url
    }

    /// The filename advertised for this build: the artifact filename when
    /// built, else the final path segment of the upstream URL.
    pub fn filename(&self) -> &str {
        let path = self
            .build
            .artifact_blob
            .as_deref()
            .unwrap_or(&self.release.url);
        path.rsplit('/').next().unwrap_or(path)
    }

    /// The structured blob-store path for an artifact with the given
    /// filename: `{index}/{platform}/{package}/{version}/{filename}`.
    pub fn upload_path(&self, filename: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.index.slug, self.platform.slug, self.package.slug, self.release.version, filename,
        )
    }

    /// The digest to advertise: the artifact MD5 when built, else the
    /// upstream release MD5.
    pub fn digest(&self) -> &str {
        self.build
            .md5_digest
            .as_deref()
            .filter(|_| self.build.is_built())
            .unwrap_or(&self.release.md5_digest)
    }
}

/// Everything committed to a build row on success.
#[derive(Debug, Clone)]
pub struct BuildRecord {
    pub artifact_blob: String,
    pub md5_digest: String,
    pub filesize: i64,
    pub build_timestamp: i64,
    pub build_duration: i64,
    pub metadata: serde_json::Value,
    pub build_log: String,
}

/// A resolver input and output record.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CompiledRequirements {
    pub id: i64,
    pub platform_id: i64,
    pub requirements: String,
    pub compiled_requirements: Option<String>,
    pub compilation_log: String,
    pub status: CompilationStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
pub enum CompilationStatus {
    #[sqlx(rename = "pending")]
    #[serde(rename = "pending")]
    Pending,
    #[sqlx(rename = "compiled")]
    #[serde(rename = "compiled")]
    Compiled,
    #[sqlx(rename = "failed")]
    #[serde(rename = "failed")]
    Failed,
}

/// A queued unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct QueuedTask {
    pub id: i64,
    pub kind: String,
    pub payload: String,
    pub attempts: i64,
    pub run_at: i64,
    pub created_at: i64,
}
