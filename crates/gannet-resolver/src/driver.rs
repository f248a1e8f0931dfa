use async_trait::async_trait;
use url::Url;

use gannet_build::{BuildExecutor, ExternalBuild};
use gannet_store::{BuildDetail, Platform};

use crate::ResolveError;

/// The resolver's seam to the build executor, so tests can substitute a
/// double that "builds" from canned metadata.
#[async_trait]
pub trait BuildDriver: Send + Sync {
    /// Make sure the build row is materialized, returning the committed
    /// detail (with metadata populated).
    async fn ensure_built(&self, detail: BuildDetail) -> Result<BuildDetail, ResolveError>;

    /// Materialize a direct-URL requirement for the platform.
    async fn build_external(
        &self,
        platform: &Platform,
        url: &Url,
    ) -> Result<ExternalBuild, ResolveError>;
}

#[async_trait]
impl BuildDriver for BuildExecutor {
    async fn ensure_built(&self, detail: BuildDetail) -> Result<BuildDetail, ResolveError> {
        if detail.build.is_built() {
            return Ok(detail);
        }
        Ok(self.rebuild(detail.build.id, false).await?)
    }

    async fn build_external(
        &self,
        platform: &Platform,
        url: &Url,
    ) -> Result<ExternalBuild, ResolveError> {
        Ok(BuildExecutor::build_external(self, platform, url).await?)
    }
}

/// The build selected for a graph node: a registry build row, or an
/// external (direct-URL) build.
#[derive(Debug, Clone)]
pub(crate) enum ResolvedBuild {
    Registry(BuildDetail),
    External(ExternalBuild),
}

impl ResolvedBuild {
    pub(crate) fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }

    /// The display name used in `# via` annotations and log lines.
    pub(crate) fn package_name(&self) -> String {
        match self {
            Self::Registry(detail) => detail.package.slug.clone(),
            Self::External(external) => external.package_name.to_string(),
        }
    }

    /// `name==version` of the selected build.
    pub(crate) fn pinned(&self) -> String {
        match self {
            Self::Registry(detail) => {
                format!(
                    "{}=={}",
                    detail.package.name.to_lowercase(),
                    detail.release.version
                )
            }
            Self::External(external) => {
                format!("{}=={}", external.package_name, external.version)
            }
        }
    }

    pub(crate) fn metadata(&self) -> Result<&serde_json::Value, ResolveError> {
        match self {
            Self::Registry(detail) => detail.build.metadata.as_ref().ok_or_else(|| {
                ResolveError::Metadata(format!(
                    "build {} committed without metadata",
                    detail.build.id
                ))
            }),
            Self::External(external) => Ok(&external.metadata),
        }
    }
}

/// How a node remembers its referers: by name and pin, never by row
/// reference, so deletion stays safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BuildKey {
    Registry { name: String, version: String },
    External { name: String, url: String },
}

impl BuildKey {
    pub(crate) fn of(build: &ResolvedBuild) -> Self {
        match build {
            ResolvedBuild::Registry(detail) => Self::Registry {
                name: detail.package.slug.clone(),
                version: detail.release.version.clone(),
            },
            ResolvedBuild::External(external) => Self::External {
                name: external.package_name.to_string(),
                url: external.external_url.to_string(),
            },
        }
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            Self::Registry { name, .. } | Self::External { name, .. } => name,
        }
    }
}
