use std::path::{Path, PathBuf};
use std::sync::Arc;

use md5::{Digest, Md5};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use gannet_cache::LinkCache;
use gannet_normalize::PackageName;
use gannet_storage::BlobStore;
use gannet_store::{BuildDetail, BuildRecord, MetadataStore};

use crate::container::{self, ContainerSpec};
use crate::locks::Locks;
use crate::{BuildError, ExternalBuild};

/// Builds release artifacts for platforms, one at a time per
/// `(release, platform)` pair.
pub struct BuildExecutor {
    store: MetadataStore,
    storage: BlobStore,
    cache: Arc<LinkCache>,
    client: reqwest::Client,
    locks: Locks,
}

impl BuildExecutor {
    pub fn new(store: MetadataStore, storage: BlobStore, cache: Arc<LinkCache>) -> Self {
        Self {
            store,
            storage,
            cache,
            client: reqwest::Client::new(),
            locks: Locks::default(),
        }
    }

    /// Materialize the build, downloading and compiling the release's
    /// source artifact inside the platform's container.
    ///
    /// Callers racing on the same `(release, platform)` serialize on a
    /// named lock; the losers observe the winner's committed result instead
    /// of starting a second build. `force` bypasses the already-built
    /// short-circuit but not the lock.
    pub async fn rebuild(&self, build_id: i64, force: bool) -> Result<BuildDetail, BuildError> {
        let detail = self
            .store
            .build_detail(build_id)
            .await?
            .ok_or(BuildError::NotFound("build"))?;

        let key = format!("{}-{}", detail.release.id, detail.platform.id);
        let lock = self.locks.acquire(&key).await;
        let _guard = lock.lock().await;

        // Re-read under the lock: another caller may have just built it.
        let detail = self
            .store
            .build_detail(build_id)
            .await?
            .ok_or(BuildError::NotFound("build"))?;
        if detail.build.is_built() && !force {
            debug!(build_id, "already built");
            return Ok(detail);
        }

        let spec = ContainerSpec::from_platform(&detail.platform)?;
        let started = jiff::Timestamp::now();
        let outcome = self.run(&detail, &spec).await;
        let finished = jiff::Timestamp::now();

        match outcome {
            Ok((artifact, metadata, log)) => {
                let filename = artifact
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| BuildError::failed("artifact has no filename", &*log))?
                    .to_string();
                let upload_path = detail.upload_path(&filename);

                let bytes = fs_err::tokio::read(&artifact).await?;
                let md5_digest = hex::encode(Md5::digest(&bytes));
                let filesize = i64::try_from(bytes.len()).unwrap_or(i64::MAX);

                self.storage.put(&upload_path, &artifact).await?;
                self.store
                    .commit_build(
                        detail.build.id,
                        &BuildRecord {
                            artifact_blob: upload_path,
                            md5_digest,
                            filesize,
                            build_timestamp: started.as_second(),
                            build_duration: finished.as_second() - started.as_second(),
                            metadata,
                            build_log: log,
                        },
                    )
                    .await?;

                let package = PackageName::new(&detail.package.slug)
                    .map_err(|err| BuildError::BadMetadata(err.to_string()))?;
                self.cache.invalidate_package(&detail.index.slug, &package);

                info!(
                    build_id,
                    package = %detail.package.slug,
                    version = %detail.release.version,
                    platform = %detail.platform.slug,
                    "built"
                );
                self.store
                    .build_detail(build_id)
                    .await?
                    .ok_or(BuildError::NotFound("build"))
            }
            Err(BuildError::Failed { reason, log }) => {
                warn!(build_id, %reason, "build failed");
                self.store.record_build_log(detail.build.id, &log).await?;
                Err(BuildError::Failed { reason, log })
            }
            Err(err) => Err(err),
        }
    }

    /// Materialize a direct-URL requirement in a throwaway workspace for
    /// the given platform and extract its metadata; nothing is persisted.
    pub async fn build_external(
        &self,
        platform: &gannet_store::Platform,
        url: &url::Url,
    ) -> Result<ExternalBuild, BuildError> {
        let (package_name, version) = crate::external::parse_egg_fragment(url)?;
        let spec = ContainerSpec::from_platform(platform)?;

        let workspace = Workspace::create().await?;
        let filename = url
            .path_segments()
            .and_then(Iterator::last)
            .filter(|segment| !segment.is_empty())
            .unwrap_or("source")
            .to_string();
        self.download(url.as_str(), &workspace.source_dir().join(&filename))
            .await?;

        let outcome = container::invoke(&spec, workspace.path(), &filename).await?;
        if !outcome.success {
            return Err(BuildError::failed("container exited non-zero", outcome.log));
        }
        let (_artifact, metadata) = workspace.collect_output(&outcome.log)?;
        Ok(ExternalBuild {
            package_name,
            version,
            external_url: url.clone(),
            metadata,
        })
    }

    async fn run(
        &self,
        detail: &BuildDetail,
        spec: &ContainerSpec,
    ) -> Result<(PathBuf, serde_json::Value, String), BuildError> {
        if detail.release.url.is_empty() {
            return Err(BuildError::failed("release has no upstream URL", ""));
        }
        let workspace = Workspace::create().await?;
        let filename = detail
            .release
            .url
            .rsplit('/')
            .next()
            .unwrap_or("source")
            .to_string();
        self.download(&detail.release.url, &workspace.source_dir().join(&filename))
            .await?;

        let outcome = container::invoke(spec, workspace.path(), &filename).await?;
        if !outcome.success {
            return Err(BuildError::failed("container exited non-zero", outcome.log));
        }
        let (artifact, metadata) = workspace.collect_output(&outcome.log)?;
        Ok((artifact, metadata, outcome.log))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), BuildError> {
        debug!(url, "downloading source artifact");
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = fs_err::tokio::File::create(dest).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

/// A temporary build workspace: `source/` holds the downloaded artifact,
/// `output/` receives the wheel and its `metadata.json`.
pub(crate) struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub(crate) async fn create() -> Result<Self, BuildError> {
        let dir = tempfile::Builder::new().prefix("gannet-build-").tempdir()?;
        fs_err::create_dir(dir.path().join("source"))?;
        fs_err::create_dir(dir.path().join("output"))?;
        Ok(Self { dir })
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn source_dir(&self) -> PathBuf {
        self.dir.path().join("source")
    }

    /// The single wheel and parsed `metadata.json` the container left in
    /// `output/`.
    pub(crate) fn collect_output(
        &self,
        log: &str,
    ) -> Result<(PathBuf, serde_json::Value), BuildError> {
        let output = self.dir.path().join("output");
        let mut wheels = Vec::new();
        for entry in fs_err::read_dir(&output)? {
            let path = entry?.path();
            if path.extension().is_some_and(|extension| extension == "whl") {
                wheels.push(path);
            }
        }
        let artifact = match wheels.as_slice() {
            [artifact] => artifact.clone(),
            [] => return Err(BuildError::failed("container produced no wheel", log)),
            _ => {
                return Err(BuildError::failed(
                    "container produced more than one wheel",
                    log,
                ))
            }
        };
        let metadata = fs_err::read_to_string(output.join("metadata.json"))
            .map_err(|_| BuildError::failed("container produced no metadata.json", log))?;
        let metadata = serde_json::from_str(&metadata)
            .map_err(|err| BuildError::BadMetadata(err.to_string()))?;
        Ok((artifact, metadata))
    }
}
