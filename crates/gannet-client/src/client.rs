use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::ClientBuilder;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use url::Url;

use gannet_normalize::PackageName;

use crate::descriptor::ReleaseDescriptor;
use crate::{dev_index, pypi, Error};

/// The capability variants an upstream can speak. A fixed dispatch table,
/// not a trait object: new backends are a new variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    /// PyPI-style: JSON release listing plus the XML-RPC changelog.
    SimpleXmlRpc,
    /// devpi-style: PEP 691 simple JSON pages with a serial header.
    DevIndex,
}

/// One upstream change event. A `None` name advances the watermark without
/// naming a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub name: Option<String>,
    pub serial: i64,
}

/// A builder for an [`IndexClient`].
#[derive(Debug, Clone)]
pub struct IndexClientBuilder {
    timeout: Duration,
    retries: u32,
}

impl Default for IndexClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retries: 3,
        }
    }
}

impl IndexClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn build(self, base: Url, backend: IndexBackend) -> Result<IndexClient, Error> {
        let client = ClientBuilder::new()
            .user_agent("gannet")
            .pool_max_idle_per_host(20)
            .timeout(self.timeout)
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(self.retries);
        let client = reqwest_middleware::ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        // `Url::join` treats a base without a trailing slash as a file;
        // make sure relative paths append.
        let base = if base.path().ends_with('/') {
            base
        } else {
            Url::parse(&format!("{base}/"))?
        };

        Ok(IndexClient {
            backend,
            base,
            client,
        })
    }
}

/// A client for one upstream package index.
#[derive(Debug, Clone)]
pub struct IndexClient {
    backend: IndexBackend,
    base: Url,
    client: ClientWithMiddleware,
}

impl IndexClient {
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// All releases of a package, as `version → descriptors`. Fails with
    /// [`Error::PackageNotFound`] when the upstream does not know the name.
    pub async fn get_package_releases(
        &self,
        name: &PackageName,
    ) -> Result<BTreeMap<String, Vec<ReleaseDescriptor>>, Error> {
        match self.backend {
            IndexBackend::SimpleXmlRpc => {
                pypi::get_package_releases(&self.client, &self.base, name).await
            }
            IndexBackend::DevIndex => {
                dev_index::get_package_releases(&self.client, &self.base, name).await
            }
        }
    }

    /// The descriptors of a single version.
    pub async fn get_version_releases(
        &self,
        name: &PackageName,
        version: &str,
    ) -> Result<Vec<ReleaseDescriptor>, Error> {
        match self.backend {
            IndexBackend::SimpleXmlRpc => {
                pypi::get_version_releases(&self.client, &self.base, name, version).await
            }
            IndexBackend::DevIndex => {
                dev_index::get_version_releases(&self.client, &self.base, name, version).await
            }
        }
    }

    /// Change events strictly after `since`, in non-decreasing serial
    /// order.
    pub async fn updated_packages(&self, since: Option<i64>) -> Result<Vec<ChangeEvent>, Error> {
        match self.backend {
            IndexBackend::SimpleXmlRpc => {
                pypi::updated_packages(&self.client, &self.base, since).await
            }
            IndexBackend::DevIndex => {
                dev_index::updated_packages(&self.client, &self.base, since).await
            }
        }
    }
}
