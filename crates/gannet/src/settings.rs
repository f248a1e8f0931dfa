use std::collections::BTreeSet;
use std::net::SocketAddr;

use clap::Args;
use url::Url;

use gannet_normalize::PackageName;

/// Server configuration, from flags or the environment.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// SQLite database URL.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://gannet.db")]
    pub database_url: String,

    /// DSN selecting the blob backend for built artifacts.
    #[arg(long, env = "BUILDS_STORAGE_DSN", default_value = "file:///var/lib/gannet/builds")]
    pub builds_storage_dsn: String,

    /// Public base URL under which this proxy is reachable; advertised
    /// download and blob URLs are derived from it.
    #[arg(long, env = "GANNET_PUBLIC_URL", default_value = "http://localhost:8000/")]
    pub public_url: Url,

    /// Always bounce downloads through the redirect endpoint, even for
    /// built artifacts. Turning this off skips one request per download at
    /// the cost of per-package download stats.
    #[arg(
        long,
        env = "ALWAYS_REDIRECT_DOWNLOADS",
        default_value_t = true,
        action = clap::ArgAction::Set,
        value_name = "BOOL"
    )]
    pub always_redirect_downloads: bool,

    /// Comma-separated packages the graph formatter comments out.
    #[arg(long, env = "UNSAFE_PACKAGES", default_value = "setuptools")]
    pub unsafe_packages: String,

    /// Address to serve on.
    #[arg(long, env = "GANNET_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    /// Number of task workers to run alongside the server.
    #[arg(long, env = "GANNET_WORKERS", default_value_t = 4)]
    pub workers: usize,
}

impl Settings {
    /// The parsed `UNSAFE_PACKAGES` set; unparsable names are ignored.
    pub fn unsafe_package_set(&self) -> BTreeSet<PackageName> {
        self.unsafe_packages
            .split(',')
            .filter_map(|name| PackageName::new(name.trim()).ok())
            .collect()
    }

    /// The base URL blobs are served under.
    pub fn blob_base_url(&self) -> Result<Url, url::ParseError> {
        self.public_url.join("blobs/")
    }
}
