use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use gannet::server::{app, AppState};
use gannet::settings::Settings;
use gannet_build::BuildExecutor;
use gannet_cache::LinkCache;
use gannet_normalize::PackageName;
use gannet_storage::BlobStore;
use gannet_store::{IndexBackendKind, MetadataStore, PlatformKind};
use gannet_tasks::{sync_index, TaskQueue, TaskRuntime};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use verbose output.
    #[arg(global = true, long, short)]
    verbose: bool,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy server and its task workers.
    Serve,
    /// Synchronize one backing index with its upstream.
    Sync {
        /// Slug of the index to synchronize.
        index: String,
    },
    /// Register a backing index.
    AddIndex {
        slug: String,
        /// Upstream base URL.
        url: String,
        /// Backend kind: `simple-xmlrpc` or `dev-index`.
        #[arg(long, default_value = "simple-xmlrpc")]
        backend: IndexBackendKind,
    },
    /// Register a build platform from a JSON spec file.
    AddPlatform {
        slug: String,
        /// Path to the container spec (image, command, environment, ...).
        spec: PathBuf,
    },
    /// Force-rebuild one build, replacing any existing artifact.
    Rebuild {
        /// Id of the build row to rebuild.
        build_id: i64,
    },
    /// Drop the cached link listings of one package.
    InvalidateCache {
        /// Slug of the backing index.
        index: String,
        /// Package name; normalized before matching.
        package: String,
    },
    /// Apply pending database migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    gannet::logging::setup(cli.verbose)?;

    let settings = cli.settings;
    let store = MetadataStore::connect(&settings.database_url)
        .await
        .with_context(|| format!("opening {}", settings.database_url))?;

    match cli.command {
        Commands::Migrate => {
            // `connect` already ran the migrations.
            info!("migrations applied");
            Ok(())
        }
        Commands::AddIndex { slug, url, backend } => {
            store.create_index(&slug, &url, backend).await?;
            info!(%slug, "index registered");
            Ok(())
        }
        Commands::AddPlatform { slug, spec } => {
            let spec = fs_err::read_to_string(&spec)?;
            let spec: serde_json::Value = serde_json::from_str(&spec)?;
            store
                .create_platform(&slug, PlatformKind::Container, &spec)
                .await?;
            info!(%slug, "platform registered");
            Ok(())
        }
        Commands::Sync { index } => {
            let runtime = runtime(&settings, store.clone())?;
            let row = store.index_by_slug(&index).await?;
            sync_index(&runtime, row.id).await?;
            Ok(())
        }
        Commands::Rebuild { build_id } => {
            let runtime = runtime(&settings, store)?;
            runtime.executor.rebuild(build_id, true).await?;
            info!(build_id, "rebuilt");
            Ok(())
        }
        Commands::InvalidateCache { index, package } => {
            let runtime = runtime(&settings, store.clone())?;
            let row = store.index_by_slug(&index).await?;
            let package = PackageName::new(&package)?;
            runtime.cache.invalidate_package(&row.slug, &package);
            info!(index = %row.slug, %package, "listings invalidated");
            Ok(())
        }
        Commands::Serve => serve(settings, store).await,
    }
}

fn runtime(settings: &Settings, store: MetadataStore) -> Result<Arc<TaskRuntime>> {
    let storage = BlobStore::from_dsn(&settings.builds_storage_dsn, settings.blob_base_url()?)
        .context("configuring blob storage")?;
    let cache = Arc::new(LinkCache::new());
    let executor = Arc::new(BuildExecutor::new(
        store.clone(),
        storage.clone(),
        cache.clone(),
    ));
    let unsafe_packages: BTreeSet<_> = settings.unsafe_package_set();
    Ok(Arc::new(TaskRuntime {
        store,
        storage,
        cache,
        executor,
        unsafe_packages,
    }))
}

async fn serve(settings: Settings, store: MetadataStore) -> Result<()> {
    let runtime = runtime(&settings, store.clone())?;
    let queue = TaskQueue::new(runtime.clone());
    let workers = queue.spawn_workers(settings.workers);

    let state = AppState {
        store,
        storage: runtime.storage.clone(),
        cache: runtime.cache.clone(),
        queue,
        public_url: settings.public_url.clone(),
        always_redirect_downloads: settings.always_redirect_downloads,
    };

    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("binding {}", settings.bind))?;
    info!(bind = %settings.bind, public_url = %settings.public_url, "serving");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    for worker in workers {
        worker.abort();
    }
    Ok(())
}
