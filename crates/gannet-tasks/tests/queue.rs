//! Queue round-trips through real workers: the synchronous compile wait,
//! and terminal failure reporting.

use std::collections::BTreeSet;
use std::sync::Arc;

use url::Url;

use gannet_build::BuildExecutor;
use gannet_cache::LinkCache;
use gannet_storage::BlobStore;
use gannet_store::{CompilationStatus, IndexBackendKind, MetadataStore, PlatformKind};
use gannet_tasks::{Task, TaskQueue, TaskRuntime};

fn platform_spec() -> serde_json::Value {
    serde_json::json!({
        "image": "ghcr.io/example/wheel-builder:py311",
        "command": ["build-wheel", "{source}", "{output}"],
        "environment": {
            "implementation_name": "cpython",
            "implementation_version": "3.11.6",
            "os_name": "posix",
            "platform_machine": "x86_64",
            "platform_python_implementation": "CPython",
            "platform_release": "",
            "platform_system": "Linux",
            "platform_version": "",
            "python_full_version": "3.11.6",
            "python_version": "3.11",
            "sys_platform": "linux"
        }
    })
}

async fn queue_with_fixtures() -> (TaskQueue, i64, tempfile::TempDir) {
    let store = MetadataStore::in_memory().await.unwrap();
    let platform = store
        .create_platform("linux-x64", PlatformKind::Container, &platform_spec())
        .await
        .unwrap();
    store
        .create_index("pypi", "https://pypi.invalid/", IndexBackendKind::SimpleXmlRpc)
        .await
        .unwrap();

    let blob_dir = tempfile::tempdir().unwrap();
    let storage = BlobStore::from_dsn(
        Url::from_directory_path(blob_dir.path()).unwrap().as_str(),
        Url::parse("https://proxy.example/blobs/").unwrap(),
    )
    .unwrap();
    let cache = Arc::new(LinkCache::new());
    let executor = Arc::new(BuildExecutor::new(
        store.clone(),
        storage.clone(),
        cache.clone(),
    ));
    let runtime = Arc::new(TaskRuntime {
        store,
        storage,
        cache,
        executor,
        unsafe_packages: BTreeSet::new(),
    });
    (TaskQueue::new(runtime), platform.id, blob_dir)
}

#[tokio::test]
async fn compile_task_records_failure_and_releases_the_waiter() {
    let (queue, platform_id, _blobs) = queue_with_fixtures().await;
    let workers = queue.spawn_workers(2);

    // Nothing is importable, so the compilation fails; the task itself
    // still completes (resolver errors are never retried) and the waiter
    // reads the persisted outcome.
    let row = queue
        .runtime()
        .store
        .create_compiled(platform_id, "nosuchpkg==1.0\n")
        .await
        .unwrap();
    queue
        .enqueue_and_wait(&Task::Compile {
            compiled_id: row.id,
            index_slugs: vec!["pypi".to_string()],
        })
        .await
        .unwrap();

    let row = queue
        .runtime()
        .store
        .compiled_by_id(row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, CompilationStatus::Failed);
    assert!(row.compilation_log.contains("UnsatisfiedDependency"));
    assert!(row.compiled_requirements.is_none());

    for worker in workers {
        worker.abort();
    }
}

#[tokio::test]
async fn tasks_naming_missing_rows_fail_terminally() {
    let (queue, _, _blobs) = queue_with_fixtures().await;
    let workers = queue.spawn_workers(1);

    let err = queue
        .enqueue_and_wait(&Task::Compile {
            compiled_id: 999_999,
            index_slugs: vec!["pypi".to_string()],
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"), "{err}");

    for worker in workers {
        worker.abort();
    }
}
