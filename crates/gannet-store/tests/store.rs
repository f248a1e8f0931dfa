use gannet_normalize::PackageName;
use gannet_store::{BuildRecord, CompilationStatus, IndexBackendKind, MetadataStore, PlatformKind};

async fn store_with_fixtures() -> (MetadataStore, i64, i64) {
    let store = MetadataStore::in_memory().await.unwrap();
    let platform = store
        .create_platform("linux-x64", PlatformKind::Container, &serde_json::json!({}))
        .await
        .unwrap();
    let index = store
        .create_index("pypi", "https://pypi.org/", IndexBackendKind::SimpleXmlRpc)
        .await
        .unwrap();
    (store, index.id, platform.id)
}

#[tokio::test]
async fn get_or_create_package_is_idempotent() {
    let (store, index_id, _) = store_with_fixtures().await;
    let slug = PackageName::new("Flask.API").unwrap();
    let first = store
        .get_or_create_package(index_id, "Flask.API", &slug)
        .await
        .unwrap();
    let second = store
        .get_or_create_package(index_id, "flask-api", &slug)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    // The display name from the first reference wins.
    assert_eq!(second.name, "Flask.API");
}

#[tokio::test]
async fn at_most_one_build_per_release_and_platform() {
    let (store, index_id, platform_id) = store_with_fixtures().await;
    let slug = PackageName::new("six").unwrap();
    let package = store
        .get_or_create_package(index_id, "six", &slug)
        .await
        .unwrap();
    let release = store
        .upsert_release(package.id, "1.15.0", "https://files.example/six-1.15.0.tar.gz", "d0adca")
        .await
        .unwrap();
    let first = store
        .get_or_create_build(release.id, platform_id)
        .await
        .unwrap();
    let second = store
        .get_or_create_build(release.id, platform_id)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert!(!first.is_built());
}

#[tokio::test]
async fn upsert_release_updates_url_and_digest() {
    let (store, index_id, _) = store_with_fixtures().await;
    let slug = PackageName::new("six").unwrap();
    let package = store
        .get_or_create_package(index_id, "six", &slug)
        .await
        .unwrap();
    let before = store
        .upsert_release(package.id, "1.15.0", "https://old.example/six.tar.gz", "aaaa")
        .await
        .unwrap();
    let after = store
        .upsert_release(package.id, "1.15.0", "https://new.example/six.tar.gz", "bbbb")
        .await
        .unwrap();
    assert_eq!(before.id, after.id);
    assert_eq!(after.url, "https://new.example/six.tar.gz");
    assert_eq!(after.md5_digest, "bbbb");
}

#[tokio::test]
async fn deleting_a_package_cascades() {
    let (store, index_id, platform_id) = store_with_fixtures().await;
    let slug = PackageName::new("gone").unwrap();
    let package = store
        .get_or_create_package(index_id, "gone", &slug)
        .await
        .unwrap();
    let release = store
        .upsert_release(package.id, "0.1", "https://files.example/gone-0.1.tar.gz", "cc")
        .await
        .unwrap();
    let build = store
        .get_or_create_build(release.id, platform_id)
        .await
        .unwrap();

    assert!(store.delete_package(index_id, &slug).await.unwrap());
    assert!(store.package_by_slug(index_id, &slug).await.unwrap().is_none());
    assert!(store.build_detail(build.id).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_releases_except_observed_set() {
    let (store, index_id, _) = store_with_fixtures().await;
    let slug = PackageName::new("lib").unwrap();
    let package = store
        .get_or_create_package(index_id, "lib", &slug)
        .await
        .unwrap();
    let keep = store
        .upsert_release(package.id, "2.0", "https://files.example/lib-2.0.tar.gz", "01")
        .await
        .unwrap();
    store
        .upsert_release(package.id, "1.0", "https://files.example/lib-1.0.tar.gz", "02")
        .await
        .unwrap();

    let removed = store
        .delete_releases_except(package.id, &[keep.id])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    let versions: Vec<String> = store
        .releases_for_package(package.id)
        .await
        .unwrap()
        .into_iter()
        .map(|release| release.version)
        .collect();
    assert_eq!(versions, ["2.0"]);
}

#[tokio::test]
async fn watermark_only_moves_forward() {
    let (store, index_id, _) = store_with_fixtures().await;
    store.advance_update_serial(index_id, 100).await.unwrap();
    store.advance_update_serial(index_id, 90).await.unwrap();
    let index = store.index_by_id(index_id).await.unwrap();
    assert_eq!(index.last_update_serial, Some(100));
}

#[tokio::test]
async fn commit_build_records_artifact() {
    let (store, index_id, platform_id) = store_with_fixtures().await;
    let slug = PackageName::new("six").unwrap();
    let package = store
        .get_or_create_package(index_id, "six", &slug)
        .await
        .unwrap();
    let release = store
        .upsert_release(package.id, "1.15.0", "https://files.example/six-1.15.0.tar.gz", "dd")
        .await
        .unwrap();
    let build = store
        .get_or_create_build(release.id, platform_id)
        .await
        .unwrap();

    store
        .commit_build(
            build.id,
            &BuildRecord {
                artifact_blob: "pypi/linux-x64/six/1.15.0/six-1.15.0-py2.py3-none-any.whl"
                    .to_string(),
                md5_digest: "ffff".to_string(),
                filesize: 10240,
                build_timestamp: 1_600_000_000,
                build_duration: 12,
                metadata: serde_json::json!({"run_requires": []}),
                build_log: "ok\n".to_string(),
            },
        )
        .await
        .unwrap();

    let detail = store.build_detail(build.id).await.unwrap().unwrap();
    assert!(detail.build.is_built());
    assert_eq!(detail.digest(), "ffff");
    assert_eq!(detail.filename(), "six-1.15.0-py2.py3-none-any.whl");
    assert_eq!(
        detail.upload_path("six-1.15.0-py2.py3-none-any.whl"),
        "pypi/linux-x64/six/1.15.0/six-1.15.0-py2.py3-none-any.whl"
    );
}

#[tokio::test]
async fn compiled_requirements_lifecycle() {
    let (store, _, platform_id) = store_with_fixtures().await;
    let row = store
        .create_compiled(platform_id, "app==1.0\n")
        .await
        .unwrap();
    assert_eq!(row.status, CompilationStatus::Pending);

    store
        .finish_compiled(row.id, CompilationStatus::Compiled, Some("app==1.0\n"), "done\n")
        .await
        .unwrap();
    let row = store.compiled_by_id(row.id).await.unwrap().unwrap();
    assert_eq!(row.status, CompilationStatus::Compiled);
    assert_eq!(row.compiled_requirements.as_deref(), Some("app==1.0\n"));
}

#[tokio::test]
async fn claimed_tasks_are_leased_not_lost() {
    let (store, _, _) = store_with_fixtures().await;
    store.enqueue_task("build", "{\"build_id\":1}", 100).await.unwrap();

    let claimed = store.claim_due_task(100, 600).await.unwrap().unwrap();
    assert_eq!(claimed.kind, "build");
    assert_eq!(claimed.attempts, 1);

    // Leased: not due again until the lease expires.
    assert!(store.claim_due_task(100, 600).await.unwrap().is_none());
    let reclaimed = store.claim_due_task(700, 600).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, claimed.id);
    assert_eq!(reclaimed.attempts, 2);

    store.delete_task(claimed.id).await.unwrap();
    assert!(store.claim_due_task(10_000, 600).await.unwrap().is_none());
}
