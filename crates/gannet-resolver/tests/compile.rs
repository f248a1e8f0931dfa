//! Compilation tests against an in-memory store and a build driver double
//! that "builds" from canned metadata.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use url::Url;

use gannet_build::ExternalBuild;
use gannet_normalize::PackageName;
use gannet_resolver::{BuildDriver, DependencyGraph, GraphFormatter, ResolveError};
use gannet_store::{
    BackingIndex, BuildDetail, BuildRecord, IndexBackendKind, MetadataStore, Platform,
    PlatformKind,
};

struct FakeDriver {
    store: MetadataStore,
    metadata: HashMap<(String, String), serde_json::Value>,
    builds: AtomicUsize,
}

impl FakeDriver {
    fn new(store: MetadataStore) -> Self {
        Self {
            store,
            metadata: HashMap::new(),
            builds: AtomicUsize::new(0),
        }
    }

    fn requires(mut self, name: &str, version: &str, requires: &[&str]) -> Self {
        self.metadata.insert(
            (name.to_string(), version.to_string()),
            serde_json::json!({
                "run_requires": [{"requires": requires}],
            }),
        );
        self
    }
}

#[async_trait]
impl BuildDriver for FakeDriver {
    async fn ensure_built(&self, detail: BuildDetail) -> Result<BuildDetail, ResolveError> {
        if detail.build.is_built() {
            return Ok(detail);
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        let key = (detail.package.slug.clone(), detail.release.version.clone());
        let metadata = self
            .metadata
            .get(&key)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"run_requires": []}));
        let filename = format!("{}-{}-py2.py3-none-any.whl", key.0, key.1);
        self.store
            .commit_build(
                detail.build.id,
                &BuildRecord {
                    artifact_blob: detail.upload_path(&filename),
                    md5_digest: "00".repeat(16),
                    filesize: 1,
                    build_timestamp: 1_600_000_000,
                    build_duration: 1,
                    metadata,
                    build_log: String::new(),
                },
            )
            .await?;
        self.store
            .build_detail(detail.build.id)
            .await?
            .ok_or(ResolveError::Metadata("build vanished".to_string()))
    }

    async fn build_external(
        &self,
        _platform: &Platform,
        url: &Url,
    ) -> Result<ExternalBuild, ResolveError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(ExternalBuild {
            package_name: PackageName::new("pkg").unwrap(),
            version: "1.0".to_string(),
            external_url: url.clone(),
            metadata: serde_json::json!({"run_requires": []}),
        })
    }
}

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

struct Fixture {
    store: MetadataStore,
    index: BackingIndex,
    platform: Platform,
}

impl Fixture {
    async fn new() -> Self {
        let store = MetadataStore::in_memory().await.unwrap();
        let platform = store
            .create_platform("linux-x64", PlatformKind::Container, &platform_spec())
            .await
            .unwrap();
        let index = store
            .create_index("pypi", "https://pypi.org/", IndexBackendKind::SimpleXmlRpc)
            .await
            .unwrap();
        Self {
            store,
            index,
            platform,
        }
    }

    async fn release(&self, name: &str, version: &str) {
        let slug = PackageName::new(name).unwrap();
        let package = self
            .store
            .get_or_create_package(self.index.id, name, &slug)
            .await
            .unwrap();
        self.store
            .upsert_release(
                package.id,
                version,
                &format!("https://files.example/{name}-{version}.tar.gz"),
                "ab",
            )
            .await
            .unwrap();
    }

    fn graph<'a>(&self, driver: &'a FakeDriver) -> DependencyGraph<'a> {
        DependencyGraph::new(
            &driver.store,
            driver,
            vec![self.index.clone()],
            self.platform.clone(),
        )
        .unwrap()
    }
}

#[tokio::test]
async fn pins_transitive_dependencies_excluding_prereleases() {
    let fixture = Fixture::new().await;
    fixture.release("app", "1.0").await;
    for version in ["1.9", "2.0", "2.1", "3.0rc1"] {
        fixture.release("lib", version).await;
    }
    let driver = FakeDriver::new(fixture.store.clone()).requires("app", "1.0", &["lib>=2,<3"]);

    let mut graph = fixture.graph(&driver);
    graph.compile("app==1.0\n").await.unwrap();

    let formatted = GraphFormatter::new().format(&graph);
    assert_eq!(formatted, "app==1.0\nlib==2.1   # via app\n");

    let log = graph.log();
    assert!(log.contains("ROUND 1"), "{log}");
    assert!(log.contains("ROUND 2: stable, done"), "{log}");
}

#[tokio::test]
async fn rejects_incompatible_url_and_version_pin() {
    let fixture = Fixture::new().await;
    let driver = FakeDriver::new(fixture.store.clone());

    let mut graph = fixture.graph(&driver);
    let err = graph
        .compile("pkg @ https://example.com/pkg-1.0.tar.gz#egg=pkg==1.0\npkg==2.0\n")
        .await
        .unwrap_err();

    assert!(
        matches!(err, ResolveError::IncompatibleRequirements { .. }),
        "{err:?}"
    );
    // The conflict is detected at seed time, before anything builds.
    assert_eq!(driver.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unsatisfied_requirement_reports_candidates() {
    let fixture = Fixture::new().await;
    for version in ["1.9", "2.0"] {
        fixture.release("lib", version).await;
    }
    let driver = FakeDriver::new(fixture.store.clone());

    let mut graph = fixture.graph(&driver);
    let err = graph.compile("lib>=4\n").await.unwrap_err();

    let ResolveError::UnsatisfiedDependency { candidates, .. } = err else {
        panic!("expected UnsatisfiedDependency, got {err:?}");
    };
    assert_eq!(candidates, ["1.9", "2.0"]);
    assert!(graph.log().contains("Could not find a version"));
}

#[tokio::test]
async fn orphaned_nodes_are_removed_after_reselection() {
    let fixture = Fixture::new().await;
    fixture.release("app", "1.0").await;
    fixture.release("app", "2.0").await;
    fixture.release("helper", "1.0").await;
    // app 2.0 pulls in helper, which in turn forbids app 2.x; the graph
    // must re-select app 1.0 and then drop the orphaned helper.
    let driver = FakeDriver::new(fixture.store.clone())
        .requires("app", "2.0", &["helper"])
        .requires("helper", "1.0", &["app<2"]);

    let mut graph = fixture.graph(&driver);
    graph.compile("app\n").await.unwrap();

    let formatted = GraphFormatter::new().format(&graph);
    assert_eq!(formatted, "app==1.0\n");
    assert!(graph.log().contains("removing"));
}

#[tokio::test]
async fn markers_not_matching_the_platform_are_dropped() {
    let fixture = Fixture::new().await;
    let driver = FakeDriver::new(fixture.store.clone());

    let mut graph = fixture.graph(&driver);
    graph
        .compile("pywin32; sys_platform == 'win32'\n")
        .await
        .unwrap();

    assert_eq!(GraphFormatter::new().format(&graph), "");
    assert_eq!(driver.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unsafe_packages_are_commented_out_last() {
    let fixture = Fixture::new().await;
    fixture.release("app", "1.0").await;
    fixture.release("setuptools", "68.0.0").await;
    let driver = FakeDriver::new(fixture.store.clone()).requires("app", "1.0", &["setuptools"]);

    let mut graph = fixture.graph(&driver);
    graph.compile("app==1.0\n").await.unwrap();

    let formatted = GraphFormatter::new().format(&graph);
    assert!(formatted.starts_with("app==1.0\n"), "{formatted}");
    assert!(
        formatted.ends_with("# setuptools==68.0.0   # via app\n"),
        "{formatted}"
    );
    assert!(formatted.contains("unsafe in a requirements file"));
}

#[tokio::test]
async fn url_requirements_come_first_in_the_output() {
    let fixture = Fixture::new().await;
    fixture.release("app", "1.0").await;
    let driver = FakeDriver::new(fixture.store.clone());

    let mut graph = fixture.graph(&driver);
    graph
        .compile("app==1.0\npkg @ https://example.com/pkg-1.0.tar.gz#egg=pkg==1.0\n")
        .await
        .unwrap();

    let formatted = GraphFormatter::new().format(&graph);
    assert_eq!(
        formatted,
        "https://example.com/pkg-1.0.tar.gz#egg=pkg==1.0\n\napp==1.0\n"
    );
}
