use indoc::indoc;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gannet_client::{best_release, DistKind, Error, IndexBackend, IndexClientBuilder};
use gannet_normalize::PackageName;

fn client(server: &MockServer, backend: IndexBackend) -> gannet_client::IndexClient {
    IndexClientBuilder::new()
        .retries(0)
        .build(Url::parse(&server.uri()).unwrap(), backend)
        .unwrap()
}

#[tokio::test]
async fn pypi_package_releases() {
    let server = MockServer::start().await;
    let body = indoc! {r#"
        {
          "releases": {
            "1.14.0": [
              {
                "packagetype": "sdist",
                "url": "https://files.example/six-1.14.0.tar.gz",
                "filename": "six-1.14.0.tar.gz",
                "md5_digest": "aaaa"
              }
            ],
            "1.15.0": [
              {
                "packagetype": "bdist_wheel",
                "url": "https://files.example/six-1.15.0-py2.py3-none-any.whl",
                "filename": "six-1.15.0-py2.py3-none-any.whl",
                "digests": {"md5": "bbbb"}
              },
              {
                "packagetype": "sdist",
                "url": "https://files.example/six-1.15.0.tar.gz",
                "filename": "six-1.15.0.tar.gz",
                "md5_digest": "cccc"
              }
            ]
          }
        }
    "#};
    Mock::given(method("GET"))
        .and(path("/pypi/six/json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
        .mount(&server)
        .await;

    let client = client(&server, IndexBackend::SimpleXmlRpc);
    let name = PackageName::new("six").unwrap();
    let releases = client.get_package_releases(&name).await.unwrap();

    assert_eq!(releases.len(), 2);
    let chosen = best_release(&releases["1.15.0"]).unwrap();
    assert_eq!(chosen.kind, DistKind::Sdist);
    assert_eq!(chosen.md5_digest, "cccc");
}

#[tokio::test]
async fn pypi_missing_package_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pypi/gone/json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client(&server, IndexBackend::SimpleXmlRpc);
    let name = PackageName::new("gone").unwrap();
    let err = client.get_package_releases(&name).await.unwrap_err();
    assert!(matches!(err, Error::PackageNotFound(_)), "{err:?}");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn pypi_changelog_since_serial() {
    let server = MockServer::start().await;
    let body = indoc! {r#"
        <?xml version="1.0"?>
        <methodResponse><params><param><value><array><data>
          <value><array><data>
            <value><string>six</string></value>
            <value><string>1.15.0</string></value>
            <value><int>1590000000</int></value>
            <value><string>new release</string></value>
            <value><int>101</int></value>
          </data></array></value>
          <value><array><data>
            <value><string>gone</string></value>
            <value><string></string></value>
            <value><int>1590000100</int></value>
            <value><string>remove project</string></value>
            <value><int>102</int></value>
          </data></array></value>
        </data></array></value></param></params></methodResponse>
    "#};
    Mock::given(method("POST"))
        .and(path("/pypi"))
        .and(body_string_contains("changelog_since_serial"))
        .and(body_string_contains("<int>100</int>"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/xml"))
        .mount(&server)
        .await;

    let client = client(&server, IndexBackend::SimpleXmlRpc);
    let events = client.updated_packages(Some(100)).await.unwrap();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].name.as_deref(), Some("six"));
    assert_eq!(events[0].serial, 101);
    assert_eq!(events[1].serial, 102);
}

#[tokio::test]
async fn dev_index_releases_from_filenames() {
    let server = MockServer::start().await;
    let body = indoc! {r#"
        {
          "files": [
            {
              "filename": "six-1.15.0.tar.gz",
              "url": "https://dev.example/six-1.15.0.tar.gz",
              "hashes": {"md5": "dddd", "sha256": "unused"}
            },
            {
              "filename": "six-1.15.0-py2.py3-none-any.whl",
              "url": "https://dev.example/six-1.15.0-py2.py3-none-any.whl",
              "hashes": {}
            },
            {
              "filename": "not-six-9.9.tar.gz",
              "url": "https://dev.example/not-six-9.9.tar.gz",
              "hashes": {}
            }
          ]
        }
    "#};
    Mock::given(method("GET"))
        .and(path("/six/"))
        .and(header("Accept", "application/vnd.pypi.simple.v1+json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
        .mount(&server)
        .await;

    let client = client(&server, IndexBackend::DevIndex);
    let name = PackageName::new("six").unwrap();
    let releases = client.get_package_releases(&name).await.unwrap();

    assert_eq!(releases.len(), 1);
    assert_eq!(releases["1.15.0"].len(), 2);
    assert_eq!(
        best_release(&releases["1.15.0"]).unwrap().md5_digest,
        "dddd"
    );
}

#[tokio::test]
async fn dev_index_change_events_from_serial_header() {
    let server = MockServer::start().await;
    let body = r#"{"projects": [{"name": "six"}, {"name": "flask"}]}"#;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body, "application/vnd.pypi.simple.v1+json")
                .insert_header("X-DEVPI-SERIAL", "42"),
        )
        .mount(&server)
        .await;

    let client = client(&server, IndexBackend::DevIndex);

    // Behind the server serial: the full listing is replayed.
    let events = client.updated_packages(Some(40)).await.unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|event| event.serial == 42));
    assert_eq!(events[2].name, None);

    // Caught up: nothing to do.
    let events = client.updated_packages(Some(42)).await.unwrap();
    assert!(events.is_empty());
}
