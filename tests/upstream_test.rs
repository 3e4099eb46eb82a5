//! Integration tests for [`UpstreamClient`] against a wiremock registry:
//! native API vs mirror-protocol fallback, retry policy, archive streaming.

use std::time::Duration;

use futures_util::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use speculum::{
    Platform, ProviderApi, ProviderCoordinate, RetryConfig, SpeculumError, UpstreamClient,
    UpstreamConfig, VersionFetch,
};

fn client() -> UpstreamClient {
    let config = UpstreamConfig::new()
        .scheme("http")
        .timeout(Duration::from_secs(5))
        .retry(
            RetryConfig::new()
                .max_retries(2)
                .initial_delay(Duration::from_millis(1)),
        );
    UpstreamClient::new(config).unwrap()
}

fn coord(server: &MockServer) -> ProviderCoordinate {
    ProviderCoordinate::new(server.address().to_string(), "hashicorp", "aws").unwrap()
}

async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/terraform.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"providers.v1": "/v1/providers/"})),
        )
        .mount(server)
        .await;
}

fn listing() -> serde_json::Value {
    json!({
        "id": "hashicorp/aws",
        "versions": [
            {"version": "1.0.0", "protocols": ["5.0"], "platforms": [
                {"os": "linux", "arch": "amd64"},
                {"os": "darwin", "arch": "amd64"}
            ]},
            {"version": "1.1.0", "protocols": ["5.0"], "platforms": [
                {"os": "linux", "arch": "amd64"}
            ]}
        ]
    })
}

// =============================================================================
// Protocol selection
// =============================================================================

#[tokio::test]
async fn provider_api_reflects_discovery() {
    let native = MockServer::start().await;
    mount_discovery(&native).await;
    let mirror_only = MockServer::start().await;

    let client = client();
    assert_eq!(
        client.provider_api(&native.address().to_string()).await,
        ProviderApi::Discovered {
            base_url: format!("http://{}/v1/providers", native.address())
        }
    );
    assert_eq!(
        client.provider_api(&mirror_only.address().to_string()).await,
        ProviderApi::Unsupported
    );
}

// =============================================================================
// fetch_index
// =============================================================================

#[tokio::test]
async fn native_index_comes_with_listing() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/providers/hashicorp/aws/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
        .expect(1)
        .mount(&server)
        .await;

    let (index, listing) = client().fetch_index(&coord(&server)).await.unwrap();
    let versions: Vec<_> = index.versions.keys().cloned().collect();
    assert_eq!(versions, ["1.0.0", "1.1.0"]);

    let listing = listing.expect("native API returns the bulk listing");
    assert_eq!(listing.versions.len(), 2);
    assert_eq!(listing.versions[0].platforms.len(), 2);
}

#[tokio::test]
async fn fallback_index_has_no_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hashicorp/aws/index.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"versions": {"2.0.0": {}, "2.1.0": {}}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (index, listing) = client().fetch_index(&coord(&server)).await.unwrap();
    assert!(listing.is_none());
    assert!(index.versions.contains_key("2.0.0"));
    assert!(index.versions.contains_key("2.1.0"));
}

#[tokio::test]
async fn missing_provider_is_not_found_on_both_paths() {
    let native = MockServer::start().await;
    mount_discovery(&native).await;
    let mirror_only = MockServer::start().await;

    for server in [&native, &mirror_only] {
        let err = client().fetch_index(&coord(server)).await.unwrap_err();
        assert!(
            matches!(err, SpeculumError::NotFound(_)),
            "expected NotFound, got {err:?}"
        );
        assert!(err.is_not_found());
    }
}

#[tokio::test]
async fn empty_listing_is_an_empty_index() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/providers/hashicorp/aws/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"versions": []})))
        .mount(&server)
        .await;

    let (index, listing) = client().fetch_index(&coord(&server)).await.unwrap();
    assert!(index.versions.is_empty());
    assert!(listing.unwrap().versions.is_empty());
}

#[tokio::test]
async fn malformed_listing_is_a_decode_error() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/providers/hashicorp/aws/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"versions\": 7}"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client().fetch_index(&coord(&server)).await.unwrap_err();
    assert!(matches!(err, SpeculumError::Decode { .. }));
}

// =============================================================================
// fetch_version
// =============================================================================

#[tokio::test]
async fn native_host_is_never_asked_per_version() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path("/hashicorp/aws/1.0.0.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"archives": {}})))
        .expect(0)
        .mount(&server)
        .await;

    let fetched = client()
        .fetch_version(&coord(&server), "1.0.0")
        .await
        .unwrap();
    assert_eq!(fetched, VersionFetch::FromListing);
}

#[tokio::test]
async fn fallback_host_serves_version_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hashicorp/aws/1.0.0.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "archives": {
                "linux_amd64": {
                    "url": "terraform-provider-aws_1.0.0_linux_amd64.zip",
                    "hashes": ["h1:abc="]
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let VersionFetch::Document(document) = client()
        .fetch_version(&coord(&server), "1.0.0")
        .await
        .unwrap()
    else {
        panic!("expected a version document");
    };
    let archive = &document.archives["linux_amd64"];
    assert_eq!(archive.url, "terraform-provider-aws_1.0.0_linux_amd64.zip");
    assert_eq!(archive.hashes, Some(vec!["h1:abc=".to_string()]));
}

#[tokio::test]
async fn version_with_url_syntax_is_never_sent_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"archives": {}})))
        .expect(0)
        .mount(&server)
        .await;

    let client = client();
    for version in ["1.0.0?x", "1.0.0#x", "1.0.0%3Fx"] {
        let err = client
            .fetch_version(&coord(&server), version)
            .await
            .unwrap_err();
        assert!(
            matches!(err, SpeculumError::InvalidCoordinate(_)),
            "{version}: expected InvalidCoordinate, got {err:?}"
        );
        let err = client
            .fetch_download_url(&coord(&server), version, &Platform::new("linux", "amd64"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeculumError::InvalidCoordinate(_)));
    }
}

// =============================================================================
// fetch_download_url
// =============================================================================

#[tokio::test]
async fn download_url_comes_from_native_api() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path(
            "/v1/providers/hashicorp/aws/1.0.0/download/linux/amd64",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "protocols": ["5.0"],
            "os": "linux",
            "arch": "amd64",
            "filename": "terraform-provider-aws_1.0.0_linux_amd64.zip",
            "download_url": "https://releases.example.com/aws_1.0.0_linux_amd64.zip",
            "shasum": "deadbeef"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let info = client()
        .fetch_download_url(&coord(&server), "1.0.0", &Platform::new("linux", "amd64"))
        .await
        .unwrap();
    assert_eq!(
        info.download_url,
        "https://releases.example.com/aws_1.0.0_linux_amd64.zip"
    );
    assert_eq!(info.shasum, "deadbeef");
}

#[tokio::test]
async fn download_url_requires_discovery() {
    let server = MockServer::start().await;
    let err = client()
        .fetch_download_url(&coord(&server), "1.0.0", &Platform::new("linux", "amd64"))
        .await
        .unwrap_err();
    assert!(matches!(err, SpeculumError::Discovery { .. }));
}

// =============================================================================
// Retry policy
// =============================================================================

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hashicorp/aws/index.json"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hashicorp/aws/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"versions": {"1.0.0": {}}})))
        .expect(1)
        .mount(&server)
        .await;

    let (index, _) = client().fetch_index(&coord(&server)).await.unwrap();
    assert!(index.versions.contains_key("1.0.0"));
}

#[tokio::test]
async fn retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hashicorp/aws/index.json"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = client().fetch_index(&coord(&server)).await.unwrap_err();
    assert!(matches!(
        err,
        SpeculumError::UpstreamStatus { status: 500, .. }
    ));
    assert!(err.is_transient());
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hashicorp/aws/index.json"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let err = client().fetch_index(&coord(&server)).await.unwrap_err();
    assert!(matches!(
        err,
        SpeculumError::UpstreamStatus { status: 403, .. }
    ));
    assert_eq!(err.status_code(), 502);
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hashicorp/aws/9.9.9.json"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = client()
        .fetch_version(&coord(&server), "9.9.9")
        .await
        .unwrap_err();
    assert!(matches!(err, SpeculumError::NotFound(_)));
}

// =============================================================================
// fetch_archive
// =============================================================================

#[tokio::test]
async fn archive_body_is_streamed() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/files/a.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let stream = client()
        .fetch_archive(&format!("{}/files/a.zip?signature=s3cr3t", server.uri()))
        .await
        .unwrap();
    let chunks: Vec<_> = stream.try_collect().await.unwrap();
    let received: Vec<u8> = chunks.concat();
    assert_eq!(received, body);
}

#[tokio::test]
async fn archive_errors_do_not_leak_signatures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/a.zip"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let err = client()
        .fetch_archive(&format!("{}/files/a.zip?signature=s3cr3t", server.uri()))
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SpeculumError::UpstreamStatus { status: 403, .. }
    ));
    assert!(!err.to_string().contains("s3cr3t"), "{err}");
}

#[tokio::test]
async fn archive_initial_response_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/a.zip"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/a.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"zip".to_vec()))
        .mount(&server)
        .await;

    let stream = client()
        .fetch_archive(&format!("{}/files/a.zip", server.uri()))
        .await
        .unwrap();
    let chunks: Vec<_> = stream.try_collect().await.unwrap();
    assert_eq!(chunks.concat(), b"zip");
}
