//! In-flight request accounting around `fetch`.

use activitypub_loadtest::aggregate::Aggregator;
use activitypub_loadtest::metrics::CONCURRENT_REQUESTS;
use activitypub_loadtest::response::fetch;
use serial_test::serial;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn slow_server(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"type":"Service"}"#, "application/activity+json")
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
#[serial]
async fn test_cancelled_fetch_releases_concurrent_requests() {
    let server = slow_server(Duration::from_secs(5)).await;
    let client = reqwest::Client::new();
    let aggregator = Aggregator::new();
    let url = format!("{}/", server.uri());

    let before = CONCURRENT_REQUESTS.get();
    let result = tokio::time::timeout(
        Duration::from_millis(200),
        fetch(&client, &url, &aggregator),
    )
    .await;

    assert!(result.is_err(), "fetch should still be waiting");
    assert_eq!(CONCURRENT_REQUESTS.get(), before);
    assert_eq!(aggregator.request_durations().count(), 0);
}

#[tokio::test]
#[serial]
async fn test_completed_fetch_releases_concurrent_requests() {
    let server = slow_server(Duration::ZERO).await;
    let client = reqwest::Client::new();
    let aggregator = Aggregator::new();

    let before = CONCURRENT_REQUESTS.get();
    let response = fetch(&client, &format!("{}/", server.uri()), &aggregator).await;

    assert_eq!(response.status, Some(200));
    assert_eq!(CONCURRENT_REQUESTS.get(), before);
    assert_eq!(aggregator.request_durations().count(), 1);
}
