//! Walk tests against a mock ActivityPub server.

use activitypub_loadtest::actor::ActorDescriptor;
use activitypub_loadtest::aggregate::Aggregator;
use activitypub_loadtest::client::{build_client, ClientConfig};
use activitypub_loadtest::errors::ErrorType;
use activitypub_loadtest::setup::run_setup;
use activitypub_loadtest::walker::Walker;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AP_JSON: &str = "application/activity+json";

fn ap(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), AP_JSON)
}

fn walker() -> (Walker, Aggregator) {
    let client = build_client(&ClientConfig {
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .expect("client builds")
    .client;
    let aggregator = Aggregator::new();
    (Walker::new(client, aggregator.clone(), 100), aggregator)
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate, times: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_service_actor_outbox_one_page() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount(
        &server,
        "/",
        ap(json!({
            "id": format!("{}/", base),
            "type": "Service",
            "name": "self",
            "outbox": format!("{}/outbox", base),
        })),
        1,
    )
    .await;
    mount(
        &server,
        "/outbox",
        ap(json!({
            "id": format!("{}/outbox", base),
            "type": "OrderedCollection",
            "first": format!("{}/outbox/page/1", base),
        })),
        1,
    )
    .await;
    mount(
        &server,
        "/outbox/page/1",
        ap(json!({
            "id": format!("{}/outbox/page/1", base),
            "type": "OrderedCollectionPage",
            "orderedItems": [],
        })),
        1,
    )
    .await;

    let (walker, aggregator) = walker();
    let report = walker
        .walk_actor(&ActorDescriptor::service_root(&base))
        .await
        .expect("actor has an id");

    assert_eq!(report.requests(), 3);
    assert!(report.all_passed(), "{:#?}", report);
    assert_eq!(report.collections.len(), 1);
    assert_eq!(report.collections[0].pages.len(), 1);
    assert_eq!(aggregator.pages(), 1);

    let errors = aggregator.error_rate();
    assert_eq!(errors.failed, 0);
    // actor: status + content type + body size; collection and page: those plus type
    assert_eq!(errors.total, 3 + 4 + 4);
}

#[tokio::test]
async fn test_server_error_with_empty_body_records_three_failures() {
    let server = MockServer::start().await;
    mount(&server, "/", ResponseTemplate::new(500), 1).await;

    let (walker, aggregator) = walker();
    let report = walker
        .walk_actor(&ActorDescriptor::service_root(&server.uri()))
        .await
        .unwrap();

    assert!(report.collections.is_empty());
    let errors = aggregator.error_rate();
    assert_eq!(errors.failed, 3);
    assert_eq!(errors.total, 3);
    for error_type in [ErrorType::ResponseStatus, ErrorType::ContentType, ErrorType::BodySize] {
        assert_eq!(aggregator.error_rate_for(error_type).failed, 1, "{}", error_type);
    }
    assert_eq!(aggregator.error_rate_for(ErrorType::ActivityPub).total, 0);
}

#[tokio::test]
async fn test_wrong_content_type_with_body_only_fails_content_type() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/",
        ResponseTemplate::new(200).set_body_raw("<html>hi</html>", "text/html"),
        1,
    )
    .await;

    let (walker, aggregator) = walker();
    walker
        .walk_actor(&ActorDescriptor::service_root(&server.uri()))
        .await
        .unwrap();

    assert_eq!(aggregator.error_rate_for(ErrorType::ContentType).failed, 1);
    assert_eq!(aggregator.error_rate_for(ErrorType::BodySize).failed, 0);
    assert_eq!(aggregator.error_rate_for(ErrorType::ResponseStatus).failed, 0);
}

#[tokio::test]
async fn test_pagination_stops_when_next_is_own_id() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount(
        &server,
        "/inbox",
        ap(json!({
            "id": format!("{}/inbox", base),
            "type": "OrderedCollection",
            "first": format!("{}/inbox/page/1", base),
        })),
        1,
    )
    .await;
    mount(
        &server,
        "/inbox/page/1",
        ap(json!({
            "id": format!("{}/inbox/page/1", base),
            "type": "OrderedCollectionPage",
            "next": format!("{}/inbox/page/1", base),
        })),
        1,
    )
    .await;

    let (walker, _) = walker();
    let report = walker.walk_collection(&format!("{}/inbox", base)).await;
    assert_eq!(report.pages.len(), 1);
}

#[tokio::test]
async fn test_pagination_cycle_terminates() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount(
        &server,
        "/followers",
        ap(json!({
            "id": format!("{}/followers", base),
            "type": "Collection",
            "first": format!("{}/followers/page/1", base),
        })),
        1,
    )
    .await;
    mount(
        &server,
        "/followers/page/1",
        ap(json!({
            "id": format!("{}/followers/page/1", base),
            "type": "CollectionPage",
            "next": format!("{}/followers/page/2", base),
        })),
        1,
    )
    .await;
    mount(
        &server,
        "/followers/page/2",
        ap(json!({
            "id": format!("{}/followers/page/2", base),
            "type": "CollectionPage",
            "next": format!("{}/followers/page/1", base),
        })),
        1,
    )
    .await;

    let (walker, aggregator) = walker();
    let report = walker.walk_collection(&format!("{}/followers", base)).await;

    assert_eq!(report.pages.len(), 2);
    // "Collection" and "CollectionPage" are first in their allowed lists
    assert_eq!(aggregator.error_rate_for(ErrorType::ActivityPub).failed, 0);
}

#[tokio::test]
async fn test_linked_pages_fetch_each_page_once() {
    let server = MockServer::start().await;
    let base = server.uri();
    let pages = 4;

    mount(
        &server,
        "/outbox",
        ap(json!({
            "id": format!("{}/outbox", base),
            "type": "OrderedCollection",
            "first": format!("{}/outbox/page/1", base),
        })),
        1,
    )
    .await;
    for n in 1..=pages {
        let mut page = json!({
            "id": format!("{}/outbox/page/{}", base, n),
            "type": "OrderedCollectionPage",
        });
        if n < pages {
            page["next"] = json!(format!("{}/outbox/page/{}", base, n + 1));
        }
        mount(&server, &format!("/outbox/page/{}", n), ap(page), 1).await;
    }

    let (walker, _) = walker();
    let report = walker.walk_collection(&format!("{}/outbox", base)).await;
    assert_eq!(report.pages.len(), pages);
}

#[tokio::test]
async fn test_wrong_collection_type_is_activitypub_error() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount(
        &server,
        "/liked",
        ap(json!({"id": format!("{}/liked", base), "type": "Note"})),
        1,
    )
    .await;

    let (walker, aggregator) = walker();
    let report = walker.walk_collection(&format!("{}/liked", base)).await;

    let type_check = report
        .checks
        .iter()
        .find(|c| c.name == "has correct Type")
        .unwrap();
    assert!(!type_check.passed);
    assert_eq!(aggregator.error_rate_for(ErrorType::ActivityPub).failed, 1);
}

#[tokio::test]
async fn test_property_mismatch_fails_only_that_check() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount(
        &server,
        "/actors/alice",
        ap(json!({
            "id": format!("{}/actors/alice", base),
            "type": "Person",
            "preferredUsername": "bob",
        })),
        1,
    )
    .await;

    let actor = ActorDescriptor::new(format!("{}/actors/alice", base))
        .with_type("Person")
        .with_name("Alice")
        .with_property("preferredUsername", json!("alice"));

    let (walker, aggregator) = walker();
    let report = walker.walk_actor(&actor).await.unwrap();

    let failed: Vec<&str> = report
        .checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.name.as_str())
        .collect();
    // NAME is absent on the server, which is tolerated
    assert_eq!(failed, vec!["property PREFERREDUSERNAME"]);
    assert_eq!(aggregator.error_rate().failed, 0);
}

#[tokio::test]
async fn test_actor_without_id_is_skipped() {
    let (walker, aggregator) = walker();
    let mut actor = ActorDescriptor::new("unused").with_name("ghost");
    actor.id = None;

    assert!(walker.walk_actor(&actor).await.is_none());
    assert_eq!(aggregator.checks().total, 0);
}

#[tokio::test]
async fn test_transport_failure_fails_status_and_shape() {
    let (walker, aggregator) = walker();
    // Nothing listens on port 1
    let report = walker
        .walk_actor(&ActorDescriptor::new("http://127.0.0.1:1/"))
        .await
        .unwrap();

    assert!(!report.all_passed());
    assert_eq!(aggregator.error_rate().failed, 3);
}

#[tokio::test]
async fn test_redirects_are_not_followed() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount(
        &server,
        "/",
        ResponseTemplate::new(302).insert_header("location", format!("{}/elsewhere", base).as_str()),
        1,
    )
    .await;
    mount(&server, "/elsewhere", ap(json!({"type": "Service"})), 0).await;

    let (walker, aggregator) = walker();
    let report = walker
        .walk_actor(&ActorDescriptor::service_root(&base))
        .await
        .unwrap();

    // The 302 arrives as a plain response, not a transport error
    let status_check = report
        .checks
        .iter()
        .find(|c| c.name == "status 200")
        .unwrap();
    assert!(status_check
        .error_message
        .as_deref()
        .unwrap()
        .contains("got 302"));
    assert_eq!(aggregator.error_rate_for(ErrorType::ResponseStatus).failed, 1);
}

#[tokio::test]
async fn test_requests_carry_accept_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header_exists("accept"))
        .respond_with(ap(json!({"type": "Service"})))
        .expect(1)
        .mount(&server)
        .await;

    let (walker, aggregator) = walker();
    walker
        .walk_actor(&ActorDescriptor::service_root(&server.uri()))
        .await
        .unwrap();
    assert_eq!(aggregator.error_rate().failed, 0);
}

#[tokio::test]
async fn test_setup_checks_each_actor_once() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount(&server, "/", ap(json!({"type": "Service"})), 1).await;
    mount(&server, "/actors/gone", ResponseTemplate::new(404), 1).await;

    let mut missing = ActorDescriptor::new("x");
    missing.id = None;
    let actors = vec![
        ActorDescriptor::service_root(&base),
        ActorDescriptor::new(format!("{}/actors/gone", base)),
        missing,
    ];

    let (walker, _) = walker();
    assert_eq!(run_setup(&walker, &actors).await, 1);
}
