//! Actor, collection and page traversal.
//!
//! A walk is strictly sequential: the actor is fetched and checked, then each
//! of its collections, then every page of each collection. Check failures
//! are recorded and the walk moves on; nothing here aborts an iteration.

use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::actor::ActorDescriptor;
use crate::aggregate::Aggregator;
use crate::checks::{collection_checks, collection_page_checks, run_checks, CheckResult};
use crate::response::fetch;

/// Actor properties that reference a collection, in traversal order.
pub const ACTOR_COLLECTIONS: [&str; 8] = [
    "inbox",
    "outbox",
    "following",
    "followers",
    "liked",
    "likes",
    "shares",
    "replies",
];

/// Default hard cap on pages fetched from one collection.
pub const DEFAULT_MAX_PAGES: usize = 1000;

/// The IRI a property value points at: the string itself, or the `id` of an
/// embedded object.
pub fn link_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

/// Collection IRIs referenced by an actor object: the fixed collection
/// properties first, then every entry of `streams`.
pub fn collection_urls(actor: &Value) -> Vec<String> {
    let mut collections: Vec<String> = ACTOR_COLLECTIONS
        .iter()
        .filter_map(|name| actor.get(*name))
        .filter_map(link_of)
        .collect();

    match actor.get("streams") {
        Some(Value::Array(streams)) => collections.extend(streams.iter().filter_map(link_of)),
        Some(single) => collections.extend(link_of(single)),
        None => {}
    }

    collections
}

fn own_id(object: &Value) -> Option<&str> {
    object.get("id").and_then(Value::as_str)
}

/// Traversal state while following `first`/`next` links.
#[derive(Debug)]
pub struct PageCursor {
    current_url: String,
    next_url: Option<String>,
    page_index: usize,
    visited: HashSet<String>,
    max_pages: usize,
}

impl PageCursor {
    /// Starts a traversal from a fetched collection. `first` becomes the
    /// initial target unless it points back at the collection itself.
    pub fn new(collection_url: &str, collection: &Value, max_pages: usize) -> Self {
        let mut visited = HashSet::new();
        visited.insert(collection_url.to_string());
        if let Some(id) = own_id(collection) {
            visited.insert(id.to_string());
        }

        let next_url = collection
            .get("first")
            .and_then(link_of)
            .filter(|first| Some(first.as_str()) != own_id(collection));

        Self {
            current_url: collection_url.to_string(),
            next_url,
            page_index: 0,
            visited,
            max_pages,
        }
    }

    /// Number of pages fetched so far.
    pub fn page_index(&self) -> usize {
        self.page_index
    }

    /// URL of the object most recently fetched.
    pub fn current_url(&self) -> &str {
        &self.current_url
    }

    /// Picks the next page to fetch given the current object, or `None`
    /// when the traversal is over.
    ///
    /// A `next` equal to the object's own `id` is ignored. A target that was
    /// already visited, or reaching the page cap, ends the traversal.
    pub fn next_target(&mut self, current: &Value) -> Option<String> {
        if let Some(next) = current.get("next").and_then(link_of) {
            if Some(next.as_str()) != own_id(current) {
                self.next_url = Some(next);
            }
        }

        let target = self.next_url.take()?;

        if self.visited.contains(&target) {
            warn!(
                url = %target,
                from = %self.current_url,
                page_index = self.page_index,
                "Pagination cycle detected, stopping"
            );
            return None;
        }
        if self.page_index >= self.max_pages {
            warn!(
                url = %target,
                max_pages = self.max_pages,
                "Page cap reached, stopping"
            );
            return None;
        }

        Some(target)
    }

    /// Marks `url` as fetched; `page` is the parsed body.
    pub fn page_fetched(&mut self, url: &str, page: &Value) {
        self.visited.insert(url.to_string());
        if let Some(id) = own_id(page) {
            self.visited.insert(id.to_string());
        }
        self.current_url = url.to_string();
        self.page_index += 1;
    }
}

/// Outcome of walking one page.
#[derive(Debug)]
pub struct PageReport {
    pub index: usize,
    pub url: String,
    pub checks: Vec<CheckResult>,
}

/// Outcome of walking one collection and its pages.
#[derive(Debug)]
pub struct CollectionReport {
    pub url: String,
    pub checks: Vec<CheckResult>,
    pub pages: Vec<PageReport>,
}

/// Outcome of walking one actor.
#[derive(Debug)]
pub struct ActorReport {
    pub actor_id: String,
    pub checks: Vec<CheckResult>,
    pub collections: Vec<CollectionReport>,
}

impl ActorReport {
    /// Number of HTTP requests the walk issued.
    pub fn requests(&self) -> usize {
        1 + self
            .collections
            .iter()
            .map(|c| 1 + c.pages.len())
            .sum::<usize>()
    }

    /// Whether every check of the walk passed.
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
            && self.collections.iter().all(|c| {
                c.checks.iter().all(|r| r.passed)
                    && c.pages.iter().all(|p| p.checks.iter().all(|r| r.passed))
            })
    }
}

/// Walks actors, their collections and collection pages.
#[derive(Clone)]
pub struct Walker {
    client: reqwest::Client,
    aggregator: Aggregator,
    max_pages: usize,
}

impl Walker {
    pub fn new(client: reqwest::Client, aggregator: Aggregator, max_pages: usize) -> Self {
        Self {
            client,
            aggregator,
            max_pages,
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Fetches and checks an actor, then walks every collection it links.
    ///
    /// Returns `None` for a descriptor without an `id`.
    pub async fn walk_actor(&self, actor: &ActorDescriptor) -> Option<ActorReport> {
        let Some(actor_id) = actor.id.as_deref() else {
            error!(
                name = ?actor.name,
                "invalid actor to test, missing \"id\" property"
            );
            return None;
        };

        let span = info_span!("actor", id = %actor_id);
        async {
            let response = fetch(&self.client, actor_id, &self.aggregator).await;
            let checks = run_checks(&actor.checks(), &response, &self.aggregator);

            let mut collections = Vec::new();
            for url in collection_urls(&response.json) {
                collections.push(self.walk_collection(&url).await);
            }

            debug!(collections = collections.len(), "Actor walk complete");
            Some(ActorReport {
                actor_id: actor_id.to_string(),
                checks,
                collections,
            })
        }
        .instrument(span)
        .await
    }

    /// Fetches and checks a collection, then paginates through it.
    pub async fn walk_collection(&self, url: &str) -> CollectionReport {
        let span = info_span!("collection", url = %url);
        async {
            let response = fetch(&self.client, url, &self.aggregator).await;
            let checks = run_checks(&collection_checks(), &response, &self.aggregator);
            let pages = self.walk_pages(url, &response.json).await;

            CollectionReport {
                url: url.to_string(),
                checks,
                pages,
            }
        }
        .instrument(span)
        .await
    }

    /// Follows `first`/`next` links from a fetched collection.
    pub async fn walk_pages(&self, collection_url: &str, collection: &Value) -> Vec<PageReport> {
        let mut cursor = PageCursor::new(collection_url, collection, self.max_pages);
        let mut current = collection.clone();
        let mut pages = Vec::new();

        while let Some(target) = cursor.next_target(&current) {
            let index = cursor.page_index();
            let span = info_span!("page", index = index, url = %target);

            let (checks, page) = async {
                let response = fetch(&self.client, &target, &self.aggregator).await;
                let checks = run_checks(&collection_page_checks(), &response, &self.aggregator);
                (checks, response.json)
            }
            .instrument(span)
            .await;

            self.aggregator.record_page();

            cursor.page_fetched(&target, &page);
            current = page;
            pages.push(PageReport {
                index,
                url: target,
                checks,
            });
        }

        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_urls_in_fixed_order_then_streams() {
        let actor = json!({
            "id": "https://x/",
            "followers": "https://x/followers",
            "inbox": "https://x/inbox",
            "outbox": "https://x/outbox",
            "streams": ["https://x/s1", "https://x/s2"],
            "name": "not a collection"
        });

        assert_eq!(
            collection_urls(&actor),
            vec![
                "https://x/inbox",
                "https://x/outbox",
                "https://x/followers",
                "https://x/s1",
                "https://x/s2",
            ]
        );
    }

    #[test]
    fn test_collection_urls_accept_embedded_objects() {
        let actor = json!({
            "liked": {"id": "https://x/liked", "type": "Collection"},
            "likes": {"type": "Collection"},
        });
        assert_eq!(collection_urls(&actor), vec!["https://x/liked"]);
    }

    #[test]
    fn test_collection_urls_of_non_object_is_empty() {
        assert!(collection_urls(&Value::Null).is_empty());
    }

    #[test]
    fn test_cursor_starts_at_first() {
        let collection = json!({"id": "https://x/outbox", "first": "https://x/outbox?page=1"});
        let mut cursor = PageCursor::new("https://x/outbox", &collection, 10);
        assert_eq!(
            cursor.next_target(&collection).as_deref(),
            Some("https://x/outbox?page=1")
        );
    }

    #[test]
    fn test_cursor_ignores_first_equal_to_own_id() {
        let collection = json!({"id": "https://x/outbox", "first": "https://x/outbox"});
        let mut cursor = PageCursor::new("https://x/outbox", &collection, 10);
        assert_eq!(cursor.next_target(&collection), None);
    }

    #[test]
    fn test_cursor_follows_next_until_absent() {
        let collection = json!({"id": "c", "first": "c?p=1"});
        let page1 = json!({"id": "c?p=1", "next": "c?p=2"});
        let page2 = json!({"id": "c?p=2"});

        let mut cursor = PageCursor::new("c", &collection, 10);
        let t1 = cursor.next_target(&collection).unwrap();
        cursor.page_fetched(&t1, &page1);
        let t2 = cursor.next_target(&page1).unwrap();
        assert_eq!(t2, "c?p=2");
        cursor.page_fetched(&t2, &page2);
        assert_eq!(cursor.next_target(&page2), None);
        assert_eq!(cursor.page_index(), 2);
    }

    #[test]
    fn test_cursor_stops_when_next_is_own_id() {
        let collection = json!({"id": "c", "first": "c?p=1"});
        let page1 = json!({"id": "c?p=1", "next": "c?p=1"});

        let mut cursor = PageCursor::new("c", &collection, 10);
        let t1 = cursor.next_target(&collection).unwrap();
        cursor.page_fetched(&t1, &page1);
        assert_eq!(cursor.next_target(&page1), None);
    }

    #[test]
    fn test_cursor_detects_longer_cycles() {
        let collection = json!({"id": "c", "first": "c?p=1"});
        let page1 = json!({"id": "c?p=1", "next": "c?p=2"});
        let page2 = json!({"id": "c?p=2", "next": "c?p=1"});

        let mut cursor = PageCursor::new("c", &collection, 10);
        let t1 = cursor.next_target(&collection).unwrap();
        cursor.page_fetched(&t1, &page1);
        let t2 = cursor.next_target(&page1).unwrap();
        cursor.page_fetched(&t2, &page2);
        assert_eq!(cursor.next_target(&page2), None);
    }

    #[test]
    fn test_cursor_respects_page_cap() {
        let collection = json!({"id": "c", "first": "c?p=0"});
        let mut cursor = PageCursor::new("c", &collection, 3);
        let mut current = collection.clone();
        let mut fetched = 0;

        while let Some(target) = cursor.next_target(&current) {
            fetched += 1;
            let page = json!({"id": target, "next": format!("c?p={}", fetched)});
            cursor.page_fetched(&target, &page);
            current = page;
        }

        assert_eq!(fetched, 3);
    }

    #[test]
    fn test_cursor_accepts_embedded_first_page() {
        let collection = json!({
            "id": "c",
            "first": {"id": "c?p=1", "type": "CollectionPage"}
        });
        let mut cursor = PageCursor::new("c", &collection, 10);
        assert_eq!(cursor.next_target(&collection).as_deref(), Some("c?p=1"));
    }

    #[test]
    fn test_link_of_rejects_empty_values() {
        assert_eq!(link_of(&json!("")), None);
        assert_eq!(link_of(&json!(42)), None);
        assert_eq!(link_of(&json!({"id": ""})), None);
    }
}
