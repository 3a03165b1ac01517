//! Fetching a URL and capturing everything the checks look at.

use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::aggregate::Aggregator;
use crate::errors::ErrorCategory;
use crate::metrics::{
    CONCURRENT_REQUESTS, REQUEST_DURATION_SECONDS, REQUEST_ERRORS_BY_CATEGORY,
    REQUEST_STATUS_CODES, REQUEST_TOTAL,
};

/// A completed GET, successful or not.
///
/// Transport failures are represented with `status: None` and an empty body
/// so they fail the status and body checks like any other bad response.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// URL that was requested
    pub url: String,

    /// HTTP status, `None` when no response was received
    pub status: Option<u16>,

    /// Lower-cased `Content-Type` header, empty when absent
    pub content_type: String,

    /// Raw response body
    pub body: String,

    /// Body parsed as JSON, `Value::Null` when it is not JSON
    pub json: Value,

    /// Time from sending the request to reading the full body
    pub duration: Duration,

    /// Transport error message, if the request failed
    pub error: Option<String>,
}

impl FetchedResponse {
    /// Builds a response from its parts and parses the body.
    pub fn new(
        url: impl Into<String>,
        status: u16,
        content_type: &str,
        body: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let body = body.into();
        let json = serde_json::from_str(&body).unwrap_or(Value::Null);
        Self {
            url: url.into(),
            status: Some(status),
            content_type: content_type.to_lowercase(),
            body,
            json,
            duration,
            error: None,
        }
    }

    /// A request that never produced a response.
    pub fn failed(url: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            url: url.into(),
            status: None,
            content_type: String::new(),
            body: String::new(),
            json: Value::Null,
            duration,
            error: Some(error.into()),
        }
    }

    /// The body as a JSON object; an empty map for anything else.
    pub fn object(&self) -> &Map<String, Value> {
        static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();
        match &self.json {
            Value::Object(map) => map,
            _ => EMPTY.get_or_init(Map::new),
        }
    }

    /// The object's `type` discriminator when it is a plain string.
    pub fn activity_type(&self) -> Option<&str> {
        self.json.get("type").and_then(Value::as_str)
    }
}

/// Counts one request in `CONCURRENT_REQUESTS` until dropped, so a fetch
/// cancelled mid-flight still releases its slot.
struct InFlightRequest;

impl InFlightRequest {
    fn new() -> Self {
        CONCURRENT_REQUESTS.inc();
        Self
    }
}

impl Drop for InFlightRequest {
    fn drop(&mut self) {
        CONCURRENT_REQUESTS.dec();
    }
}

/// Issues a GET and records transport metrics.
///
/// Never fails: network errors are folded into the returned
/// [`FetchedResponse`].
pub async fn fetch(client: &reqwest::Client, url: &str, aggregator: &Aggregator) -> FetchedResponse {
    let _in_flight = InFlightRequest::new();
    REQUEST_TOTAL.inc();

    let start = Instant::now();
    let response = match client.get(url).send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            REQUEST_STATUS_CODES
                .with_label_values(&[status_code_label(status)])
                .inc();

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            match response.text().await {
                Ok(body) => {
                    debug!(url = %url, status_code = status, bytes = body.len(), "Request completed");
                    FetchedResponse::new(url, status, &content_type, body, start.elapsed())
                }
                Err(e) => {
                    let category = ErrorCategory::from_reqwest_error(&e);
                    REQUEST_ERRORS_BY_CATEGORY
                        .with_label_values(&[category.label()])
                        .inc();
                    error!(
                        url = %url,
                        status_code = status,
                        error = %e,
                        error_category = %category,
                        "Failed to read response body"
                    );
                    let mut failed = FetchedResponse::new(url, status, &content_type, "", start.elapsed());
                    failed.error = Some(e.to_string());
                    failed
                }
            }
        }
        Err(e) => {
            REQUEST_STATUS_CODES.with_label_values(&["error"]).inc();

            let category = ErrorCategory::from_reqwest_error(&e);
            REQUEST_ERRORS_BY_CATEGORY
                .with_label_values(&[category.label()])
                .inc();

            error!(
                url = %url,
                error = %e,
                error_category = %category,
                "Request failed"
            );
            FetchedResponse::failed(url, e.to_string(), start.elapsed())
        }
    };

    REQUEST_DURATION_SECONDS.observe(response.duration.as_secs_f64());
    aggregator.record_request_duration(response.duration);

    response
}

/// Returns a static string label for common HTTP status codes.
///
/// Uncommon codes fall back to "other" rather than allocating a unique string.
fn status_code_label(code: u16) -> &'static str {
    match code {
        200 => "200",
        204 => "204",
        301 => "301",
        302 => "302",
        304 => "304",
        400 => "400",
        401 => "401",
        403 => "403",
        404 => "404",
        406 => "406",
        410 => "410",
        429 => "429",
        500 => "500",
        502 => "502",
        503 => "503",
        504 => "504",
        _ => "other",
    }
}
