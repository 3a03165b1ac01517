//! Response checks.
//!
//! Each check is a predicate over a [`FetchedResponse`]. The only side effect
//! of running one is recording into the shared [`Aggregator`]: every check
//! lands in the checks tally, and the status, media-type, body-size and
//! object-type checks also emit a labeled error-rate sample.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::aggregate::Aggregator;
use crate::errors::ErrorType;
use crate::response::FetchedResponse;

/// Media type prefixes accepted as an ActivityPub response.
pub const ACTIVITYPUB_MEDIA_TYPES: [&str; 3] = [
    "application/json",
    "application/activity+json",
    "application/ld+json",
];

/// Allowed `type` values for a collection.
pub const COLLECTION_TYPES: &[&str] = &["Collection", "OrderedCollection"];

/// Allowed `type` values for a collection page.
pub const COLLECTION_PAGE_TYPES: &[&str] = &["CollectionPage", "OrderedCollectionPage"];

/// A named assertion about a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    /// Status is exactly 200
    StatusOk,

    /// ActivityPub media type and a non-empty body
    ActivityPub,

    /// The object's `type` is one of the allowed values
    ActivityPubType(&'static [&'static str]),

    /// The parsed body is not empty
    HasBody,

    /// If the object has `name`, its value equals `expected`
    Property { name: String, expected: Value },
}

impl Check {
    /// Display name, also used as the `check` metric label.
    pub fn name(&self) -> String {
        match self {
            Check::StatusOk => "status 200".to_string(),
            Check::ActivityPub => "is ActivityPub".to_string(),
            Check::ActivityPubType(_) => "has correct Type".to_string(),
            Check::HasBody => "has body".to_string(),
            Check::Property { name, .. } => format!("property {}", name.to_uppercase()),
        }
    }
}

/// Result of running a check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Check name
    pub name: String,

    /// Whether the check passed
    pub passed: bool,

    /// Error message if the check failed
    pub error_message: Option<String>,
}

/// Why a check failed.
#[derive(Error, Debug, PartialEq)]
pub enum CheckError {
    #[error("Status code mismatch: expected 200, got {}", describe_status(.0))]
    Status(Option<u16>),

    #[error("Unexpected content type '{0}'")]
    ContentType(String),

    #[error("Response body is empty")]
    EmptyBody,

    #[error("Content type '{0}' is not ActivityPub and the body is empty")]
    ContentTypeAndEmptyBody(String),

    #[error("Object type {actual:?} is not one of {expected:?}")]
    ActivityPubType {
        actual: Option<String>,
        expected: Vec<String>,
    },

    #[error("Property '{name}' mismatch: expected {expected}, got {actual}")]
    PropertyMismatch {
        name: String,
        expected: Value,
        actual: Value,
    },
}

fn describe_status(status: &Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "no response".to_string())
}

/// Status is exactly 200. Emits a `responseStatusError` sample.
pub fn is_ok(response: &FetchedResponse, aggregator: &Aggregator) -> bool {
    let status = response.status == Some(200);
    aggregator.add_error_sample(status, ErrorType::ResponseStatus);
    status
}

/// Media type and body-size check.
///
/// Emits independent `contentTypeError` and `bodySizeError` samples and
/// passes only when both hold.
pub fn is_activity_pub(response: &FetchedResponse, aggregator: &Aggregator) -> bool {
    let content_type_status = has_activity_pub_media_type(&response.content_type);
    let body_length_status = !response.body.is_empty();

    aggregator.add_error_sample(content_type_status, ErrorType::ContentType);
    aggregator.add_error_sample(body_length_status, ErrorType::BodySize);
    content_type_status && body_length_status
}

/// True membership of the object's `type` in `allowed`. Emits an
/// `ActivityPubError` sample.
pub fn has_activity_pub_type(
    response: &FetchedResponse,
    allowed: &[&str],
    aggregator: &Aggregator,
) -> bool {
    let status = type_matches(response, allowed);
    aggregator.add_error_sample(status, ErrorType::ActivityPub);
    status
}

fn type_matches(response: &FetchedResponse, allowed: &[&str]) -> bool {
    response
        .activity_type()
        .map(|t| allowed.contains(&t))
        .unwrap_or(false)
}

fn has_activity_pub_media_type(content_type: &str) -> bool {
    ACTIVITYPUB_MEDIA_TYPES
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
}

fn body_is_present(json: &Value) -> bool {
    match json {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::String(s) => !s.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Run every check against a response.
///
/// All checks run regardless of earlier failures; one result per check.
pub fn run_checks(
    checks: &[Check],
    response: &FetchedResponse,
    aggregator: &Aggregator,
) -> Vec<CheckResult> {
    let mut results = Vec::with_capacity(checks.len());

    for check in checks {
        let name = check.name();
        let outcome = run_single_check(check, response, aggregator);
        let passed = outcome.is_ok();
        aggregator.record_check(&name, passed);

        let error_message = match outcome {
            Ok(()) => {
                debug!(url = %response.url, check = %name, "Check passed");
                None
            }
            Err(e) => {
                warn!(url = %response.url, check = %name, error = %e, "Check failed");
                Some(e.to_string())
            }
        };

        results.push(CheckResult {
            name,
            passed,
            error_message,
        });
    }

    results
}

/// Run a single check.
fn run_single_check(
    check: &Check,
    response: &FetchedResponse,
    aggregator: &Aggregator,
) -> Result<(), CheckError> {
    match check {
        Check::StatusOk => {
            if is_ok(response, aggregator) {
                Ok(())
            } else {
                Err(CheckError::Status(response.status))
            }
        }

        Check::ActivityPub => {
            if is_activity_pub(response, aggregator) {
                return Ok(());
            }
            let media_ok = has_activity_pub_media_type(&response.content_type);
            let body_ok = !response.body.is_empty();
            match (media_ok, body_ok) {
                (false, false) => Err(CheckError::ContentTypeAndEmptyBody(
                    response.content_type.clone(),
                )),
                (false, true) => Err(CheckError::ContentType(response.content_type.clone())),
                _ => Err(CheckError::EmptyBody),
            }
        }

        Check::ActivityPubType(allowed) => {
            if has_activity_pub_type(response, allowed, aggregator) {
                Ok(())
            } else {
                Err(CheckError::ActivityPubType {
                    actual: response.activity_type().map(str::to_string),
                    expected: allowed.iter().map(|s| s.to_string()).collect(),
                })
            }
        }

        Check::HasBody => {
            if body_is_present(&response.json) {
                Ok(())
            } else {
                Err(CheckError::EmptyBody)
            }
        }

        Check::Property { name, expected } => match response.object().get(name) {
            Some(actual) if actual != expected => Err(CheckError::PropertyMismatch {
                name: name.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            }),
            _ => Ok(()),
        },
    }
}

/// Generic checks applied to every ActivityPub response.
pub fn activity_pub_checks() -> Vec<Check> {
    vec![Check::StatusOk, Check::ActivityPub]
}

/// Checks for a fetched collection.
pub fn collection_checks() -> Vec<Check> {
    let mut checks = activity_pub_checks();
    checks.push(Check::ActivityPubType(COLLECTION_TYPES));
    checks
}

/// Checks for a fetched collection page.
pub fn collection_page_checks() -> Vec<Check> {
    let mut checks = activity_pub_checks();
    checks.push(Check::ActivityPubType(COLLECTION_PAGE_TYPES));
    checks
}
