//! Error taxonomy for checks and transport failures.
//!
//! `ErrorType` is the `errorType` label carried by every error-rate sample.
//! `ErrorCategory` classifies transport-level failures (timeouts, refused
//! connections, TLS problems) for logging and the
//! `request_errors_by_category_total` metric.

use std::fmt;
use std::str::FromStr;

/// Label attached to an error-rate sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorType {
    /// Response status was not exactly 200.
    ResponseStatus,

    /// Content type did not start with an ActivityPub-compatible media type.
    ContentType,

    /// Response body was empty.
    BodySize,

    /// The object's `type` was missing or not one of the allowed values.
    ActivityPub,
}

impl ErrorType {
    /// Every error type, in reporting order.
    pub const ALL: [ErrorType; 4] = [
        ErrorType::ResponseStatus,
        ErrorType::ContentType,
        ErrorType::BodySize,
        ErrorType::ActivityPub,
    ];

    /// The `errorType` label value.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorType::ResponseStatus => "responseStatusError",
            ErrorType::ContentType => "contentTypeError",
            ErrorType::BodySize => "bodySizeError",
            ErrorType::ActivityPub => "ActivityPubError",
        }
    }

    /// Position in `ALL`, used to index fixed-size counter arrays.
    pub fn index(&self) -> usize {
        match self {
            ErrorType::ResponseStatus => 0,
            ErrorType::ContentType => 1,
            ErrorType::BodySize => 2,
            ErrorType::ActivityPub => 3,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorType::ALL
            .iter()
            .copied()
            .find(|t| t.label() == s)
            .ok_or_else(|| {
                format!(
                    "Unknown errorType '{}'. Expected one of: {}",
                    s,
                    ErrorType::ALL
                        .iter()
                        .map(|t| t.label())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

/// Categories of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// DNS, refused connections, body read failures
    NetworkError,

    /// Request timeout errors
    TimeoutError,

    /// TLS/SSL certificate errors
    TlsError,

    /// Other/unknown errors
    OtherError,
}

impl ErrorCategory {
    /// Categorize a reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ErrorCategory::TimeoutError
        } else if error.is_connect() || error.is_request() || error.is_body() || error.is_decode()
        {
            ErrorCategory::NetworkError
        } else {
            Self::from_message(&error.to_string())
        }
    }

    /// Fallback classification based on the error text.
    pub fn from_message(message: &str) -> Self {
        let error_msg = message.to_lowercase();

        if error_msg.contains("certificate") || error_msg.contains("tls") || error_msg.contains("ssl")
        {
            ErrorCategory::TlsError
        } else if error_msg.contains("timeout") || error_msg.contains("timed out") {
            ErrorCategory::TimeoutError
        } else if error_msg.contains("dns")
            || error_msg.contains("resolve")
            || error_msg.contains("connect")
        {
            ErrorCategory::NetworkError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Get the Prometheus label for this error category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
