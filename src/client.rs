use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::utils::parse_headers_with_escapes;

/// Sent on every request unless `CUSTOM_HEADERS` overrides `Accept`.
pub const DEFAULT_ACCEPT: &str = "application/activity+json, application/ld+json, application/json";

/// Errors that can occur while building the HTTP client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("RESOLVE_TARGET_ADDR ('{0}') is not in the expected format 'hostname:ip:port'")]
    ResolveFormat(String),

    #[error("RESOLVE_TARGET_ADDR: {0}")]
    ResolveAddress(String),

    #[error("Invalid header in CUSTOM_HEADERS: {0}")]
    Header(String),

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub custom_headers: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            skip_tls_verify: false,
            resolve_target_addr: None,
            custom_headers: None,
        }
    }
}

/// Result of building the client, includes parsed headers for logging.
pub struct ClientBuildResult {
    pub client: reqwest::Client,
    pub parsed_headers: HeaderMap,
}

/// Builds the reqwest client used for every fetch.
///
/// Redirects are never followed: a 3xx from the target is reported as a
/// failed `status 200` check rather than silently chased.
pub fn build_client(config: &ClientConfig) -> Result<ClientBuildResult, ClientError> {
    let mut client_builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(config.request_timeout);

    if let Some(ref resolve_str) = config.resolve_target_addr {
        if !resolve_str.is_empty() {
            client_builder = configure_dns_override(client_builder, resolve_str)?;
        } else {
            warn!("RESOLVE_TARGET_ADDR is set but empty, no DNS override will be applied");
        }
    }

    let parsed_headers = configure_headers(config.custom_headers.as_deref())?;
    client_builder = client_builder.default_headers(parsed_headers.clone());

    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder = client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    Ok(ClientBuildResult {
        client: client_builder.build()?,
        parsed_headers,
    })
}

fn configure_dns_override(
    client_builder: reqwest::ClientBuilder,
    resolve_str: &str,
) -> Result<reqwest::ClientBuilder, ClientError> {
    let parts: Vec<&str> = resolve_str.split(':').map(str::trim).collect();
    let [hostname, ip, port] = parts.as_slice() else {
        return Err(ClientError::ResolveFormat(resolve_str.to_string()));
    };

    if hostname.is_empty() || ip.is_empty() || port.is_empty() {
        return Err(ClientError::ResolveFormat(resolve_str.to_string()));
    }

    let port: u16 = port.parse().map_err(|e| {
        ClientError::ResolveAddress(format!("invalid port '{}': {}", port, e))
    })?;

    let socket_addr: SocketAddr = format!("{}:{}", ip, port).parse().map_err(|e| {
        ClientError::ResolveAddress(format!("invalid address '{}:{}': {}", ip, port, e))
    })?;

    info!(hostname = %hostname, address = %socket_addr, "DNS override configured");
    Ok(client_builder.resolve(hostname, socket_addr))
}

/// Default `Accept` plus any `CUSTOM_HEADERS` (`Name:Value`, comma
/// separated, `\,` for a literal comma). Custom headers win.
pub fn configure_headers(custom_headers_str: Option<&str>) -> Result<HeaderMap, ClientError> {
    let mut parsed_headers = HeaderMap::new();
    parsed_headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));

    let headers_str = match custom_headers_str {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for header_pair in parse_headers_with_escapes(headers_str) {
        let header_pair = header_pair.trim();
        if header_pair.is_empty() {
            continue;
        }

        let (name_str, value_str) = header_pair.split_once(':').ok_or_else(|| {
            ClientError::Header(format!("'{}'. Expected 'Name:Value'", header_pair))
        })?;
        let name_str = name_str.trim();
        if name_str.is_empty() {
            return Err(ClientError::Header(format!(
                "header name cannot be empty in '{}'",
                header_pair
            )));
        }

        let unescaped_value = value_str.trim().replace("\\,", ",");
        let header_name = HeaderName::from_str(name_str)
            .map_err(|e| ClientError::Header(format!("name '{}': {}", name_str, e)))?;
        let header_value = HeaderValue::from_str(&unescaped_value)
            .map_err(|e| ClientError::Header(format!("value for '{}': {}", name_str, e)))?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}
