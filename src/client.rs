use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::errors::WorkerError;
use crate::utils::parse_headers_with_escapes;

/// Settings shared by every per-user HTTP client.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
}

/// Builds a client for one virtual user.
///
/// Each client carries its own cookie jar, so session state never crosses
/// users.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, WorkerError> {
    let mut client_builder = reqwest::Client::builder().cookie_store(true);

    let parsed_headers = parse_custom_headers(config.custom_headers.as_deref())?;
    if !parsed_headers.is_empty() {
        debug!(count = parsed_headers.len(), "Applying custom default headers");
        client_builder = client_builder.default_headers(parsed_headers);
    }

    if config.skip_tls_verify {
        client_builder = client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    Ok(client_builder.build()?)
}

/// Logs the TLS warning once at startup rather than per client.
pub fn warn_if_insecure(config: &ClientConfig) {
    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification for target requests");
    }
}

/// Parses `Name:Value` pairs separated by commas (`\,` escapes a comma).
pub fn parse_custom_headers(custom_headers_str: Option<&str>) -> Result<HeaderMap, WorkerError> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.trim().is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for header_pair in parse_headers_with_escapes(headers_str) {
        let header_pair = header_pair.trim();

        let (name_str, value_str) = header_pair.split_once(':').ok_or_else(|| {
            WorkerError::InvalidHeader(format!(
                "'{}' is not in 'Name:Value' form",
                header_pair
            ))
        })?;
        let name_str = name_str.trim();
        let value_str = value_str.trim();

        if name_str.is_empty() {
            return Err(WorkerError::InvalidHeader(format!(
                "header name cannot be empty in '{}'",
                header_pair
            )));
        }

        let header_name = HeaderName::from_str(name_str)
            .map_err(|e| WorkerError::InvalidHeader(format!("name '{}': {}", name_str, e)))?;
        let header_value = HeaderValue::from_str(value_str).map_err(|e| {
            WorkerError::InvalidHeader(format!("value for '{}': {}", name_str, e))
        })?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}
