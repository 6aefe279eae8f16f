use std::env;
use std::fmt;

use rand::Rng;
use thiserror::Error;
use tokio::time::Duration;
use tracing::info;

use crate::client::{parse_custom_headers, ClientConfig};
use crate::utils::parse_duration_string;

pub const DEFAULT_COORDINATOR_URL: &str = "http://localhost:8001";
pub const DEFAULT_METRICS_PORT: u16 = 9090;
pub const DEFAULT_REPORT_TIMEOUT: &str = "10s";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}'. {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl fmt::Display) -> Self {
        ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Process-wide worker settings, loaded once at startup.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub coordinator_url: String,
    pub worker_id: String,
    pub metrics_port: u16,
    pub report_timeout: Duration,
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
    pub log_format: LogFormat,
}

impl WorkerSettings {
    /// Loads settings from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let coordinator_url = env::var("COORDINATOR_URL")
            .unwrap_or_else(|_| DEFAULT_COORDINATOR_URL.to_string());
        if !coordinator_url.starts_with("http://") && !coordinator_url.starts_with("https://") {
            return Err(ConfigError::invalid(
                "COORDINATOR_URL",
                &coordinator_url,
                "Must start with http:// or https://",
            ));
        }

        let worker_id = match env::var("WORKER_ID") {
            Ok(id) if !id.trim().is_empty() => id,
            _ => generate_worker_id(),
        };

        let metrics_port = match env::var("METRICS_PORT") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| ConfigError::invalid("METRICS_PORT", &raw, e))?,
            Err(_) => DEFAULT_METRICS_PORT,
        };

        let report_timeout_str =
            env::var("REPORT_TIMEOUT").unwrap_or_else(|_| DEFAULT_REPORT_TIMEOUT.to_string());
        let report_timeout = parse_duration_string(&report_timeout_str)
            .map_err(|e| ConfigError::invalid("REPORT_TIMEOUT", &report_timeout_str, e))?;

        let skip_tls_verify = env::var("SKIP_TLS_VERIFY")
            .unwrap_or_else(|_| "false".to_string())
            .to_lowercase()
            == "true";

        let custom_headers = env::var("CUSTOM_HEADERS").ok().filter(|s| !s.trim().is_empty());
        if let Some(ref headers) = custom_headers {
            parse_custom_headers(Some(headers))
                .map_err(|e| ConfigError::invalid("CUSTOM_HEADERS", headers, e))?;
        }

        let log_format = match env::var("LOG_FORMAT") {
            Ok(raw) if raw.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(WorkerSettings {
            coordinator_url,
            worker_id,
            metrics_port,
            report_timeout,
            skip_tls_verify,
            custom_headers,
            log_format,
        })
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            skip_tls_verify: self.skip_tls_verify,
            custom_headers: self.custom_headers.clone(),
        }
    }

    pub fn log_summary(&self) {
        info!(
            worker_id = %self.worker_id,
            coordinator_url = %self.coordinator_url,
            metrics_port = self.metrics_port,
            report_timeout_secs = self.report_timeout.as_secs_f64(),
            skip_tls_verify = self.skip_tls_verify,
            custom_headers = self.custom_headers.is_some(),
            "Worker settings loaded"
        );
    }
}

pub fn generate_worker_id() -> String {
    format!("worker-{}", rand::thread_rng().gen_range(1000..=9999))
}
