//! Error classification and graceful-degradation policy.
//!
//! Every failed request is classified into an [`ErrorCategory`] and a
//! [`Severity`]. Once retries are exhausted, [`decide_strategy`] picks what
//! the rest of the user's journey should do. Expected request failures never
//! surface as Rust errors; only test-level problems become [`WorkerError`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error messages stored in an [`ErrorRecord`] are cut to this many characters.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 100;

/// Categories of request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The request did not complete within the configured timeout
    Timeout,

    /// Connection-level or transport failure
    Network,

    /// HTTP 4xx other than 401/403
    HttpError,

    /// HTTP 401/403
    AuthError,

    /// HTTP 5xx
    ServerError,

    /// Anything not covered above
    Unknown,
}

impl ErrorCategory {
    /// Categorize an HTTP status code.
    ///
    /// Returns `None` for the success range `[200, 300)`.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200..=299 => None,
            401 | 403 => Some(ErrorCategory::AuthError),
            400..=499 => Some(ErrorCategory::HttpError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::Unknown),
        }
    }

    /// Whether a failure of this category is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Timeout | ErrorCategory::Network | ErrorCategory::ServerError
        )
    }

    /// Get the Prometheus label for this error category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::HttpError => "http_error",
            ErrorCategory::AuthError => "auth_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::Unknown => "unknown",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "Request Timeout Errors",
            ErrorCategory::Network => "Network/Connection Errors",
            ErrorCategory::HttpError => "HTTP 4xx Client Errors",
            ErrorCategory::AuthError => "HTTP 401/403 Authentication Errors",
            ErrorCategory::ServerError => "HTTP 5xx Server Errors",
            ErrorCategory::Unknown => "Other/Unknown Errors",
        }
    }

    /// Get all error categories in a consistent order.
    pub fn all() -> Vec<ErrorCategory> {
        vec![
            ErrorCategory::Timeout,
            ErrorCategory::Network,
            ErrorCategory::HttpError,
            ErrorCategory::AuthError,
            ErrorCategory::ServerError,
            ErrorCategory::Unknown,
        ]
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Transport-level failure raised before any HTTP status was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Connect,
    Transport,
}

impl FailureKind {
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            FailureKind::Timeout
        } else if error.is_connect() {
            FailureKind::Connect
        } else {
            FailureKind::Transport
        }
    }
}

/// Classify a failure by transport error kind or HTTP status.
///
/// A transport failure takes precedence over a status code.
pub fn classify(failure: Option<FailureKind>, status_code: Option<u16>) -> (ErrorCategory, Severity) {
    match (failure, status_code) {
        (Some(FailureKind::Timeout), _) => (ErrorCategory::Timeout, Severity::Medium),
        (Some(FailureKind::Connect), _) => (ErrorCategory::Network, Severity::High),
        (Some(FailureKind::Transport), _) => (ErrorCategory::Network, Severity::Medium),
        (None, Some(code)) => match ErrorCategory::from_status_code(code) {
            Some(ErrorCategory::AuthError) => (ErrorCategory::AuthError, Severity::High),
            Some(ErrorCategory::HttpError) => (ErrorCategory::HttpError, Severity::Medium),
            Some(ErrorCategory::ServerError) => (ErrorCategory::ServerError, Severity::High),
            _ => (ErrorCategory::Unknown, Severity::Low),
        },
        (None, None) => (ErrorCategory::Unknown, Severity::Low),
    }
}

/// What a user's journey does after a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationStrategy {
    ContinueJourney,
    SkipStep,
    FallbackEndpoint,
    TerminateJourney,
}

impl DegradationStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            DegradationStrategy::ContinueJourney => "continue_journey",
            DegradationStrategy::SkipStep => "skip_step",
            DegradationStrategy::FallbackEndpoint => "fallback_endpoint",
            DegradationStrategy::TerminateJourney => "terminate_journey",
        }
    }
}

impl fmt::Display for DegradationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Pick the degradation strategy for a failed step.
///
/// While `attempt < max_attempts` the caller keeps retrying, so the answer is
/// always `ContinueJourney`. Once exhausted, auth failures end the journey,
/// high-severity client errors skip the step, and timeouts, network failures
/// and server errors degrade to the step's fallback endpoint.
pub fn decide_strategy(
    category: ErrorCategory,
    severity: Severity,
    attempt: u32,
    max_attempts: u32,
) -> DegradationStrategy {
    if attempt < max_attempts {
        return DegradationStrategy::ContinueJourney;
    }

    match category {
        ErrorCategory::AuthError => DegradationStrategy::TerminateJourney,
        ErrorCategory::HttpError if severity >= Severity::High => DegradationStrategy::SkipStep,
        ErrorCategory::Timeout | ErrorCategory::Network | ErrorCategory::ServerError => {
            DegradationStrategy::FallbackEndpoint
        }
        _ => DegradationStrategy::ContinueJourney,
    }
}

/// One failed request, as reported in the final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub endpoint: String,
    pub session_id: u64,

    /// 1-based number of the attempt that produced this record.
    pub attempt: u32,
    pub status_code: Option<u16>,
    pub message: String,
    pub retry_eligible: bool,
}

impl ErrorRecord {
    pub fn new(
        category: ErrorCategory,
        severity: Severity,
        endpoint: impl Into<String>,
        session_id: u64,
        attempt: u32,
        status_code: Option<u16>,
        message: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            severity,
            endpoint: endpoint.into(),
            session_id,
            attempt,
            status_code,
            message: truncate_message(message),
            retry_eligible: category.is_retryable(),
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status_code {
            write!(
                f,
                "[{}] HTTP {} {}: {}",
                self.category.label(),
                status,
                self.endpoint,
                self.message
            )
        } else {
            write!(
                f,
                "[{}] {}: {}",
                self.category.label(),
                self.endpoint,
                self.message
            )
        }
    }
}

fn truncate_message(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

/// Failures that abort a whole test run.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Invalid target URL '{url}': {reason}")]
    InvalidTargetUrl { url: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid custom header: {0}")]
    InvalidHeader(String),

    #[error("Failed to decode test task: {0}")]
    TaskDecode(#[from] serde_json::Error),

    #[error("Invalid execution plan: {0}")]
    InvalidPlan(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range_is_not_an_error() {
        assert_eq!(ErrorCategory::from_status_code(200), None);
        assert_eq!(ErrorCategory::from_status_code(204), None);
        assert_eq!(ErrorCategory::from_status_code(299), None);
    }

    #[test]
    fn test_redirect_is_unknown_failure() {
        assert_eq!(classify(None, Some(302)), (ErrorCategory::Unknown, Severity::Low));
    }

    #[test]
    fn test_classify_status_codes() {
        assert_eq!(classify(None, Some(401)), (ErrorCategory::AuthError, Severity::High));
        assert_eq!(classify(None, Some(403)), (ErrorCategory::AuthError, Severity::High));
        assert_eq!(classify(None, Some(404)), (ErrorCategory::HttpError, Severity::Medium));
        assert_eq!(classify(None, Some(429)), (ErrorCategory::HttpError, Severity::Medium));
        assert_eq!(classify(None, Some(503)), (ErrorCategory::ServerError, Severity::High));
    }

    #[test]
    fn test_classify_failures() {
        assert_eq!(
            classify(Some(FailureKind::Timeout), None),
            (ErrorCategory::Timeout, Severity::Medium)
        );
        assert_eq!(
            classify(Some(FailureKind::Connect), None),
            (ErrorCategory::Network, Severity::High)
        );
        assert_eq!(
            classify(Some(FailureKind::Transport), Some(500)),
            (ErrorCategory::Network, Severity::Medium)
        );
        assert_eq!(classify(None, None), (ErrorCategory::Unknown, Severity::Low));
    }

    #[test]
    fn test_retry_eligibility() {
        assert!(ErrorCategory::Timeout.is_retryable());
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::ServerError.is_retryable());
        assert!(!ErrorCategory::AuthError.is_retryable());
        assert!(!ErrorCategory::HttpError.is_retryable());
        assert!(!ErrorCategory::Unknown.is_retryable());
    }

    #[test]
    fn test_strategy_while_attempts_remain() {
        for category in ErrorCategory::all() {
            assert_eq!(
                decide_strategy(category, Severity::Critical, 1, 3),
                DegradationStrategy::ContinueJourney
            );
        }
    }

    #[test]
    fn test_strategy_when_exhausted() {
        use DegradationStrategy::*;
        assert_eq!(decide_strategy(ErrorCategory::AuthError, Severity::High, 3, 3), TerminateJourney);
        assert_eq!(decide_strategy(ErrorCategory::HttpError, Severity::High, 3, 3), SkipStep);
        assert_eq!(decide_strategy(ErrorCategory::HttpError, Severity::Medium, 3, 3), ContinueJourney);
        assert_eq!(decide_strategy(ErrorCategory::Timeout, Severity::Medium, 3, 3), FallbackEndpoint);
        assert_eq!(decide_strategy(ErrorCategory::Network, Severity::High, 4, 3), FallbackEndpoint);
        assert_eq!(decide_strategy(ErrorCategory::ServerError, Severity::High, 3, 3), FallbackEndpoint);
        assert_eq!(decide_strategy(ErrorCategory::Unknown, Severity::Low, 3, 3), ContinueJourney);
    }

    #[test]
    fn test_zero_attempt_budget_is_exhausted_immediately() {
        assert_eq!(
            decide_strategy(ErrorCategory::AuthError, Severity::High, 0, 0),
            DegradationStrategy::TerminateJourney
        );
    }

    #[test]
    fn test_error_record_truncates_message() {
        let long = "x".repeat(500);
        let record = ErrorRecord::new(
            ErrorCategory::ServerError,
            Severity::High,
            "http://t/a",
            7,
            1,
            Some(500),
            &long,
        );
        assert_eq!(record.message.chars().count(), MAX_ERROR_MESSAGE_CHARS);
        assert!(record.retry_eligible);
        assert!(record.to_string().contains("server_error"));
    }

    #[test]
    fn test_labels() {
        assert_eq!(ErrorCategory::AuthError.label(), "auth_error");
        assert_eq!(Severity::Critical.label(), "critical");
        assert_eq!(DegradationStrategy::SkipStep.to_string(), "skip_step");
    }
}
