//! Step execution engine.
//!
//! Issues the HTTP call for one DSL step, retrying per [`RetryPolicy`],
//! classifying failures, and returning the [`DegradationStrategy`] the
//! journey runner should follow. Counters land in the caller's
//! [`SessionOutcome`]; each step invocation counts as exactly one request no
//! matter how many attempts it took.

use std::time::Instant;

use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::auth::Credentials;
use crate::dsl::{HttpMethod, Step};
use crate::errors::{
    classify, decide_strategy, DegradationStrategy, ErrorCategory, ErrorRecord, FailureKind,
    Severity,
};
use crate::metrics::{
    DEGRADATION_DECISIONS_TOTAL, REQUEST_DURATION_SECONDS, STEP_FAILURES_BY_CATEGORY,
    STEP_REQUESTS_TOTAL,
};
use crate::result::SessionOutcome;

/// Join a step path onto the target base URL.
///
/// Absolute `http://` / `https://` paths are used as-is.
pub fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Retry budget and backoff for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first try; a step makes at most `max_attempts + 1` calls.
    pub max_attempts: u32,

    /// Pause before retrying a retryable non-timeout failure.
    pub retry_delay: Duration,

    /// Timeouts wait `timeout_backoff_base * 2^attempt`.
    pub timeout_backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn timeout_backoff(&self, attempt: u32) -> Duration {
        self.timeout_backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::dsl::DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_secs(1),
            timeout_backoff_base: Duration::from_secs(1),
        }
    }
}

/// Result of a single HTTP attempt.
enum Attempt {
    Success { latency_secs: f64 },
    Status { status: u16, body: String },
    Failed(reqwest::Error),
}

/// A terminal failure, ready to be recorded.
struct Failure {
    category: ErrorCategory,
    severity: Severity,
    status_code: Option<u16>,
    message: String,
}

/// Executor for single DSL steps against one target.
///
/// The client should have `cookie_store(true)` enabled and belong to exactly
/// one virtual user, so session cookies never leak between users.
pub struct StepExecutor {
    base_url: String,
    client: reqwest::Client,
    credentials: Credentials,
    request_timeout: Duration,
    policy: RetryPolicy,
}

impl StepExecutor {
    pub fn new(
        base_url: impl Into<String>,
        client: reqwest::Client,
        request_timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            credentials: Credentials::None,
            request_timeout,
            policy,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one step to a terminal outcome and return the journey strategy.
    pub async fn execute(
        &self,
        step: &Step,
        session_id: u64,
        outcome: &mut SessionOutcome,
    ) -> DegradationStrategy {
        let url = join_url(&self.base_url, &step.path);
        let max_attempts = self.policy.max_attempts;
        STEP_REQUESTS_TOTAL.inc();

        let mut attempt: u32 = 0;
        let failure = loop {
            debug!(
                session_id,
                method = %step.method,
                url = %url,
                attempt,
                "Executing step"
            );

            match self.send(step.method, &url, step.payload.as_ref()).await {
                Attempt::Success { latency_secs } => {
                    REQUEST_DURATION_SECONDS.observe(latency_secs);
                    outcome.record_success(latency_secs);
                    return DegradationStrategy::ContinueJourney;
                }
                Attempt::Status { status, body } => {
                    let (category, severity) = classify(None, Some(status));
                    STEP_FAILURES_BY_CATEGORY
                        .with_label_values(&[category.label()])
                        .inc();

                    if category.is_retryable() && attempt < max_attempts {
                        debug!(session_id, url = %url, status_code = status, attempt, "Retrying after HTTP failure");
                        sleep(self.policy.retry_delay).await;
                        attempt += 1;
                        continue;
                    }

                    let message = if body.trim().is_empty() {
                        format!("HTTP {}", status)
                    } else {
                        body
                    };
                    break Failure {
                        category,
                        severity,
                        status_code: Some(status),
                        message,
                    };
                }
                Attempt::Failed(err) => {
                    let kind = FailureKind::from_reqwest_error(&err);
                    let (category, severity) = classify(Some(kind), None);
                    STEP_FAILURES_BY_CATEGORY
                        .with_label_values(&[category.label()])
                        .inc();

                    if attempt < max_attempts {
                        let backoff = match kind {
                            FailureKind::Timeout => Some(self.policy.timeout_backoff(attempt)),
                            _ if category.is_retryable() => Some(self.policy.retry_delay),
                            _ => None,
                        };
                        if let Some(backoff) = backoff {
                            debug!(
                                session_id,
                                url = %url,
                                error = %err,
                                attempt,
                                backoff_ms = backoff.as_millis() as u64,
                                "Retrying after request error"
                            );
                            sleep(backoff).await;
                            attempt += 1;
                            continue;
                        }
                    }

                    break Failure {
                        category,
                        severity,
                        status_code: None,
                        message: err.to_string(),
                    };
                }
            }
        };

        self.give_up(step, &url, session_id, attempt, failure, outcome)
            .await
    }

    /// Record a terminal failure and apply the degradation decision.
    async fn give_up(
        &self,
        step: &Step,
        url: &str,
        session_id: u64,
        attempt: u32,
        failure: Failure,
        outcome: &mut SessionOutcome,
    ) -> DegradationStrategy {
        let max_attempts = self.policy.max_attempts;

        outcome.push_error(ErrorRecord::new(
            failure.category,
            failure.severity,
            url,
            session_id,
            attempt + 1,
            failure.status_code,
            &failure.message,
        ));

        // Non-retryable failures stop early and spend the rest of the budget.
        let spent = attempt.max(max_attempts);
        let strategy = decide_strategy(failure.category, failure.severity, spent, max_attempts);
        DEGRADATION_DECISIONS_TOTAL
            .with_label_values(&[strategy.label()])
            .inc();

        warn!(
            session_id,
            url = %url,
            error_category = failure.category.label(),
            severity = failure.severity.label(),
            attempts = attempt + 1,
            strategy = strategy.label(),
            "Step failed"
        );

        if strategy == DegradationStrategy::FallbackEndpoint {
            if let Some(ref fallback_path) = step.fallback_path {
                let fallback_url = join_url(&self.base_url, fallback_path);
                match self.send(HttpMethod::Get, &fallback_url, None).await {
                    Attempt::Success { latency_secs } => {
                        debug!(session_id, url = %fallback_url, "Fallback endpoint succeeded");
                        REQUEST_DURATION_SECONDS.observe(latency_secs);
                        outcome.record_success(latency_secs);
                        return DegradationStrategy::ContinueJourney;
                    }
                    Attempt::Status { status, .. } => {
                        warn!(session_id, url = %fallback_url, status_code = status, "Fallback endpoint failed");
                    }
                    Attempt::Failed(err) => {
                        warn!(session_id, url = %fallback_url, error = %err, "Fallback endpoint failed");
                    }
                }
            }
        }

        outcome.record_failure();
        strategy
    }

    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        payload: Option<&serde_json::Value>,
    ) -> Attempt {
        let mut request = self
            .client
            .request(method.into(), url)
            .timeout(self.request_timeout);
        request = self.credentials.apply(request);
        if method.has_body() {
            if let Some(body) = payload {
                request = request.json(body);
            }
        }

        let started = Instant::now();
        match request.send().await {
            Ok(mut response) => {
                let status = response.status().as_u16();
                if (200..300).contains(&status) {
                    // Drain the body so the latency covers the full response.
                    loop {
                        match response.chunk().await {
                            Ok(Some(_chunk)) => {}
                            Ok(None) => break,
                            Err(e) => return Attempt::Failed(e),
                        }
                    }
                    Attempt::Success {
                        latency_secs: started.elapsed().as_secs_f64(),
                    }
                } else {
                    let body = response.text().await.unwrap_or_default();
                    Attempt::Status { status, body }
                }
            }
            Err(e) => Attempt::Failed(e),
        }
    }
}
