use std::sync::Arc;

use chrono::Utc;
use tokio::time::Duration;
use tracing::{error, info};

use crate::client::ClientConfig;
use crate::errors::WorkerError;
use crate::metrics::TESTS_TOTAL;
use crate::population::PopulationSimulator;
use crate::reporter::Reporter;
use crate::result::TestResult;
use crate::task::TestTask;

/// Runs test tasks one at a time and reports their outcome.
pub struct Worker {
    id: String,
    reporter: Arc<dyn Reporter>,
    client_config: ClientConfig,
    retry_delays: Option<(Duration, Duration)>,
}

impl Worker {
    pub fn new(id: impl Into<String>, reporter: Arc<dyn Reporter>, client_config: ClientConfig) -> Self {
        Self {
            id: id.into(),
            reporter,
            client_config,
            retry_delays: None,
        }
    }

    /// Shorten retry pacing, mainly for tests against local targets.
    pub fn with_retry_delays(mut self, retry_delay: Duration, timeout_backoff_base: Duration) -> Self {
        self.retry_delays = Some((retry_delay, timeout_backoff_base));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Execute one task, then send either its result or a single error report.
    pub async fn run_task(&self, task: &TestTask) -> Result<TestResult, WorkerError> {
        info!(worker_id = %self.id, test_id = %task.test_id, target_url = %task.target_url, "Running test");

        match self.execute(task).await {
            Ok(result) => {
                TESTS_TOTAL.with_label_values(&["completed"]).inc();
                info!(
                    test_id = %task.test_id,
                    total_requests = result.total_requests,
                    successful_requests = result.successful_requests,
                    failed_requests = result.failed_requests,
                    avg_latency = result.avg_latency,
                    "Test completed"
                );
                self.reporter.result(&result).await;
                Ok(result)
            }
            Err(e) => {
                TESTS_TOTAL.with_label_values(&["failed"]).inc();
                error!(test_id = %task.test_id, error = %e, "Test failed");
                self.reporter.error(&task.test_id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn execute(&self, task: &TestTask) -> Result<TestResult, WorkerError> {
        let base_url = validate_target_url(&task.target_url)?;
        let plan = task.plan();

        let mut simulator = PopulationSimulator::new(
            task.test_id.clone(),
            plan,
            base_url,
            task.auth.clone(),
            self.client_config.clone(),
            self.reporter.clone(),
        );
        if let Some((retry_delay, timeout_backoff_base)) = self.retry_delays {
            simulator = simulator.with_retry_delays(retry_delay, timeout_backoff_base);
        }

        let start_time = Utc::now();
        let outcome = simulator.run().await?;
        let end_time = Utc::now();

        Ok(TestResult::from_outcome(
            task.test_id.clone(),
            self.id.clone(),
            outcome,
            start_time,
            end_time,
        ))
    }
}

/// Checks that the target is an absolute http(s) URL and returns it
/// without a trailing slash.
pub fn validate_target_url(target_url: &str) -> Result<String, WorkerError> {
    let invalid = |reason: String| WorkerError::InvalidTargetUrl {
        url: target_url.to_string(),
        reason,
    };

    let parsed = reqwest::Url::parse(target_url.trim()).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }

    Ok(target_url.trim().trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_target_url() {
        assert_eq!(
            validate_target_url("http://localhost:8080/").unwrap(),
            "http://localhost:8080"
        );
        assert_eq!(
            validate_target_url("https://api.example.com/v1").unwrap(),
            "https://api.example.com/v1"
        );
        assert!(validate_target_url("not a url").is_err());
        assert!(validate_target_url("ftp://example.com").is_err());
        assert!(validate_target_url("").is_err());
    }
}
