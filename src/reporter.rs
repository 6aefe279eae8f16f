//! Outbound reporting of progress, results and test-level errors.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::WorkerError;
use crate::result::TestResult;

/// Sink for everything a running test reports.
///
/// Calls are fire-and-forget: implementations log failures and never
/// propagate them into the engine.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Percent of the configured duration elapsed, 0..=100.
    async fn progress(&self, test_id: &str, percent: f64);

    async fn result(&self, result: &TestResult);

    async fn error(&self, test_id: &str, message: &str);
}

/// Posts JSON to the coordinator's `/tests/{id}/...` endpoints.
pub struct CoordinatorReporter {
    client: reqwest::Client,
    base_url: String,
}

impl CoordinatorReporter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize + ?Sized>(&self, test_id: &str, kind: &str, body: &T) {
        let url = format!("{}/tests/{}/{}", self.base_url, test_id, kind);
        match self.client.post(&url).json(body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(url = %url, "Report delivered");
            }
            Ok(response) => {
                warn!(
                    url = %url,
                    status_code = response.status().as_u16(),
                    "Coordinator rejected report"
                );
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to deliver report");
            }
        }
    }
}

#[derive(Serialize)]
struct ProgressReport {
    progress: f64,
    timestamp: String,
}

#[derive(Serialize)]
struct ErrorReport<'a> {
    error: &'a str,
    timestamp: String,
}

#[async_trait]
impl Reporter for CoordinatorReporter {
    async fn progress(&self, test_id: &str, percent: f64) {
        let body = ProgressReport {
            progress: percent,
            timestamp: Utc::now().to_rfc3339(),
        };
        self.post(test_id, "progress", &body).await;
    }

    async fn result(&self, result: &TestResult) {
        info!(
            test_id = %result.test_id,
            total_requests = result.total_requests,
            success_rate = result.success_rate(),
            "Sending test result"
        );
        self.post(&result.test_id, "results", result).await;
    }

    async fn error(&self, test_id: &str, message: &str) {
        let body = ErrorReport {
            error: message,
            timestamp: Utc::now().to_rfc3339(),
        };
        self.post(test_id, "error", &body).await;
    }
}
