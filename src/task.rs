use serde::{Deserialize, Serialize};

use crate::auth::AuthConfig;
use crate::dsl::{parse_dsl, ExecutionPlan};
use crate::errors::WorkerError;

/// One test request as delivered to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestTask {
    pub test_id: String,
    pub target_url: String,

    #[serde(default)]
    pub dsl_script: String,

    #[serde(default, alias = "auth_credentials")]
    pub auth: AuthConfig,

    /// Overrides the script's `timeout:` (seconds).
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Overrides the script's `retry_attempts:`.
    #[serde(default)]
    pub retry_attempts: Option<u32>,

    #[serde(default)]
    pub created_at: Option<String>,
}

impl TestTask {
    pub fn from_json(line: &str) -> Result<Self, WorkerError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Compile the script and apply the task-level overrides.
    pub fn plan(&self) -> ExecutionPlan {
        let mut plan = parse_dsl(&self.dsl_script);
        if let Some(timeout) = self.timeout {
            plan.timeout_secs = timeout;
        }
        if let Some(retry_attempts) = self.retry_attempts {
            plan.retry_attempts = retry_attempts;
        }
        plan
    }
}
