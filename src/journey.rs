//! Runs a user's journeys, or a single flat step when no journeys exist.

use tokio::time::Duration;
use tracing::{debug, info};

use crate::auth::{setup_auth, AuthConfig};
use crate::dsl::{Journey, Step};
use crate::errors::DegradationStrategy;
use crate::executor::{RetryPolicy, StepExecutor};
use crate::result::SessionOutcome;

/// How far a run got before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub steps_executed: u64,
    pub terminated: bool,
}

/// Drives journeys for one virtual user through its own client.
pub struct JourneyRunner {
    client: reqwest::Client,
    base_url: String,
    auth: AuthConfig,
    request_timeout: Duration,
    policy: RetryPolicy,
}

impl JourneyRunner {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        auth: AuthConfig,
        request_timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            auth,
            request_timeout,
            policy,
        }
    }

    /// Resolve auth and bind it to a step executor.
    async fn authenticated_executor(&self) -> StepExecutor {
        let credentials =
            setup_auth(&self.client, &self.base_url, &self.auth, self.request_timeout).await;
        StepExecutor::new(
            self.base_url.clone(),
            self.client.clone(),
            self.request_timeout,
            self.policy.clone(),
        )
        .with_credentials(credentials)
    }

    /// Run every journey `repeat` times, in order.
    ///
    /// Auth is set up afresh at the start of each journey and shared by its
    /// repeats. `TerminateJourney` abandons the current journey and every journey
    /// after it. Every other strategy moves on to the next step.
    pub async fn run(
        &self,
        journeys: &[Journey],
        session_id: u64,
        outcome: &mut SessionOutcome,
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        for journey in journeys {
            debug!(session_id, journey = %journey.name, repeat = journey.repeat, "Starting journey");
            let executor = self.authenticated_executor().await;

            for iteration in 0..journey.repeat {
                for step in &journey.steps {
                    let strategy = executor.execute(step, session_id, outcome).await;
                    summary.steps_executed += 1;

                    match strategy {
                        DegradationStrategy::TerminateJourney => {
                            info!(
                                session_id,
                                journey = %journey.name,
                                iteration,
                                path = %step.path,
                                "Terminating journey"
                            );
                            summary.terminated = true;
                            return summary;
                        }
                        DegradationStrategy::SkipStep => {
                            debug!(session_id, path = %step.path, "Skipping failed step");
                        }
                        DegradationStrategy::ContinueJourney
                        | DegradationStrategy::FallbackEndpoint => {}
                    }
                }
            }
        }

        summary
    }

    /// Execute one flat step with the same auth and degradation handling.
    pub async fn run_step(
        &self,
        step: &Step,
        session_id: u64,
        outcome: &mut SessionOutcome,
    ) -> DegradationStrategy {
        let executor = self.authenticated_executor().await;
        executor.execute(step, session_id, outcome).await
    }
}
