//! Population simulation: the closed model (fixed users) and the open model
//! (Poisson-like arrivals of independent sessions).
//!
//! Every user or session task owns its [`SessionOutcome`] and its own
//! [`WorkloadGenerator`]; outcomes are merged only after a task completes.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tokio::time::{self, sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::auth::AuthConfig;
use crate::client::{build_client, ClientConfig};
use crate::dsl::{ExecutionPlan, UserModel};
use crate::errors::WorkerError;
use crate::executor::RetryPolicy;
use crate::journey::JourneyRunner;
use crate::metrics::ACTIVE_SESSIONS;
use crate::reporter::Reporter;
use crate::result::SessionOutcome;
use crate::workload::WorkloadGenerator;

/// Arrival check period of the open model.
pub const ARRIVAL_TICK: Duration = Duration::from_millis(100);

/// Arrival rate assumed when an open-model script omits `arrival_rate:`.
pub const DEFAULT_ARRIVAL_RATE: f64 = 1.0;

/// State shared read-only by every user/session task of one test.
struct SessionContext {
    plan: Arc<ExecutionPlan>,
    base_url: String,
    auth: AuthConfig,
    policy: RetryPolicy,
    start: Instant,
    /// End of the test; no session outlives it.
    deadline: Instant,
}

pub struct PopulationSimulator {
    test_id: String,
    plan: Arc<ExecutionPlan>,
    base_url: String,
    auth: AuthConfig,
    client_config: ClientConfig,
    policy: RetryPolicy,
    reporter: Arc<dyn Reporter>,
}

impl PopulationSimulator {
    pub fn new(
        test_id: impl Into<String>,
        plan: ExecutionPlan,
        base_url: impl Into<String>,
        auth: AuthConfig,
        client_config: ClientConfig,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let policy = RetryPolicy::new(plan.retry_attempts);
        Self {
            test_id: test_id.into(),
            plan: Arc::new(plan),
            base_url: base_url.into(),
            auth,
            client_config,
            policy,
            reporter,
        }
    }

    /// Override retry pacing; `max_attempts` always comes from the plan.
    pub fn with_retry_delays(mut self, retry_delay: Duration, timeout_backoff_base: Duration) -> Self {
        self.policy.retry_delay = retry_delay;
        self.policy.timeout_backoff_base = timeout_backoff_base;
        self
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Run the whole population and return the merged outcome.
    pub async fn run(&self) -> Result<SessionOutcome, WorkerError> {
        let start = Instant::now();
        let duration = Duration::from_secs(self.plan.duration_secs);
        let deadline = start.checked_add(duration).ok_or_else(|| {
            WorkerError::InvalidPlan(format!(
                "duration of {}s is too large",
                self.plan.duration_secs
            ))
        })?;
        let ctx = Arc::new(SessionContext {
            plan: self.plan.clone(),
            base_url: self.base_url.clone(),
            auth: self.auth.clone(),
            policy: self.policy.clone(),
            start,
            deadline,
        });

        info!(
            test_id = %self.test_id,
            user_model = ?self.plan.user_model,
            pattern = self.plan.pattern.label(),
            users = self.plan.num_users,
            duration_secs = self.plan.duration_secs,
            "Starting population"
        );

        let progress = spawn_progress(self.reporter.clone(), self.test_id.clone(), start, duration);

        let result = match self.plan.user_model {
            UserModel::Closed => self.run_closed(ctx).await,
            UserModel::Open => self.run_open(ctx, duration).await,
        };

        progress.abort();
        let _ = progress.await;

        if let Ok(ref outcome) = result {
            info!(
                test_id = %self.test_id,
                requests = outcome.requests,
                successful = outcome.successful,
                failed = outcome.failed,
                elapsed_secs = start.elapsed().as_secs_f64(),
                "Population finished"
            );
        }
        result
    }

    async fn run_closed(&self, ctx: Arc<SessionContext>) -> Result<SessionOutcome, WorkerError> {
        // Clients are built up front so a bad configuration fails the test.
        let clients = (0..self.plan.num_users)
            .map(|_| build_client(&self.client_config))
            .collect::<Result<Vec<_>, _>>()?;

        let deadline = ctx.deadline;
        let handles: Vec<JoinHandle<SessionOutcome>> = clients
            .into_iter()
            .enumerate()
            .map(|(user_id, client)| {
                let generator = WorkloadGenerator::from_plan(&ctx.plan);
                tokio::spawn(run_session(
                    ctx.clone(),
                    client,
                    user_id as u64,
                    generator,
                    deadline,
                ))
            })
            .collect();

        let mut total = SessionOutcome::new();
        for handle in handles {
            collect(&mut total, handle.await);
        }
        Ok(total)
    }

    async fn run_open(
        &self,
        ctx: Arc<SessionContext>,
        duration: Duration,
    ) -> Result<SessionOutcome, WorkerError> {
        let arrival_rate = match self.plan.arrival_rate {
            Some(rate) => rate,
            None => {
                warn!(
                    default = DEFAULT_ARRIVAL_RATE,
                    "Open model without arrival_rate, using default"
                );
                DEFAULT_ARRIVAL_RATE
            }
        };
        let probability = (arrival_rate * ARRIVAL_TICK.as_secs_f64()).clamp(0.0, 1.0);

        let mut total = SessionOutcome::new();
        let mut active: Vec<JoinHandle<SessionOutcome>> = Vec::new();
        let mut next_session_id: u64 = 0;

        while ctx.start.elapsed() < duration {
            if rand::random::<f64>() < probability {
                let session_id = next_session_id;
                next_session_id += 1;

                match build_client(&self.client_config) {
                    Ok(client) => {
                        let generator = WorkloadGenerator::from_plan(&ctx.plan);
                        // Lifetimes too large for a Duration run to the end of the test.
                        let lifetime =
                            Duration::try_from_secs_f64(generator.session_duration().max(0.0))
                                .unwrap_or(duration);
                        debug!(session_id, lifetime_secs = lifetime.as_secs_f64(), "Session arrived");
                        let session_deadline =
                            Instant::now().checked_add(lifetime).unwrap_or(ctx.deadline);
                        active.push(tokio::spawn(run_session(
                            ctx.clone(),
                            client,
                            session_id,
                            generator,
                            session_deadline,
                        )));
                    }
                    Err(e) => {
                        error!(session_id, error = %e, "Failed to build client for session");
                    }
                }
            }

            let (finished, running): (Vec<_>, Vec<_>) =
                active.into_iter().partition(|handle| handle.is_finished());
            active = running;
            for handle in finished {
                collect(&mut total, handle.await);
            }

            sleep(ARRIVAL_TICK).await;
        }

        debug!(remaining = active.len(), "Arrivals closed, draining sessions");
        for handle in active {
            collect(&mut total, handle.await);
        }
        Ok(total)
    }
}

fn collect(total: &mut SessionOutcome, joined: Result<SessionOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => total.merge(outcome),
        Err(e) => error!(error = %e, "Session task failed"),
    }
}

/// Pace with the workload generator until `deadline`, then run the
/// journeys once (or one random flat step when there are none).
async fn run_session(
    ctx: Arc<SessionContext>,
    client: reqwest::Client,
    session_id: u64,
    mut generator: WorkloadGenerator,
    deadline: Instant,
) -> SessionOutcome {
    ACTIVE_SESSIONS.inc();
    let mut outcome = SessionOutcome::new();

    loop {
        let now = Instant::now();
        generator.update_time(now.duration_since(ctx.start).as_secs_f64());
        if now >= deadline {
            break;
        }
        let delay = generator.next_delay();
        sleep(pacing_pause(delay, now, deadline)).await;
    }

    let runner = JourneyRunner::new(
        client,
        ctx.base_url.clone(),
        ctx.auth.clone(),
        Duration::from_secs(ctx.plan.timeout_secs),
        ctx.policy.clone(),
    );

    if !ctx.plan.journeys.is_empty() {
        let summary = runner.run(&ctx.plan.journeys, session_id, &mut outcome).await;
        debug!(
            session_id,
            steps = summary.steps_executed,
            terminated = summary.terminated,
            "Journeys complete"
        );
    } else {
        let step = ctx.plan.steps.choose(&mut rand::thread_rng()).cloned();
        match step {
            Some(step) => {
                runner.run_step(&step, session_id, &mut outcome).await;
            }
            None => debug!(session_id, "No steps to execute"),
        }
    }

    ACTIVE_SESSIONS.dec();
    outcome
}

/// Sleep for one pacing delay, never past `deadline`.
fn pacing_pause(delay_secs: f64, now: Instant, deadline: Instant) -> Duration {
    let remaining = deadline.saturating_duration_since(now);
    Duration::try_from_secs_f64(delay_secs.max(0.0)).map_or(remaining, |pause| pause.min(remaining))
}

/// Report elapsed percentage every `max(1, duration / 10)` seconds.
fn spawn_progress(
    reporter: Arc<dyn Reporter>,
    test_id: String,
    start: Instant,
    duration: Duration,
) -> JoinHandle<()> {
    let period = Duration::from_secs((duration.as_secs() / 10).max(1));
    let total_secs = duration.as_secs_f64();

    tokio::spawn(async move {
        let mut ticker = time::interval_at(start + period, period);
        loop {
            ticker.tick().await;
            let elapsed = start.elapsed().as_secs_f64();
            let percent = if total_secs > 0.0 {
                (elapsed / total_secs * 100.0).min(100.0)
            } else {
                100.0
            };
            reporter.progress(&test_id, percent).await;
            if elapsed >= total_secs {
                break;
            }
        }
    })
}
