use rand::Rng;
use rand_distr::{Distribution, Exp};
use tokio::time::Duration;

use crate::dsl::{ExecutionPlan, PatternConfig, UserModel, WorkloadPattern};

/// Produces pacing delays for one virtual user or session.
///
/// Each concurrent user owns its own clone, so `update_time` never races
/// with another task.
#[derive(Debug, Clone)]
pub struct WorkloadGenerator {
    pattern: WorkloadPattern,
    num_users: u32,
    duration_secs: f64,
    config: PatternConfig,
    user_model: UserModel,
    arrival_rate: Option<f64>,
    session_duration_mean: Option<f64>,

    /// Seconds elapsed since the test started, as last reported.
    current_time: f64,
}

impl WorkloadGenerator {
    pub fn new(
        pattern: WorkloadPattern,
        num_users: u32,
        duration: Duration,
        config: PatternConfig,
        user_model: UserModel,
        arrival_rate: Option<f64>,
        session_duration_mean: Option<f64>,
    ) -> Self {
        Self {
            pattern,
            num_users,
            duration_secs: duration.as_secs_f64(),
            config,
            user_model,
            arrival_rate,
            session_duration_mean,
            current_time: 0.0,
        }
    }

    pub fn from_plan(plan: &ExecutionPlan) -> Self {
        Self::new(
            plan.pattern,
            plan.num_users,
            Duration::from_secs(plan.duration_secs),
            plan.pattern_config.clone(),
            plan.user_model,
            plan.arrival_rate,
            plan.session_duration,
        )
    }

    pub fn pattern(&self) -> WorkloadPattern {
        self.pattern
    }

    pub fn num_users(&self) -> u32 {
        self.num_users
    }

    pub fn arrival_rate(&self) -> Option<f64> {
        self.arrival_rate
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn update_time(&mut self, elapsed_secs: f64) {
        self.current_time = elapsed_secs;
    }

    /// Delay in seconds before the next action.
    pub fn next_delay(&self) -> f64 {
        self.next_delay_with(&mut rand::thread_rng())
    }

    /// `next_delay` drawing from the supplied RNG.
    pub fn next_delay_with<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self.pattern {
            WorkloadPattern::Steady => uniform(rng, 0.5, 1.5),
            WorkloadPattern::Burst => {
                if rng.gen::<f64>() < 0.7 {
                    uniform(rng, 0.1, 0.5)
                } else {
                    uniform(rng, 1.0, 3.0)
                }
            }
            WorkloadPattern::RampUp => {
                let base = 2.0 - self.progress() * 1.5;
                uniform(rng, base * 0.8, base * 1.2)
            }
            WorkloadPattern::DailyCycle => self.daily_cycle_delay(rng),
            WorkloadPattern::Spike => self.spike_delay(rng),
            WorkloadPattern::GradualRamp => {
                self.gradual_ramp_base() * uniform(rng, 0.7, 1.3)
            }
        }
    }

    /// Lifetime of one session in seconds.
    ///
    /// Open model: exponential with the configured mean, capped at three
    /// times the mean. Closed model: the whole test.
    pub fn session_duration(&self) -> f64 {
        self.session_duration_with(&mut rand::thread_rng())
    }

    pub fn session_duration_with<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match (self.user_model, self.session_duration_mean) {
            (UserModel::Open, Some(mean)) if mean > 0.0 => match Exp::new(1.0 / mean) {
                Ok(exp) => exp.sample(rng).min(mean * 3.0),
                Err(_) => self.duration_secs,
            },
            _ => self.duration_secs,
        }
    }

    /// Fraction of the test elapsed, clamped to [0, 1].
    fn progress(&self) -> f64 {
        if self.duration_secs <= 0.0 {
            return 1.0;
        }
        (self.current_time / self.duration_secs).clamp(0.0, 1.0)
    }

    fn daily_cycle_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let base_delay = self.config.base_delay_or(1.0);
        let hour_in_day = self.progress() * 24.0;

        let is_peak = self
            .config
            .peak_hours
            .iter()
            .any(|&peak| (hour_in_day - peak as f64).abs() < 0.5);

        if is_peak {
            base_delay * uniform(rng, 0.5, 1.0)
        } else {
            base_delay * self.config.off_peak_multiplier * uniform(rng, 1.0, 2.0)
        }
    }

    fn spike_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let base_delay = self.config.base_delay_or(2.0);
        let interval = self.config.spike_interval as f64;
        let time_in_cycle = if interval > 0.0 {
            self.current_time % interval
        } else {
            self.current_time
        };

        if time_in_cycle < self.config.spike_duration as f64 {
            let intensity = if self.config.spike_intensity > 0.0 {
                self.config.spike_intensity
            } else {
                1.0
            };
            base_delay / intensity * uniform(rng, 0.1, 0.3)
        } else {
            base_delay * uniform(rng, 0.8, 1.5)
        }
    }

    /// Un-jittered delay of the current gradual-ramp bucket.
    ///
    /// The first bucket holds `start_delay`, the last holds `end_delay`.
    fn gradual_ramp_base(&self) -> f64 {
        let steps = self.config.ramp_steps.max(1);
        if steps == 1 {
            return self.config.start_delay;
        }

        let bucket = ((self.progress() * steps as f64).floor() as u32).min(steps - 1);
        let fraction = bucket as f64 / (steps - 1) as f64;
        self.config.start_delay - (self.config.start_delay - self.config.end_delay) * fraction
    }
}

/// Uniform draw from `[low, high)`; collapses to `low` on an empty range.
fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    if high <= low {
        return low;
    }
    rng.gen_range(low..high)
}
