//! Load-test DSL compiler.
//!
//! Turns a line-oriented script into an [`ExecutionPlan`]. Parsing is
//! best-effort: every line is handled on its own, unknown directives are
//! logged and skipped, and malformed numbers fall back to their defaults.
//!
//! ```text
//! users: 10
//! duration: 120
//! pattern: spike
//! spike_interval: 60
//!
//! journey: checkout
//! repeat: 2
//! - GET /products
//! fallback: /products/cached
//! - POST /cart {"item": 42}
//! end
//! ```

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_USERS: u32 = 1;
pub const DEFAULT_DURATION_SECS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

lazy_static! {
    static ref STEP_LINE: Regex =
        Regex::new(r"^-\s*(\w+)\s+([^\s{]+)\s*(\{.*\})?").expect("step pattern is valid");
}

/// Named shape of inter-request delay over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadPattern {
    #[default]
    Steady,
    Burst,
    RampUp,
    DailyCycle,
    Spike,
    GradualRamp,
}

impl WorkloadPattern {
    pub fn label(&self) -> &'static str {
        match self {
            WorkloadPattern::Steady => "steady",
            WorkloadPattern::Burst => "burst",
            WorkloadPattern::RampUp => "ramp_up",
            WorkloadPattern::DailyCycle => "daily_cycle",
            WorkloadPattern::Spike => "spike",
            WorkloadPattern::GradualRamp => "gradual_ramp",
        }
    }
}

impl FromStr for WorkloadPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "steady" => Ok(WorkloadPattern::Steady),
            "burst" => Ok(WorkloadPattern::Burst),
            "ramp_up" => Ok(WorkloadPattern::RampUp),
            "daily_cycle" => Ok(WorkloadPattern::DailyCycle),
            "spike" => Ok(WorkloadPattern::Spike),
            "gradual_ramp" => Ok(WorkloadPattern::GradualRamp),
            other => Err(format!("unknown workload pattern '{}'", other)),
        }
    }
}

impl fmt::Display for WorkloadPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How virtual users enter the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserModel {
    /// Fixed population running for the whole test.
    #[default]
    Closed,
    /// Sessions arrive at a rate and live for a sampled duration.
    Open,
}

impl FromStr for UserModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(UserModel::Closed),
            "open" => Ok(UserModel::Open),
            other => Err(format!("unknown user model '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether the step payload is sent as the request body.
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported HTTP method '{}'", other)),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One HTTP call of a journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub method: HttpMethod,

    /// Appended to the target base URL.
    pub path: String,

    /// JSON body for POST/PUT/PATCH. `None` when absent or unparseable.
    pub payload: Option<serde_json::Value>,

    /// Path tried once with GET when the step degrades to a fallback.
    pub fallback_path: Option<String>,
}

impl Step {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            payload: None,
            fallback_path: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_fallback(mut self, path: impl Into<String>) -> Self {
        self.fallback_path = Some(path.into());
        self
    }
}

/// A named, repeatable sequence of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    pub name: String,
    pub steps: Vec<Step>,

    /// Number of passes over `steps`, at least 1.
    pub repeat: u32,

    /// Raw `if:` text. Stored as written and never evaluated.
    pub condition: Option<String>,
}

impl Journey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            repeat: 1,
            condition: None,
        }
    }
}

/// Pattern-specific tuning. Unset values resolve to the documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    pub peak_hours: Vec<u32>,
    pub off_peak_multiplier: f64,

    /// `None` means the pattern's own default (1.0 for daily_cycle, 2.0 for spike).
    pub base_delay: Option<f64>,
    pub spike_interval: u64,
    pub spike_duration: u64,
    pub spike_intensity: f64,
    pub start_delay: f64,
    pub end_delay: f64,
    pub ramp_steps: u32,
}

impl PatternConfig {
    pub const DEFAULT_PEAK_HOURS: [u32; 6] = [9, 10, 11, 14, 15, 16];

    pub fn base_delay_or(&self, pattern_default: f64) -> f64 {
        self.base_delay.unwrap_or(pattern_default)
    }
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            peak_hours: Self::DEFAULT_PEAK_HOURS.to_vec(),
            off_peak_multiplier: 0.3,
            base_delay: None,
            spike_interval: 120,
            spike_duration: 30,
            spike_intensity: 5.0,
            start_delay: 3.0,
            end_delay: 0.5,
            ramp_steps: 10,
        }
    }
}

/// Everything the population simulator needs to run one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub num_users: u32,
    pub duration_secs: u64,
    pub pattern: WorkloadPattern,
    pub pattern_config: PatternConfig,
    pub user_model: UserModel,

    /// Sessions per second, only read by the open model.
    pub arrival_rate: Option<f64>,

    /// Mean session lifetime in seconds, only read by the open model.
    pub session_duration: Option<f64>,
    pub timeout_secs: u64,
    pub retry_attempts: u32,

    /// Every step in script order, whether or not it belongs to a journey.
    pub steps: Vec<Step>,
    pub journeys: Vec<Journey>,
}

impl Default for ExecutionPlan {
    fn default() -> Self {
        Self {
            num_users: DEFAULT_USERS,
            duration_secs: DEFAULT_DURATION_SECS,
            pattern: WorkloadPattern::default(),
            pattern_config: PatternConfig::default(),
            user_model: UserModel::default(),
            arrival_rate: None,
            session_duration: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            steps: Vec::new(),
            journeys: Vec::new(),
        }
    }
}

/// Directive keys recognised before the `:` of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Users,
    Duration,
    Pattern,
    UserModel,
    ArrivalRate,
    SessionDuration,
    Timeout,
    RetryAttempts,
    PeakHours,
    OffPeakMultiplier,
    BaseDelay,
    SpikeInterval,
    SpikeDuration,
    SpikeIntensity,
    StartDelay,
    EndDelay,
    RampSteps,
    Journey,
    Repeat,
    If,
    Fallback,
}

impl Directive {
    fn from_key(key: &str) -> Option<Self> {
        let directive = match key {
            "users" => Directive::Users,
            "duration" => Directive::Duration,
            "pattern" => Directive::Pattern,
            "user_model" => Directive::UserModel,
            "arrival_rate" => Directive::ArrivalRate,
            "session_duration" => Directive::SessionDuration,
            "timeout" => Directive::Timeout,
            "retry_attempts" => Directive::RetryAttempts,
            "peak_hours" => Directive::PeakHours,
            "off_peak_multiplier" => Directive::OffPeakMultiplier,
            "base_delay" => Directive::BaseDelay,
            "spike_interval" => Directive::SpikeInterval,
            "spike_duration" => Directive::SpikeDuration,
            "spike_intensity" => Directive::SpikeIntensity,
            "start_delay" => Directive::StartDelay,
            "end_delay" => Directive::EndDelay,
            "ramp_steps" => Directive::RampSteps,
            "journey" => Directive::Journey,
            "repeat" => Directive::Repeat,
            "if" => Directive::If,
            "fallback" => Directive::Fallback,
            _ => return None,
        };
        Some(directive)
    }
}

/// Parses `value`, logging and returning `default` when it does not convert.
fn parse_or<T: FromStr>(key: &str, value: &str, default: T) -> T {
    match value.parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            warn!(key = key, value = value, "Malformed numeric value, using default");
            default
        }
    }
}

fn parse_positive_f64(key: &str, value: &str) -> Option<f64> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Some(v),
        _ => {
            warn!(key = key, value = value, "Malformed rate value, leaving unset");
            None
        }
    }
}

fn parse_peak_hours(value: &str) -> Vec<u32> {
    let parsed: Result<Vec<u32>, _> = value.split(',').map(|h| h.trim().parse::<u32>()).collect();
    match parsed {
        Ok(hours) => hours,
        Err(_) => {
            warn!(value = value, "Malformed peak_hours, using default");
            PatternConfig::DEFAULT_PEAK_HOURS.to_vec()
        }
    }
}

/// Parses a step line such as `- POST /orders {"sku": 1}`.
///
/// Returns `None` (after logging) when the line is not a usable step.
pub fn parse_step_line(line: &str) -> Option<Step> {
    let Some(caps) = STEP_LINE.captures(line) else {
        warn!(line = line, "Invalid step format");
        return None;
    };

    let method = match caps[1].parse::<HttpMethod>() {
        Ok(m) => m,
        Err(e) => {
            warn!(line = line, error = %e, "Skipping step");
            return None;
        }
    };
    let path = caps[2].to_string();

    let payload = caps.get(3).and_then(|raw| {
        match serde_json::from_str::<serde_json::Value>(raw.as_str()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(payload = raw.as_str(), error = %e, "Invalid JSON payload");
                None
            }
        }
    });

    Some(Step {
        method,
        path,
        payload,
        fallback_path: None,
    })
}

/// Compiles a DSL script into an execution plan. Never fails.
pub fn parse_dsl(script: &str) -> ExecutionPlan {
    let mut plan = ExecutionPlan::default();
    // Index into `plan.journeys` of the journey receiving steps.
    let mut current: Option<usize> = None;

    for raw in script.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('-') {
            if let Some(step) = parse_step_line(line) {
                if let Some(idx) = current {
                    plan.journeys[idx].steps.push(step.clone());
                }
                plan.steps.push(step);
            }
            continue;
        }

        // Anything starting with "end" closes the journey, trailing text included.
        if line.starts_with("end") && !line.starts_with("end_delay") {
            current = None;
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            warn!(line = line, "Unrecognized DSL line");
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        let Some(directive) = Directive::from_key(key) else {
            warn!(line = line, key = key, "Unknown DSL directive");
            continue;
        };

        apply_directive(&mut plan, &mut current, directive, key, value);
    }

    plan
}

fn apply_directive(
    plan: &mut ExecutionPlan,
    current: &mut Option<usize>,
    directive: Directive,
    key: &str,
    value: &str,
) {
    let cfg = &mut plan.pattern_config;
    match directive {
        Directive::Users => plan.num_users = parse_or(key, value, DEFAULT_USERS),
        Directive::Duration => {
            let secs = parse_or(key, value, DEFAULT_DURATION_SECS);
            plan.duration_secs = if secs == 0 {
                warn!("Test duration must be positive, using default");
                DEFAULT_DURATION_SECS
            } else {
                secs
            };
        }
        Directive::Pattern => {
            if let Ok(pattern) = value.parse::<WorkloadPattern>() {
                plan.pattern = pattern;
            }
        }
        Directive::UserModel => match value.parse::<UserModel>() {
            Ok(model) => plan.user_model = model,
            Err(e) => warn!(error = %e, "Ignoring user_model"),
        },
        Directive::ArrivalRate => plan.arrival_rate = parse_positive_f64(key, value),
        Directive::SessionDuration => plan.session_duration = parse_positive_f64(key, value),
        Directive::Timeout => plan.timeout_secs = parse_or(key, value, DEFAULT_TIMEOUT_SECS),
        Directive::RetryAttempts => {
            plan.retry_attempts = parse_or(key, value, DEFAULT_RETRY_ATTEMPTS)
        }
        Directive::PeakHours => cfg.peak_hours = parse_peak_hours(value),
        Directive::OffPeakMultiplier => cfg.off_peak_multiplier = parse_or(key, value, 0.3),
        Directive::BaseDelay => {
            cfg.base_delay = match value.parse::<f64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key = key, value = value, "Malformed base_delay, using pattern default");
                    None
                }
            }
        }
        Directive::SpikeInterval => cfg.spike_interval = parse_or(key, value, 120),
        Directive::SpikeDuration => cfg.spike_duration = parse_or(key, value, 30),
        Directive::SpikeIntensity => cfg.spike_intensity = parse_or(key, value, 5.0),
        Directive::StartDelay => cfg.start_delay = parse_or(key, value, 3.0),
        Directive::EndDelay => cfg.end_delay = parse_or(key, value, 0.5),
        Directive::RampSteps => cfg.ramp_steps = parse_or(key, value, 10),
        Directive::Journey => {
            plan.journeys.push(Journey::new(value));
            *current = Some(plan.journeys.len() - 1);
        }
        Directive::Repeat => {
            if let Some(idx) = *current {
                let repeat = parse_or(key, value, 1u32);
                plan.journeys[idx].repeat = repeat.max(1);
            }
        }
        Directive::If => {
            if let Some(idx) = *current {
                plan.journeys[idx].condition = Some(value.to_string());
            }
        }
        Directive::Fallback => {
            let Some(last) = plan.steps.last_mut() else {
                warn!(value = value, "fallback without a preceding step");
                return;
            };
            let before = last.clone();
            last.fallback_path = Some(value.to_string());
            if let Some(idx) = *current {
                if let Some(step) = plan.journeys[idx].steps.last_mut() {
                    if *step == before {
                        step.fallback_path = Some(value.to_string());
                    }
                }
            }
        }
    }
}
