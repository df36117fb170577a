//! Domain types for jobs, results, metrics and framework metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use uuid::Uuid;

use crate::config::JobConfig;
use crate::error::{FedError, FedResult};

/// Deployment topology of a training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    /// Very many small, untrusted clients
    CrossDevice,
    /// Few large, trusted organizations
    CrossSilo,
    /// Shared feature schema, disjoint samples
    Horizontal,
    /// Disjoint features over shared samples, one label holder
    Vertical,
    /// Let the selector decide on scale alone
    Auto,
}

impl ScenarioType {
    pub const ALL: [ScenarioType; 5] = [
        ScenarioType::CrossDevice,
        ScenarioType::CrossSilo,
        ScenarioType::Horizontal,
        ScenarioType::Vertical,
        ScenarioType::Auto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioType::CrossDevice => "cross_device",
            ScenarioType::CrossSilo => "cross_silo",
            ScenarioType::Horizontal => "horizontal",
            ScenarioType::Vertical => "vertical",
            ScenarioType::Auto => "auto",
        }
    }
}

impl std::fmt::Display for ScenarioType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioType {
    type Err = FedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "cross_device" | "crossdevice" => Ok(ScenarioType::CrossDevice),
            "cross_silo" | "crosssilo" => Ok(ScenarioType::CrossSilo),
            "horizontal" => Ok(ScenarioType::Horizontal),
            "vertical" => Ok(ScenarioType::Vertical),
            "auto" => Ok(ScenarioType::Auto),
            other => Err(FedError::Configuration(format!(
                "unknown scenario type '{other}'"
            ))),
        }
    }
}

/// Training backend identifier.
///
/// `Swarm` is tuned for massive thin-client fan-out, `Consortium` for a
/// small number of enterprise participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameworkType {
    Swarm,
    Consortium,
}

impl FrameworkType {
    pub const ALL: [FrameworkType; 2] = [FrameworkType::Swarm, FrameworkType::Consortium];

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameworkType::Swarm => "swarm",
            FrameworkType::Consortium => "consortium",
        }
    }
}

impl std::fmt::Display for FrameworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameworkType {
    type Err = FedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "swarm" => Ok(FrameworkType::Swarm),
            "consortium" => Ok(FrameworkType::Consortium),
            other => Err(FedError::Configuration(format!(
                "unknown framework '{other}'"
            ))),
        }
    }
}

/// Security posture requested for a job. Ordered from weakest to strongest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Basic,
    #[default]
    Standard,
    High,
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityLevel::Basic => write!(f, "basic"),
            SecurityLevel::Standard => write!(f, "standard"),
            SecurityLevel::High => write!(f, "high"),
        }
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A training job as held by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub scenario_type: ScenarioType,
    pub num_clients: usize,
    pub config: JobConfig,
    pub status: JobStatus,
    /// Set once when execution starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework_used: Option<FrameworkType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job with a fresh UUID.
    pub fn new(scenario_type: ScenarioType, num_clients: usize, config: JobConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            scenario_type,
            num_clients,
            config,
            status: JobStatus::Pending,
            framework_used: None,
            created_at: now,
            updated_at: now,
            started_at: None,
        }
    }

    pub fn num_rounds(&self) -> u32 {
        self.config.num_rounds
    }

    pub fn min_clients_per_round(&self) -> usize {
        self.config.min_clients_per_round
    }

    pub fn privacy_budget(&self) -> Option<f64> {
        self.config.privacy_budget
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.config.security_level
    }

    pub fn framework_preference(&self) -> Option<FrameworkType> {
        self.config.framework_preference
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: JobStatus) -> FedResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(FedError::Configuration(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next == JobStatus::Running {
            self.started_at = Some(self.updated_at);
        }
        Ok(())
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    RoundsExhausted,
    Converged,
    Cancelled,
}

/// Per-round training history of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub loss_history: Vec<f64>,
    pub accuracy_history: Vec<f64>,
    /// Aggregated rounds until the run stopped
    pub convergence_rounds: u32,
    /// Named per-round series (participants, dropped clients, timings)
    #[serde(default)]
    pub round_metrics: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub stop_reason: StopReason,
    #[serde(default)]
    pub dropped_rounds: u32,
}

impl TrainingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.loss_history.last().copied()
    }

    pub fn final_accuracy(&self) -> Option<f64> {
        self.accuracy_history.last().copied()
    }

    /// Append a completed round.
    pub fn record_round(&mut self, loss: f64, accuracy: f64) {
        self.loss_history.push(loss);
        self.accuracy_history.push(accuracy);
        self.convergence_rounds = self.loss_history.len() as u32;
    }

    /// Append a value to a named series.
    pub fn push_series(&mut self, name: &str, value: f64) {
        self.round_metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}

/// Terminal outcome of a job. Written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    pub metrics: Option<TrainingMetrics>,
    pub duration_seconds: f64,
    pub framework_used: Option<FrameworkType>,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl JobResult {
    pub fn completed(
        job_id: impl Into<String>,
        framework: FrameworkType,
        metrics: TrainingMetrics,
        duration_seconds: f64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Completed,
            metrics: Some(metrics),
            duration_seconds,
            framework_used: Some(framework),
            error_message: None,
            error_code: None,
            completed_at: Utc::now(),
        }
    }

    /// Failed result carrying the sanitized message of `error`.
    pub fn failed(
        job_id: impl Into<String>,
        framework: Option<FrameworkType>,
        error: &FedError,
        duration_seconds: f64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            metrics: None,
            duration_seconds,
            framework_used: framework,
            error_message: Some(error.user_message()),
            error_code: Some(error.error_code().to_string()),
            completed_at: Utc::now(),
        }
    }

    pub fn cancelled(
        job_id: impl Into<String>,
        framework: Option<FrameworkType>,
        duration_seconds: f64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Cancelled,
            metrics: None,
            duration_seconds,
            framework_used: framework,
            error_message: None,
            error_code: None,
            completed_at: Utc::now(),
        }
    }
}

/// Declared metadata of a framework adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkCapability {
    pub framework_type: FrameworkType,
    pub max_clients: usize,
    pub supported_scenarios: BTreeSet<ScenarioType>,
    pub enterprise_ready: bool,
    /// Upper bound on concurrent client operations within a round
    pub max_concurrency: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl FrameworkCapability {
    pub fn new(framework_type: FrameworkType) -> Self {
        Self {
            framework_type,
            max_clients: usize::MAX,
            supported_scenarios: BTreeSet::new(),
            enterprise_ready: false,
            max_concurrency: 1,
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    #[must_use]
    pub fn with_scenarios(mut self, scenarios: impl IntoIterator<Item = ScenarioType>) -> Self {
        self.supported_scenarios.extend(scenarios);
        self
    }

    #[must_use]
    pub fn enterprise_ready(mut self, ready: bool) -> Self {
        self.enterprise_ready = ready;
        self
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn supports_scenario(&self, scenario: ScenarioType) -> bool {
        self.supported_scenarios.contains(&scenario)
    }

    /// Scenario is declared and the client count fits.
    pub fn supports(&self, scenario: ScenarioType, num_clients: usize) -> bool {
        self.supports_scenario(scenario) && num_clients <= self.max_clients
    }
}

/// Running statistics for one (framework, scenario) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub framework_type: FrameworkType,
    pub scenario_type: ScenarioType,
    pub runs: u64,
    pub successes: u64,
    pub avg_convergence_rounds: f64,
    pub convergence_samples: u64,
    pub success_rate: f64,
    pub avg_accuracy: f64,
    pub accuracy_samples: u64,
    pub last_updated: DateTime<Utc>,
}

impl PerformanceRecord {
    pub fn new(framework_type: FrameworkType, scenario_type: ScenarioType) -> Self {
        Self {
            framework_type,
            scenario_type,
            runs: 0,
            successes: 0,
            avg_convergence_rounds: 0.0,
            convergence_samples: 0,
            success_rate: 0.0,
            avg_accuracy: 0.0,
            accuracy_samples: 0,
            last_updated: Utc::now(),
        }
    }

    /// Fold one job outcome into the running averages.
    pub fn observe(&mut self, metrics: Option<&TrainingMetrics>, success: bool) {
        self.runs += 1;
        if success {
            self.successes += 1;
        }
        self.success_rate = self.successes as f64 / self.runs as f64;

        if let Some(metrics) = metrics {
            self.convergence_samples += 1;
            let n = self.convergence_samples as f64;
            self.avg_convergence_rounds +=
                (f64::from(metrics.convergence_rounds) - self.avg_convergence_rounds) / n;

            if let Some(accuracy) = metrics.final_accuracy() {
                self.accuracy_samples += 1;
                let n = self.accuracy_samples as f64;
                self.avg_accuracy += (accuracy - self.avg_accuracy) / n;
            }
        }
        self.last_updated = Utc::now();
    }
}

/// Point-in-time view of a job returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub scenario_type: ScenarioType,
    pub num_clients: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework_used: Option<FrameworkType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobStatusSnapshot {
    pub fn from_parts(job: &Job, result: Option<&JobResult>) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            scenario_type: job.scenario_type,
            num_clients: job.num_clients,
            created_at: job.created_at,
            duration_seconds: result.map(|r| r.duration_seconds),
            framework_used: job.framework_used,
            error_message: result.and_then(|r| r.error_message.clone()),
        }
    }
}
