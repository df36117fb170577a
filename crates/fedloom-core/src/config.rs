//! # Job and Orchestrator Configuration
//!
//! Per-job settings live in [`JobConfig`]. Process-wide settings live in
//! [`OrchestratorConfig`], which can be loaded from the environment.
//!
//! ## Environment Variables
//!
//! ### Orchestrator
//! - `FEDLOOM_CROSS_SILO_THRESHOLD` - Client count above which a job is "large" (default: 1000)
//! - `FEDLOOM_MAX_CONCURRENT_JOBS` - Jobs allowed to run at once (default: 32)
//! - `FEDLOOM_EVENT_BUFFER_SIZE` - Broadcast buffer for event subscribers (default: 256)
//! - `FEDLOOM_EVENT_HANDLER_TIMEOUT` - Per-handler delivery timeout, e.g. `5s` (default: 5s)
//!
//! ### Job defaults
//! - `FEDLOOM_NUM_ROUNDS` - Rounds per job (default: 10)
//! - `FEDLOOM_MIN_CLIENTS_PER_ROUND` - Per-round participant minimum (default: 2)
//! - `FEDLOOM_ROUND_TIMEOUT` - Round deadline, e.g. `30s` (default: 30s)
//! - `FEDLOOM_MAX_AGGREGATION_RETRIES` - Aggregation attempts before failing (default: 3)
//! - `FEDLOOM_PARTICIPATION_FLOOR` - Fraction of rounds that must reach the minimum (default: 0.5)
//! - `FEDLOOM_CONVERGENCE_THRESHOLD` - Loss variance that counts as converged (default: 1e-4)
//! - `FEDLOOM_CONVERGENCE_WINDOW` - Rounds in the variance window (default: 3)

use serde::{Deserialize, Serialize};
use std::{env, time::Duration};

use crate::error::{FedError, FedResult};
use crate::types::{FrameworkType, SecurityLevel};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for FedError {
    fn from(err: ConfigError) -> Self {
        FedError::Configuration(err.to_string())
    }
}

/// Serde adapter writing durations as humantime strings ("30s", "150ms").
pub mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Early-stopping rule: population variance of the last `window` round
/// losses below `threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceCriterion {
    pub window: usize,
    pub threshold: f64,
    /// Aggregated rounds required before the check applies
    pub min_rounds: u32,
}

impl Default for ConvergenceCriterion {
    fn default() -> Self {
        Self {
            window: 3,
            threshold: 1e-4,
            min_rounds: 3,
        }
    }
}

impl ConvergenceCriterion {
    /// Never stop early.
    pub fn disabled() -> Self {
        Self {
            window: 3,
            threshold: 0.0,
            min_rounds: u32::MAX,
        }
    }

    pub fn is_converged(&self, losses: &[f64]) -> bool {
        if self.window < 2
            || losses.len() < self.window
            || (losses.len() as u64) < u64::from(self.min_rounds)
        {
            return false;
        }
        let recent = &losses[losses.len() - self.window..];
        let mean = recent.iter().sum::<f64>() / recent.len() as f64;
        let variance =
            recent.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / recent.len() as f64;
        variance < self.threshold
    }
}

/// Settings for a single job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub num_rounds: u32,
    pub min_clients_per_round: usize,
    /// Differential-privacy epsilon; `None` disables noise
    pub privacy_budget: Option<f64>,
    pub security_level: SecurityLevel,
    /// `None` lets the selector decide
    pub framework_preference: Option<FrameworkType>,
    /// Fraction of rounds that must reach `min_clients_per_round`
    pub participation_floor: f64,
    #[serde(with = "duration_str")]
    pub round_timeout: Duration,
    pub max_aggregation_retries: u32,
    #[serde(with = "duration_str")]
    pub aggregation_backoff: Duration,
    pub convergence: ConvergenceCriterion,
    pub local_epochs: u32,
    /// Seed for participant sampling and reference noise
    pub seed: Option<u64>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            num_rounds: 10,
            min_clients_per_round: 2,
            privacy_budget: None,
            security_level: SecurityLevel::Standard,
            framework_preference: None,
            participation_floor: 0.5,
            round_timeout: Duration::from_secs(30),
            max_aggregation_retries: 3,
            aggregation_backoff: Duration::from_millis(50),
            convergence: ConvergenceCriterion::default(),
            local_epochs: 1,
            seed: None,
        }
    }
}

impl JobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_rounds(mut self, num_rounds: u32) -> Self {
        self.num_rounds = num_rounds;
        self
    }

    #[must_use]
    pub fn with_min_clients_per_round(mut self, min: usize) -> Self {
        self.min_clients_per_round = min;
        self
    }

    #[must_use]
    pub fn with_privacy_budget(mut self, epsilon: f64) -> Self {
        self.privacy_budget = Some(epsilon);
        self
    }

    #[must_use]
    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    #[must_use]
    pub fn with_framework(mut self, framework: FrameworkType) -> Self {
        self.framework_preference = Some(framework);
        self
    }

    #[must_use]
    pub fn with_participation_floor(mut self, floor: f64) -> Self {
        self.participation_floor = floor;
        self
    }

    #[must_use]
    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_aggregation_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.max_aggregation_retries = retries;
        self.aggregation_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_convergence(mut self, convergence: ConvergenceCriterion) -> Self {
        self.convergence = convergence;
        self
    }

    #[must_use]
    pub fn with_local_epochs(mut self, epochs: u32) -> Self {
        self.local_epochs = epochs;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Rounds that must reach `min_clients_per_round`.
    pub fn required_rounds(&self) -> u32 {
        let rounds = f64::from(self.num_rounds);
        // Tolerance absorbs float error such as 0.8 * 10 = 8.000000000000002.
        let required = (self.participation_floor * rounds - 1e-9).ceil().max(0.0) as u32;
        required.min(self.num_rounds)
    }

    /// Dropout rounds a job may absorb before it fails.
    pub fn allowed_dropout_rounds(&self) -> u32 {
        self.num_rounds - self.required_rounds()
    }

    /// Validate against the job's client count.
    pub fn validate(&self, num_clients: usize) -> FedResult<()> {
        if num_clients == 0 {
            return Err(FedError::Configuration(
                "num_clients must be greater than 0".to_string(),
            ));
        }
        if self.num_rounds == 0 {
            return Err(FedError::Configuration(
                "num_rounds must be greater than 0".to_string(),
            ));
        }
        if self.min_clients_per_round == 0 || self.min_clients_per_round > num_clients {
            return Err(FedError::Configuration(format!(
                "min_clients_per_round must be between 1 and {num_clients}"
            )));
        }
        if !(self.participation_floor > 0.0 && self.participation_floor <= 1.0) {
            return Err(FedError::Configuration(
                "participation_floor must be in (0, 1]".to_string(),
            ));
        }
        if let Some(epsilon) = self.privacy_budget
            && !(epsilon.is_finite() && epsilon > 0.0)
        {
            return Err(FedError::Configuration(
                "privacy_budget must be a positive number".to_string(),
            ));
        }
        if self.round_timeout.is_zero() {
            return Err(FedError::Configuration(
                "round_timeout must be greater than 0".to_string(),
            ));
        }
        if self.local_epochs == 0 {
            return Err(FedError::Configuration(
                "local_epochs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Process-wide orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Jobs with more clients than this are "large"
    pub cross_silo_threshold: usize,
    pub max_concurrent_jobs: usize,
    pub event_buffer_size: usize,
    #[serde(with = "duration_str")]
    pub event_handler_timeout: Duration,
    /// Defaults applied by callers that do not build their own `JobConfig`
    pub job_defaults: JobConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cross_silo_threshold: 1000,
            max_concurrent_jobs: 32,
            event_buffer_size: 256,
            event_handler_timeout: Duration::from_secs(5),
            job_defaults: JobConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from `FEDLOOM_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        OrchestratorConfigBuilder::from_env()?.build()
    }
}

/// Builder for `OrchestratorConfig` with environment variable support
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Create a new builder with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any environment variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::default();

        if let Some(threshold) = get_env_usize("FEDLOOM_CROSS_SILO_THRESHOLD")? {
            builder = builder.cross_silo_threshold(threshold);
        }
        if let Some(max) = get_env_usize("FEDLOOM_MAX_CONCURRENT_JOBS")? {
            builder = builder.max_concurrent_jobs(max);
        }
        if let Some(size) = get_env_usize("FEDLOOM_EVENT_BUFFER_SIZE")? {
            builder = builder.event_buffer_size(size);
        }
        if let Some(timeout) = get_env_duration("FEDLOOM_EVENT_HANDLER_TIMEOUT")? {
            builder = builder.event_handler_timeout(timeout);
        }

        // Job defaults
        let mut job = JobConfig::default();
        if let Some(rounds) = get_env_u32("FEDLOOM_NUM_ROUNDS")? {
            job.num_rounds = rounds;
        }
        if let Some(min) = get_env_usize("FEDLOOM_MIN_CLIENTS_PER_ROUND")? {
            job.min_clients_per_round = min;
        }
        if let Some(timeout) = get_env_duration("FEDLOOM_ROUND_TIMEOUT")? {
            job.round_timeout = timeout;
        }
        if let Some(retries) = get_env_u32("FEDLOOM_MAX_AGGREGATION_RETRIES")? {
            job.max_aggregation_retries = retries;
        }
        if let Some(floor) = get_env_f64("FEDLOOM_PARTICIPATION_FLOOR")? {
            job.participation_floor = floor;
        }
        if let Some(threshold) = get_env_f64("FEDLOOM_CONVERGENCE_THRESHOLD")? {
            job.convergence.threshold = threshold;
        }
        if let Some(window) = get_env_usize("FEDLOOM_CONVERGENCE_WINDOW")? {
            job.convergence.window = window;
        }
        builder = builder.job_defaults(job);

        Ok(builder)
    }

    #[must_use]
    pub fn cross_silo_threshold(mut self, threshold: usize) -> Self {
        self.config.cross_silo_threshold = threshold;
        self
    }

    #[must_use]
    pub fn max_concurrent_jobs(mut self, max: usize) -> Self {
        self.config.max_concurrent_jobs = max;
        self
    }

    #[must_use]
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    #[must_use]
    pub fn event_handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.event_handler_timeout = timeout;
        self
    }

    #[must_use]
    pub fn job_defaults(mut self, job: JobConfig) -> Self {
        self.config.job_defaults = job;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<OrchestratorConfig, ConfigError> {
        self.validate()?;
        Ok(self.config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let config = &self.config;
        if config.max_concurrent_jobs == 0 {
            return Err(ConfigError::ValidationError(
                "max_concurrent_jobs must be greater than 0".to_string(),
            ));
        }
        if config.event_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "event_buffer_size must be greater than 0".to_string(),
            ));
        }
        if config.event_handler_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "event_handler_timeout must be greater than 0".to_string(),
            ));
        }
        let job = &config.job_defaults;
        if job.num_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "num_rounds must be greater than 0".to_string(),
            ));
        }
        if job.min_clients_per_round == 0 {
            return Err(ConfigError::ValidationError(
                "min_clients_per_round must be greater than 0".to_string(),
            ));
        }
        if !(job.participation_floor > 0.0 && job.participation_floor <= 1.0) {
            return Err(ConfigError::ValidationError(
                "participation_floor must be in (0, 1]".to_string(),
            ));
        }
        if job.convergence.threshold < 0.0 {
            return Err(ConfigError::ValidationError(
                "convergence threshold must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn get_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<usize>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid integer '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_u32(key: &str) -> Result<Option<u32>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<u32>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid integer '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_f64(key: &str) -> Result<Option<f64>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<f64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid number '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_duration(key: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(key) {
        Ok(val) => humantime::parse_duration(&val)
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid duration '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}
