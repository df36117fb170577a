//! The contract every training backend implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::JobConfig;
use crate::error::FedResult;
use crate::model::{DataFactory, ModelFactory};
use crate::partition::PartitionedData;
use crate::types::{FrameworkCapability, FrameworkType, ScenarioType, TrainingMetrics};

/// How a round ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RoundOutcome {
    /// Updates were aggregated into the global model
    Aggregated { loss: f64, accuracy: f64 },
    /// Too few participants; the global model is unchanged
    Dropout { reason: String },
}

/// Summary of one round, handed to the [`RoundHook`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: u32,
    pub selected: usize,
    pub participants: usize,
    pub outcome: RoundOutcome,
    #[serde(with = "crate::config::duration_str")]
    pub duration: Duration,
}

impl RoundReport {
    pub fn is_dropout(&self) -> bool {
        matches!(self.outcome, RoundOutcome::Dropout { .. })
    }
}

/// Callback surface between a running adapter and its orchestrator.
#[async_trait]
pub trait RoundHook: Send + Sync {
    /// Called after every round, aggregated or dropped.
    async fn on_round(&self, report: &RoundReport);

    /// Polled at round boundaries.
    fn is_cancelled(&self) -> bool;
}

/// Hook that ignores reports and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

#[async_trait]
impl RoundHook for NoopHook {
    async fn on_round(&self, _report: &RoundReport) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A training backend.
///
/// `initialize` must be called exactly once before `run_scenario`.
#[async_trait]
pub trait FrameworkAdapter: Send + Sync {
    fn framework_type(&self) -> FrameworkType;

    fn capabilities(&self) -> FrameworkCapability;

    fn is_initialized(&self) -> bool;

    async fn initialize(
        &mut self,
        model_factory: Arc<dyn ModelFactory>,
        data_factory: Arc<dyn DataFactory>,
    ) -> FedResult<()>;

    /// Run the configured rounds and return the collected metrics.
    async fn run_scenario(
        &self,
        scenario: ScenarioType,
        data: &PartitionedData,
        config: &JobConfig,
        hook: &dyn RoundHook,
    ) -> FedResult<TrainingMetrics>;
}

/// Produces fresh, uninitialized adapters of one framework type.
pub trait AdapterFactory: Send + Sync {
    fn capabilities(&self) -> FrameworkCapability;

    fn create(&self) -> Box<dyn FrameworkAdapter>;

    fn framework_type(&self) -> FrameworkType {
        self.capabilities().framework_type
    }
}
