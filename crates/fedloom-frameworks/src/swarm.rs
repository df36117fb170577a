//! Thin-client backend: samples a fraction of a very large client
//! population each round.

use async_trait::async_trait;
use fedloom_core::{
    AdapterFactory, DataFactory, FedError, FedResult, FrameworkAdapter, FrameworkCapability,
    FrameworkType, JobConfig, ModelFactory, PartitionedData, RoundHook, ScenarioType,
    SecurityLevel, TrainingMetrics,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::collaborators::CollaboratorSet;
use crate::engine::{EngineProfile, Factories, RoundEngine};

const MAX_CLIENTS: usize = 1_000_000;
const DEFAULT_SAMPLE_FRACTION: f64 = 0.1;
const DEFAULT_CONCURRENCY: usize = 256;

/// Backend optimized for massive thin-client fan-out.
#[derive(Debug)]
pub struct SwarmAdapter {
    factories: Option<Factories>,
    collaborators: CollaboratorSet,
    profile: EngineProfile,
}

impl Default for SwarmAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SwarmAdapter {
    pub fn new() -> Self {
        Self {
            factories: None,
            collaborators: CollaboratorSet::default(),
            profile: EngineProfile {
                framework: FrameworkType::Swarm,
                sample_fraction: DEFAULT_SAMPLE_FRACTION,
                max_concurrency: DEFAULT_CONCURRENCY,
                filter_from: SecurityLevel::High,
                require_label_party: false,
            },
        }
    }

    #[must_use]
    pub fn with_collaborators(mut self, collaborators: CollaboratorSet) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Fraction of clients sampled per round, clamped to (0, 1].
    #[must_use]
    pub fn with_sample_fraction(mut self, fraction: f64) -> Self {
        self.profile.sample_fraction = fraction.clamp(f64::MIN_POSITIVE, 1.0);
        self
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.profile.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Declared capability of this backend.
    pub fn capability() -> FrameworkCapability {
        FrameworkCapability::new(FrameworkType::Swarm)
            .with_max_clients(MAX_CLIENTS)
            .with_scenarios([
                ScenarioType::CrossDevice,
                ScenarioType::Horizontal,
                ScenarioType::CrossSilo,
                ScenarioType::Auto,
            ])
            .enterprise_ready(false)
            .with_max_concurrency(DEFAULT_CONCURRENCY)
            .with_description("Sampled fan-out over very large thin-client populations")
    }
}

#[async_trait]
impl FrameworkAdapter for SwarmAdapter {
    fn framework_type(&self) -> FrameworkType {
        FrameworkType::Swarm
    }

    fn capabilities(&self) -> FrameworkCapability {
        Self::capability().with_max_concurrency(self.profile.max_concurrency)
    }

    fn is_initialized(&self) -> bool {
        self.factories.is_some()
    }

    async fn initialize(
        &mut self,
        model_factory: Arc<dyn ModelFactory>,
        data_factory: Arc<dyn DataFactory>,
    ) -> FedResult<()> {
        if self.factories.is_some() {
            return Err(FedError::Configuration(
                "swarm adapter is already initialized".to_string(),
            ));
        }
        self.factories = Some(Factories {
            model: model_factory,
            data: data_factory,
        });
        info!(
            sample_fraction = self.profile.sample_fraction,
            max_concurrency = self.profile.max_concurrency,
            "Swarm adapter initialized"
        );
        Ok(())
    }

    async fn run_scenario(
        &self,
        scenario: ScenarioType,
        data: &PartitionedData,
        config: &JobConfig,
        hook: &dyn RoundHook,
    ) -> FedResult<TrainingMetrics> {
        let factories = self
            .factories
            .as_ref()
            .ok_or_else(|| FedError::NotInitialized(FrameworkType::Swarm.to_string()))?;

        if !Self::capability().supports_scenario(scenario) {
            warn!(%scenario, "Swarm running a scenario it does not declare");
        }

        RoundEngine {
            profile: &self.profile,
            collaborators: &self.collaborators,
            factories,
            scenario,
            config,
            hook,
        }
        .run(data)
        .await
    }
}

/// Creates fresh [`SwarmAdapter`]s sharing one collaborator set.
#[derive(Debug, Clone, Default)]
pub struct SwarmFactory {
    collaborators: CollaboratorSet,
    sample_fraction: Option<f64>,
}

impl SwarmFactory {
    pub fn new(collaborators: CollaboratorSet) -> Self {
        Self {
            collaborators,
            sample_fraction: None,
        }
    }

    #[must_use]
    pub fn with_sample_fraction(mut self, fraction: f64) -> Self {
        self.sample_fraction = Some(fraction);
        self
    }
}

impl AdapterFactory for SwarmFactory {
    fn capabilities(&self) -> FrameworkCapability {
        SwarmAdapter::capability()
    }

    fn create(&self) -> Box<dyn FrameworkAdapter> {
        let mut adapter = SwarmAdapter::new().with_collaborators(self.collaborators.clone());
        if let Some(fraction) = self.sample_fraction {
            adapter = adapter.with_sample_fraction(fraction);
        }
        Box::new(adapter)
    }
}
