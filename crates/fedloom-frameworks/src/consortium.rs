//! Enterprise backend: every organization trains every round.

use async_trait::async_trait;
use fedloom_core::{
    AdapterFactory, DataFactory, FedError, FedResult, FrameworkAdapter, FrameworkCapability,
    FrameworkType, JobConfig, ModelFactory, PartitionedData, RoundHook, ScenarioType,
    SecurityLevel, TrainingMetrics,
};
use std::sync::Arc;
use tracing::info;

use crate::collaborators::CollaboratorSet;
use crate::engine::{EngineProfile, Factories, RoundEngine};

const MAX_CLIENTS: usize = 1_000;
const DEFAULT_CONCURRENCY: usize = 16;

/// Backend for a few trusted participants, with feature-partitioned
/// (vertical) support and update filtering from `Standard` security.
#[derive(Debug)]
pub struct ConsortiumAdapter {
    factories: Option<Factories>,
    collaborators: CollaboratorSet,
    profile: EngineProfile,
}

impl Default for ConsortiumAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsortiumAdapter {
    pub fn new() -> Self {
        Self {
            factories: None,
            collaborators: CollaboratorSet::default(),
            profile: EngineProfile {
                framework: FrameworkType::Consortium,
                sample_fraction: 1.0,
                max_concurrency: DEFAULT_CONCURRENCY,
                filter_from: SecurityLevel::Standard,
                require_label_party: true,
            },
        }
    }

    #[must_use]
    pub fn with_collaborators(mut self, collaborators: CollaboratorSet) -> Self {
        self.collaborators = collaborators;
        self
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.profile.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn capability() -> FrameworkCapability {
        FrameworkCapability::new(FrameworkType::Consortium)
            .with_max_clients(MAX_CLIENTS)
            .with_scenarios(ScenarioType::ALL)
            .enterprise_ready(true)
            .with_max_concurrency(DEFAULT_CONCURRENCY)
            .with_description("Full participation across organizations, vertical alignment")
    }
}

#[async_trait]
impl FrameworkAdapter for ConsortiumAdapter {
    fn framework_type(&self) -> FrameworkType {
        FrameworkType::Consortium
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
                "consortium adapter is already initialized".to_string(),
            ));
        }
        self.factories = Some(Factories {
            model: model_factory,
            data: data_factory,
        });
        info!(
            max_concurrency = self.profile.max_concurrency,
            "Consortium adapter initialized"
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
            .ok_or_else(|| FedError::NotInitialized(FrameworkType::Consortium.to_string()))?;

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

/// Creates fresh [`ConsortiumAdapter`]s.
#[derive(Debug, Clone, Default)]
pub struct ConsortiumFactory {
    collaborators: CollaboratorSet,
}

impl ConsortiumFactory {
    pub fn new(collaborators: CollaboratorSet) -> Self {
        Self { collaborators }
    }
}

impl AdapterFactory for ConsortiumFactory {
    fn capabilities(&self) -> FrameworkCapability {
        ConsortiumAdapter::capability()
    }

    fn create(&self) -> Box<dyn FrameworkAdapter> {
        Box::new(ConsortiumAdapter::new().with_collaborators(self.collaborators.clone()))
    }
}
