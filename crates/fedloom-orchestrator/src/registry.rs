//! Registered backends, keyed by [`FrameworkType`].

use fedloom_core::{AdapterFactory, FrameworkAdapter, FrameworkCapability, FrameworkType};
use fedloom_frameworks::{CollaboratorSet, default_factories};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Capability metadata plus the factory that builds fresh adapters.
#[derive(Clone, Default)]
pub struct FrameworkCapabilityRegistry {
    factories: BTreeMap<FrameworkType, Arc<dyn AdapterFactory>>,
}

impl std::fmt::Debug for FrameworkCapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameworkCapabilityRegistry")
            .field("frameworks", &self.frameworks())
            .finish()
    }
}

impl FrameworkCapabilityRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding both reference backends.
    pub fn with_defaults() -> Self {
        Self::with_collaborators(CollaboratorSet::default())
    }

    /// Both reference backends, sharing `collaborators`.
    pub fn with_collaborators(collaborators: CollaboratorSet) -> Self {
        let mut registry = Self::new();
        for factory in default_factories(collaborators) {
            registry.register(factory);
        }
        registry
    }

    /// Add or replace the factory for its framework type.
    pub fn register(&mut self, factory: Arc<dyn AdapterFactory>) {
        let framework = factory.framework_type();
        debug!(%framework, "Framework registered");
        self.factories.insert(framework, factory);
    }

    pub fn contains(&self, framework: FrameworkType) -> bool {
        self.factories.contains_key(&framework)
    }

    pub fn capability(&self, framework: FrameworkType) -> Option<FrameworkCapability> {
        self.factories.get(&framework).map(|f| f.capabilities())
    }

    /// Capabilities of every registered framework, in framework order.
    pub fn capabilities(&self) -> Vec<FrameworkCapability> {
        self.factories.values().map(|f| f.capabilities()).collect()
    }

    pub fn frameworks(&self) -> Vec<FrameworkType> {
        self.factories.keys().copied().collect()
    }

    /// A fresh, uninitialized adapter.
    pub fn create(&self, framework: FrameworkType) -> Option<Box<dyn FrameworkAdapter>> {
        self.factories.get(&framework).map(|f| f.create())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
