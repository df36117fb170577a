//! # fedloom-frameworks
//!
//! Reference training backends for fedloom:
//!
//! - **[`SwarmAdapter`]**: sampled fan-out over very large thin-client
//!   populations
//! - **[`ConsortiumAdapter`]**: full participation across a few enterprise
//!   silos, with vertical (feature-partitioned) support
//!
//! Both share one round loop and delegate aggregation, privacy noise and
//! update filtering to a [`CollaboratorSet`]. The [`simulation`] module
//! provides a synthetic model and dataset for local runs and tests.

pub mod collaborators;
pub mod consortium;
mod engine;
pub mod simulation;
pub mod swarm;

pub use collaborators::{CollaboratorSet, FedAvgOptimizer, LaplaceNoise, MedianDistanceFilter};
pub use consortium::{ConsortiumAdapter, ConsortiumFactory};
pub use simulation::{
    SimulationProfile, SyntheticDataFactory, SyntheticDataset, SyntheticModel,
    SyntheticModelFactory,
};
pub use swarm::{SwarmAdapter, SwarmFactory};

use fedloom_core::AdapterFactory;
use std::sync::Arc;

/// Factories for both reference backends sharing `collaborators`.
pub fn default_factories(collaborators: CollaboratorSet) -> Vec<Arc<dyn AdapterFactory>> {
    vec![
        Arc::new(SwarmFactory::new(collaborators.clone())),
        Arc::new(ConsortiumFactory::new(collaborators)),
    ]
}
