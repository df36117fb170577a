//! Narrow interfaces to security, privacy and aggregation services.
//!
//! Adapters call these synchronously from inside a round. Implementations
//! are supplied from outside the orchestration layer.

use crate::error::FedResult;
use crate::model::{ClientUpdate, ModelParameters};

/// Drops updates that look malicious or corrupted.
pub trait SecurityManager: Send + Sync {
    fn filter_byzantine_updates(&self, updates: Vec<ClientUpdate>) -> Vec<ClientUpdate>;
}

/// Adds differential-privacy noise to aggregated parameters.
///
/// `seed` is the job seed; seeded jobs expect the same noise for the same
/// round on every run.
pub trait PrivacyManager: Send + Sync {
    fn apply_noise(
        &self,
        parameters: ModelParameters,
        round: u32,
        epsilon: f64,
        seed: Option<u64>,
    ) -> ModelParameters;
}

/// Combines client parameter sets into a new global model.
pub trait PerformanceOptimizer: Send + Sync {
    /// `weights[i]` belongs to `parameter_sets[i]`.
    fn aggregate(
        &self,
        parameter_sets: &[ModelParameters],
        weights: &[f64],
    ) -> FedResult<ModelParameters>;
}
