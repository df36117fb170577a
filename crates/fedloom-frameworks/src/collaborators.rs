//! Reference implementations of the collaborator interfaces.
//!
//! Weighted federated averaging, Laplace noise and a median-distance
//! Byzantine filter. Simple and replaceable.

use fedloom_core::{
    ClientUpdate, FedError, FedResult, ModelParameters, PerformanceOptimizer, PrivacyManager,
    SecurityManager,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::debug;

/// Weighted average of parameter sets (FedAvg).
#[derive(Debug, Default, Clone, Copy)]
pub struct FedAvgOptimizer;

impl PerformanceOptimizer for FedAvgOptimizer {
    fn aggregate(
        &self,
        parameter_sets: &[ModelParameters],
        weights: &[f64],
    ) -> FedResult<ModelParameters> {
        if parameter_sets.is_empty() {
            return Err(FedError::Aggregation("no parameter sets".to_string()));
        }
        if parameter_sets.len() != weights.len() {
            return Err(FedError::Aggregation(format!(
                "{} parameter sets but {} weights",
                parameter_sets.len(),
                weights.len()
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(FedError::Aggregation("invalid weight".to_string()));
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(FedError::Aggregation("weights sum to zero".to_string()));
        }

        let dim = parameter_sets[0].len();
        if parameter_sets.iter().any(|p| p.len() != dim) {
            return Err(FedError::Aggregation(
                "parameter sets have different dimensions".to_string(),
            ));
        }

        let mut averaged = vec![0.0; dim];
        for (params, weight) in parameter_sets.iter().zip(weights) {
            let share = weight / total;
            for (acc, value) in averaged.iter_mut().zip(&params.values) {
                *acc += value * share;
            }
        }
        Ok(ModelParameters::new(averaged))
    }
}

const NOISE_STREAM_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Laplace mechanism with per-round scale `sensitivity / epsilon`.
#[derive(Debug, Clone)]
pub struct LaplaceNoise {
    pub sensitivity: f64,
    seed: Option<u64>,
}

impl Default for LaplaceNoise {
    fn default() -> Self {
        Self {
            sensitivity: 0.01,
            seed: None,
        }
    }
}

impl LaplaceNoise {
    pub fn new(sensitivity: f64) -> Self {
        Self {
            sensitivity,
            seed: None,
        }
    }

    /// Fix the noise stream for jobs without their own seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn sample(rng: &mut StdRng, scale: f64) -> f64 {
        // Keep |u| strictly below 0.5 so ln() stays finite.
        let u: f64 = rng.random_range(-0.5..0.5);
        let u = u.clamp(-0.5 + 1e-12, 0.5 - 1e-12);
        -scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
    }
}

impl PrivacyManager for LaplaceNoise {
    fn apply_noise(
        &self,
        parameters: ModelParameters,
        round: u32,
        epsilon: f64,
        seed: Option<u64>,
    ) -> ModelParameters {
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return parameters;
        }
        let scale = self.sensitivity / epsilon;
        let base = seed.or(self.seed).unwrap_or_else(rand::random);
        // Decorrelate from the participant sampler, which uses the raw job seed.
        let stream = base
            .wrapping_mul(NOISE_STREAM_MIX)
            .wrapping_add(u64::from(round));
        let mut rng = StdRng::seed_from_u64(stream);
        let values = parameters
            .values
            .into_iter()
            .map(|v| v + Self::sample(&mut rng, scale))
            .collect();
        ModelParameters::new(values)
    }
}

/// Drops updates far from the coordinate-wise median.
///
/// An update is kept when its distance to the median is at most
/// `tolerance` times the median distance. Non-finite or mis-shaped
/// updates are always dropped.
#[derive(Debug, Clone)]
pub struct MedianDistanceFilter {
    pub tolerance: f64,
}

impl Default for MedianDistanceFilter {
    fn default() -> Self {
        Self { tolerance: 3.0 }
    }
}

impl MedianDistanceFilter {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

impl SecurityManager for MedianDistanceFilter {
    fn filter_byzantine_updates(&self, updates: Vec<ClientUpdate>) -> Vec<ClientUpdate> {
        let Some(dim) = updates.first().map(|u| u.parameters.len()) else {
            return updates;
        };
        let mut updates: Vec<_> = updates
            .into_iter()
            .filter(|u| u.parameters.len() == dim && u.parameters.is_finite())
            .collect();
        if updates.len() < 3 {
            return updates;
        }

        let center = ModelParameters::new(
            (0..dim)
                .map(|i| {
                    let mut column: Vec<f64> =
                        updates.iter().map(|u| u.parameters.values[i]).collect();
                    median(&mut column)
                })
                .collect(),
        );
        let distances: Vec<f64> = updates
            .iter()
            .map(|u| u.parameters.l2_distance(&center).unwrap_or(f64::INFINITY))
            .collect();
        let cutoff = median(&mut distances.clone()) * self.tolerance + 1e-9;

        let before = updates.len();
        let mut index = 0;
        updates.retain(|_| {
            let keep = distances[index] <= cutoff;
            index += 1;
            keep
        });
        if updates.len() < before {
            debug!(
                dropped = before - updates.len(),
                cutoff, "Filtered outlying client updates"
            );
        }
        updates
    }
}

/// The collaborators an adapter delegates to.
#[derive(Clone)]
pub struct CollaboratorSet {
    pub optimizer: Arc<dyn PerformanceOptimizer>,
    pub privacy: Arc<dyn PrivacyManager>,
    pub security: Arc<dyn SecurityManager>,
}

impl Default for CollaboratorSet {
    fn default() -> Self {
        Self {
            optimizer: Arc::new(FedAvgOptimizer),
            privacy: Arc::new(LaplaceNoise::default()),
            security: Arc::new(MedianDistanceFilter::default()),
        }
    }
}

impl std::fmt::Debug for CollaboratorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaboratorSet").finish_non_exhaustive()
    }
}

impl CollaboratorSet {
    #[must_use]
    pub fn with_optimizer(mut self, optimizer: Arc<dyn PerformanceOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    #[must_use]
    pub fn with_privacy(mut self, privacy: Arc<dyn PrivacyManager>) -> Self {
        self.privacy = privacy;
        self
    }

    #[must_use]
    pub fn with_security(mut self, security: Arc<dyn SecurityManager>) -> Self {
        self.security = security;
        self
    }
}
