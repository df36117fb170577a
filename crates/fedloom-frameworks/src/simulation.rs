//! Synthetic model and data for simulated runs.
//!
//! Each client holds a target vector near a shared optimum; local training
//! moves the parameters toward the client's target, and the reported loss
//! is the squared distance of the incoming global model to that target.
//! Availability can be scripted per round and per client.

use async_trait::async_trait;
use fedloom_core::{
    ClientError, DataFactory, DataPartition, Dataset, FedError, FedResult, FitResult, Model,
    ModelFactory, ModelParameters,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// Scripted client availability and latency.
#[derive(Debug, Clone, Default)]
pub struct SimulationProfile {
    /// Probability that a client is unreachable in a given round
    pub dropout_rate: f64,
    /// Added to every local fit
    pub latency: Duration,
    /// Extra delay for specific rounds
    pub slow_rounds: BTreeMap<u32, Duration>,
    /// Rounds in which every client is unreachable
    pub offline_rounds: BTreeSet<u32>,
    /// Clients that never respond
    pub offline_clients: BTreeSet<String>,
    pub seed: u64,
}

impl SimulationProfile {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_dropout_rate(mut self, rate: f64) -> Self {
        self.dropout_rate = rate.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn with_slow_round(mut self, round: u32, delay: Duration) -> Self {
        self.slow_rounds.insert(round, delay);
        self
    }

    #[must_use]
    pub fn with_offline_rounds(mut self, rounds: impl IntoIterator<Item = u32>) -> Self {
        self.offline_rounds.extend(rounds);
        self
    }

    #[must_use]
    pub fn with_offline_client(mut self, client_id: impl Into<String>) -> Self {
        self.offline_clients.insert(client_id.into());
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn is_unavailable(&self, client_id: &str, round: u32) -> bool {
        if self.offline_rounds.contains(&round) || self.offline_clients.contains(client_id) {
            return true;
        }
        if self.dropout_rate <= 0.0 {
            return false;
        }
        let seed = self.seed ^ fnv1a(client_id) ^ u64::from(round).rotate_left(32);
        StdRng::seed_from_u64(seed).random_bool(self.dropout_rate)
    }

    fn delay_for(&self, round: u32) -> Duration {
        self.latency + self.slow_rounds.get(&round).copied().unwrap_or_default()
    }
}

fn fnv1a(input: &str) -> u64 {
    input.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Local data of one simulated client.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    partition: DataPartition,
    target: Vec<f64>,
    columns: Range<usize>,
    num_examples: usize,
}

impl SyntheticDataset {
    pub fn target(&self) -> &[f64] {
        &self.target
    }

    /// Feature columns this client holds; all of them unless it is a vertical feature party.
    pub fn columns(&self) -> Range<usize> {
        self.columns.clone()
    }
}

impl Dataset for SyntheticDataset {
    fn partition(&self) -> &DataPartition {
        &self.partition
    }

    fn num_examples(&self) -> usize {
        self.num_examples
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builds [`SyntheticDataset`]s around a shared optimum of ones.
#[derive(Debug, Clone)]
pub struct SyntheticDataFactory {
    dim: usize,
    heterogeneity: f64,
    seed: u64,
}

impl SyntheticDataFactory {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            heterogeneity: 0.1,
            seed: 0,
        }
    }

    /// Spread of client targets around the shared optimum.
    #[must_use]
    pub fn with_heterogeneity(mut self, heterogeneity: f64) -> Self {
        self.heterogeneity = heterogeneity.abs();
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl DataFactory for SyntheticDataFactory {
    fn load(&self, partition: &DataPartition) -> FedResult<Arc<dyn Dataset>> {
        if self.dim == 0 {
            return Err(FedError::Configuration(
                "synthetic data needs at least one dimension".to_string(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(partition.index as u64));
        let target = (0..self.dim)
            .map(|_| 1.0 + self.heterogeneity * rng.random_range(-1.0..1.0))
            .collect();
        let columns = partition
            .feature_block
            .map_or(0..self.dim, |block| block.columns(self.dim));
        Ok(Arc::new(SyntheticDataset {
            partition: partition.clone(),
            target,
            columns,
            num_examples: 20 + (partition.index * 37) % 80,
        }))
    }
}

/// Linear model pulled toward each client's target.
#[derive(Debug, Clone)]
pub struct SyntheticModel {
    parameters: Vec<f64>,
    learning_rate: f64,
    profile: Arc<SimulationProfile>,
}

#[async_trait]
impl Model for SyntheticModel {
    fn parameters(&self) -> ModelParameters {
        ModelParameters::new(self.parameters.clone())
    }

    fn set_parameters(&mut self, parameters: &ModelParameters) -> Result<(), ClientError> {
        if parameters.len() != self.parameters.len() {
            return Err(ClientError::Training(format!(
                "expected {} parameters, got {}",
                self.parameters.len(),
                parameters.len()
            )));
        }
        self.parameters.clone_from(&parameters.values);
        Ok(())
    }

    async fn fit(
        &mut self,
        dataset: &dyn Dataset,
        round: u32,
        local_epochs: u32,
    ) -> Result<FitResult, ClientError> {
        let data = dataset
            .as_any()
            .downcast_ref::<SyntheticDataset>()
            .ok_or_else(|| ClientError::Training("unsupported dataset type".to_string()))?;
        let client_id = data.partition.client_id.as_str();

        if self.profile.is_unavailable(client_id, round) {
            return Err(ClientError::Unavailable(format!(
                "{client_id} unreachable in round {round}"
            )));
        }
        let delay = self.profile.delay_for(round);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if data.target.len() != self.parameters.len() {
            return Err(ClientError::Training("dimension mismatch".to_string()));
        }

        let loss = self
            .parameters
            .iter()
            .zip(&data.target)
            .map(|(p, t)| (p - t).powi(2))
            .sum::<f64>()
            / self.parameters.len() as f64;

        for _ in 0..local_epochs {
            for (p, t) in self.parameters.iter_mut().zip(&data.target) {
                *p += self.learning_rate * (t - *p);
            }
        }

        Ok(FitResult {
            parameters: self.parameters(),
            num_examples: data.num_examples,
            loss,
            accuracy: 1.0 / (1.0 + loss),
        })
    }
}

/// Creates [`SyntheticModel`]s starting at the origin.
#[derive(Debug, Clone)]
pub struct SyntheticModelFactory {
    dim: usize,
    learning_rate: f64,
    profile: Arc<SimulationProfile>,
}

impl SyntheticModelFactory {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            learning_rate: 0.5,
            profile: Arc::new(SimulationProfile::default()),
        }
    }

    #[must_use]
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: SimulationProfile) -> Self {
        self.profile = Arc::new(profile);
        self
    }
}

impl ModelFactory for SyntheticModelFactory {
    fn create(&self) -> FedResult<Box<dyn Model>> {
        Ok(Box::new(SyntheticModel {
            parameters: vec![0.0; self.dim],
            learning_rate: self.learning_rate,
            profile: Arc::clone(&self.profile),
        }))
    }
}
