//! Typed model and dataset handles supplied by callers.
//!
//! Adapters only see these traits. What a model computes, and how a dataset
//! is stored, stays behind them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

use crate::error::{ClientError, FedResult};
use crate::partition::DataPartition;

/// Flat parameter vector exchanged between clients and the aggregator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    pub values: Vec<f64>,
}

impl ModelParameters {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance; `None` when dimensions differ.
    pub fn l2_distance(&self, other: &ModelParameters) -> Option<f64> {
        if self.len() != other.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                .sqrt(),
        )
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<f64>> for ModelParameters {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

/// Outcome of one client's local training.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub parameters: ModelParameters,
    pub num_examples: usize,
    pub loss: f64,
    pub accuracy: f64,
}

/// A fit result tagged with the client that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientUpdate {
    pub client_id: String,
    pub parameters: ModelParameters,
    pub num_examples: usize,
    pub loss: f64,
    pub accuracy: f64,
}

impl ClientUpdate {
    pub fn from_fit(client_id: impl Into<String>, fit: FitResult) -> Self {
        Self {
            client_id: client_id.into(),
            parameters: fit.parameters,
            num_examples: fit.num_examples,
            loss: fit.loss,
            accuracy: fit.accuracy,
        }
    }
}

/// A client's local data, opaque to adapters.
pub trait Dataset: Send + Sync {
    fn partition(&self) -> &DataPartition;

    fn num_examples(&self) -> usize;

    /// Lets a model downcast to the dataset type it was built for.
    fn as_any(&self) -> &dyn Any;
}

/// A trainable model instance.
#[async_trait]
pub trait Model: Send {
    fn parameters(&self) -> ModelParameters;

    fn set_parameters(&mut self, parameters: &ModelParameters) -> Result<(), ClientError>;

    /// Train locally starting from the current parameters.
    async fn fit(
        &mut self,
        dataset: &dyn Dataset,
        round: u32,
        local_epochs: u32,
    ) -> Result<FitResult, ClientError>;
}

/// Creates fresh model instances.
pub trait ModelFactory: Send + Sync {
    fn create(&self) -> FedResult<Box<dyn Model>>;
}

/// Loads the dataset behind a partition.
pub trait DataFactory: Send + Sync {
    fn load(&self, partition: &DataPartition) -> FedResult<Arc<dyn Dataset>>;
}
