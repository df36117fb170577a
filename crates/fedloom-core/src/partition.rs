//! Scenario-aware assignment of client data partitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::{FedError, FedResult};
use crate::types::ScenarioType;

/// What a partition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionRole {
    /// Full-schema sample shard (horizontal, cross-device, auto)
    Samples,
    /// Organization-owned dataset (cross-silo)
    Silo,
    /// Feature block without labels (vertical)
    Features,
    /// Label holder (vertical)
    Labels,
}

/// Position of a vertical feature party among all feature parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureBlock {
    pub index: usize,
    pub parties: usize,
}

impl FeatureBlock {
    /// Contiguous column range this party owns out of `num_features`.
    ///
    /// Blocks of one job tile `0..num_features` in order without overlap.
    /// A block is empty when there are more parties than features.
    pub fn columns(&self, num_features: usize) -> Range<usize> {
        let start = self.index * num_features / self.parties;
        let end = (self.index + 1) * num_features / self.parties;
        start..end
    }
}

/// One client's share of the training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPartition {
    pub client_id: String,
    pub index: usize,
    pub role: PartitionRole,
    /// Feature columns held by a vertical feature party
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_block: Option<FeatureBlock>,
}

impl DataPartition {
    fn new(client_id: String, index: usize, role: PartitionRole) -> Self {
        Self {
            client_id,
            index,
            role,
            feature_block: None,
        }
    }
}

/// Client data laid out for a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum PartitionedData {
    Flat {
        partitions: Vec<DataPartition>,
    },
    Silos {
        silos: BTreeMap<String, DataPartition>,
    },
    Vertical {
        features: Vec<DataPartition>,
        labels: DataPartition,
    },
}

impl PartitionedData {
    /// Number of participating clients.
    pub fn len(&self) -> usize {
        match self {
            PartitionedData::Flat { partitions } => partitions.len(),
            PartitionedData::Silos { silos } => silos.len(),
            PartitionedData::Vertical { features, .. } => features.len() + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All partitions in stable order. The label party comes last.
    pub fn partitions(&self) -> Vec<&DataPartition> {
        match self {
            PartitionedData::Flat { partitions } => partitions.iter().collect(),
            PartitionedData::Silos { silos } => silos.values().collect(),
            PartitionedData::Vertical { features, labels } => {
                features.iter().chain(std::iter::once(labels)).collect()
            }
        }
    }
}

/// Split `num_clients` into partitions for `scenario`.
///
/// Vertical jobs need at least one feature party besides the label party.
pub fn partition_clients(scenario: ScenarioType, num_clients: usize) -> FedResult<PartitionedData> {
    if num_clients == 0 {
        return Err(FedError::Configuration(
            "num_clients must be greater than 0".to_string(),
        ));
    }

    let data = match scenario {
        ScenarioType::CrossSilo => PartitionedData::Silos {
            silos: (0..num_clients)
                .map(|i| {
                    let name = format!("silo-{i:03}");
                    (name.clone(), DataPartition::new(name, i, PartitionRole::Silo))
                })
                .collect(),
        },
        ScenarioType::Vertical => {
            if num_clients < 2 {
                return Err(FedError::Configuration(
                    "vertical jobs need at least 2 clients (features and labels)".to_string(),
                ));
            }
            let parties = num_clients - 1;
            let features = (0..parties)
                .map(|i| DataPartition {
                    feature_block: Some(FeatureBlock { index: i, parties }),
                    ..DataPartition::new(format!("party-{i:03}"), i, PartitionRole::Features)
                })
                .collect();
            let labels = DataPartition::new(
                "label-party".to_string(),
                num_clients - 1,
                PartitionRole::Labels,
            );
            PartitionedData::Vertical { features, labels }
        }
        ScenarioType::CrossDevice | ScenarioType::Horizontal | ScenarioType::Auto => {
            PartitionedData::Flat {
                partitions: (0..num_clients)
                    .map(|i| DataPartition::new(format!("client-{i:05}"), i, PartitionRole::Samples))
                    .collect(),
            }
        }
    };

    tracing::debug!(scenario = %scenario, num_clients, "Partitioned client data");
    Ok(data)
}
