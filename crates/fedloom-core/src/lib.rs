//! # fedloom-core
//!
//! Shared vocabulary for the fedloom federated-training orchestrator:
//! job and result types, the error taxonomy, configuration, client-data
//! partitioning and the traits that backends, models and collaborators
//! implement.
//!
//! ## Example
//!
//! ```rust
//! use fedloom_core::{JobConfig, ScenarioType, partition_clients};
//!
//! let config = JobConfig::default().with_rounds(5);
//! assert!(config.validate(8).is_ok());
//!
//! let data = partition_clients(ScenarioType::Vertical, 3).unwrap();
//! assert_eq!(data.len(), 3);
//! ```

pub mod adapter;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod model;
pub mod partition;
pub mod types;

pub use adapter::{
    AdapterFactory, FrameworkAdapter, NoopHook, RoundHook, RoundOutcome, RoundReport,
};
pub use collaborators::{PerformanceOptimizer, PrivacyManager, SecurityManager};
pub use config::{
    ConfigError, ConvergenceCriterion, JobConfig, OrchestratorConfig, OrchestratorConfigBuilder,
};
pub use error::{ClientError, FedError, FedResult};
pub use model::{
    ClientUpdate, DataFactory, Dataset, FitResult, Model, ModelFactory, ModelParameters,
};
pub use partition::{
    DataPartition, FeatureBlock, PartitionRole, PartitionedData, partition_clients,
};
pub use types::{
    FrameworkCapability, FrameworkType, Job, JobResult, JobStatus, JobStatusSnapshot,
    PerformanceRecord, ScenarioType, SecurityLevel, StopReason, TrainingMetrics,
};
