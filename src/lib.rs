//! # fedloom
//!
//! fedloom runs federated training jobs across interchangeable backends. It
//! picks a backend per job from the scenario and client count, drives the
//! job through its lifecycle and keeps per-backend performance history that
//! feeds later recommendations.
//!
//! ## Core Components
//!
//! - **[`Orchestrator`]**: create, execute, cancel, inspect and export jobs
//! - **[`FrameworkSelector`]**: scenario and scale driven backend choice
//! - **[`FrameworkAdapter`]**: the contract every training backend implements
//! - **[`SwarmAdapter`], [`ConsortiumAdapter`]**: the reference backends
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fedloom::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> FedResult<()> {
//! let orchestrator = Orchestrator::builder().build()?;
//! let job_id = orchestrator
//!     .create_job(
//!         ScenarioType::CrossDevice,
//!         5000,
//!         Arc::new(SyntheticModelFactory::new(16)),
//!         Arc::new(SyntheticDataFactory::new(16)),
//!         JobConfig::default().with_rounds(20).with_privacy_budget(2.0),
//!     )
//!     .await?;
//!
//! let result = orchestrator.execute_job(&job_id).await?;
//! assert_eq!(result.framework_used, Some(FrameworkType::Swarm));
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Module aliases for namespaced access
// ============================================================================

pub use fedloom_core as core;
pub use fedloom_frameworks as frameworks;
#[cfg(feature = "observability")]
pub use fedloom_observability as observability;
pub use fedloom_orchestrator as orchestrator;

// ============================================================================
// Core types
// ============================================================================

pub use fedloom_core::{
    AdapterFactory, ConvergenceCriterion, FedError, FedResult, FrameworkAdapter,
    FrameworkCapability, FrameworkType, Job, JobConfig, JobResult, JobStatus, JobStatusSnapshot,
    OrchestratorConfig, PerformanceRecord, RoundHook, RoundOutcome, RoundReport, ScenarioType,
    SecurityLevel, StopReason, TrainingMetrics,
};

// ============================================================================
// Backends
// ============================================================================

pub use fedloom_frameworks::{
    CollaboratorSet, ConsortiumAdapter, SwarmAdapter, SyntheticDataFactory, SyntheticModelFactory,
};

// ============================================================================
// Orchestration
// ============================================================================

pub use fedloom_orchestrator::{
    EventBus, EventHandler, FrameworkRecommendation, FrameworkSelector, JobEvent, JobQuery,
    JobStore, Orchestrator, PerformanceReport, PerformanceTracker, Requirements,
};

/// Everything needed to create and run a job.
pub mod prelude {
    pub use fedloom_core::{
        FedError, FedResult, FrameworkType, JobConfig, JobResult, JobStatus, ScenarioType,
        SecurityLevel,
    };
    pub use fedloom_frameworks::{SyntheticDataFactory, SyntheticModelFactory};
    pub use fedloom_orchestrator::{JobQuery, Orchestrator, Requirements};
}
