//! # fedloom-orchestrator
//!
//! Job lifecycle management on top of the fedloom training backends.
//!
//! - **[`Orchestrator`]**: create, execute, cancel and inspect jobs
//! - **[`FrameworkSelector`]**: scenario and scale driven backend choice,
//!   plus advisory recommendations from past performance
//! - **[`PerformanceTracker`]**: per (framework, scenario) running statistics
//! - **[`JobStore`]**: authoritative job and result storage
//! - **[`EventBus`]**: ordered lifecycle notifications
//!
//! ## Example
//!
//! ```rust,no_run
//! use fedloom_core::{JobConfig, ScenarioType};
//! use fedloom_frameworks::{SyntheticDataFactory, SyntheticModelFactory};
//! use fedloom_orchestrator::Orchestrator;
//! use std::sync::Arc;
//!
//! # async fn example() -> fedloom_core::FedResult<()> {
//! let orchestrator = Orchestrator::builder().build()?;
//! let job_id = orchestrator
//!     .create_job(
//!         ScenarioType::CrossSilo,
//!         5,
//!         Arc::new(SyntheticModelFactory::new(8)),
//!         Arc::new(SyntheticDataFactory::new(8)),
//!         JobConfig::default().with_rounds(5),
//!     )
//!     .await?;
//!
//! let result = orchestrator.execute_job(&job_id).await?;
//! assert!(result.status.is_terminal());
//! println!("{}", orchestrator.export_job_results(&job_id, "json").await?);
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod export;
pub mod orchestrator;
pub mod registry;
pub mod selector;
pub mod store;
pub mod tracker;

pub use events::{EventBus, EventHandler, JobEvent};
pub use export::{ExportFormat, ExportedJobResult, ExportedMetrics};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, PerformanceReport};
pub use registry::FrameworkCapabilityRegistry;
pub use selector::{FrameworkRecommendation, FrameworkSelector, Prediction, Requirements};
pub use store::{InMemoryJobStore, JobQuery, JobStore};
pub use tracker::PerformanceTracker;
