//! Job lifecycle: create, execute, cancel, inspect.
//!
//! ```text
//! Pending ──execute──▶ Running ──▶ Completed
//!                         │   └──▶ Failed
//!                         └─cancel─▶ Cancelled
//! ```
//!
//! Configuration problems (bad partitioning, unknown framework, job not
//! pending) are returned before the job leaves `Pending`. Once running,
//! every outcome is written to the store exactly once; a cancellation wins
//! over whatever the adapter reports afterwards.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use fedloom_core::{
    DataFactory, FedError, FedResult, FrameworkCapability, FrameworkType, Job, JobConfig,
    JobResult, JobStatus, JobStatusSnapshot, ModelFactory, OrchestratorConfig, PerformanceRecord,
    RoundHook, RoundOutcome, RoundReport, ScenarioType, partition_clients,
};
use fedloom_observability::JobMetrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, Semaphore, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::{EventBus, EventHandler, JobEvent};
use crate::export::{ExportFormat, ExportedJobResult};
use crate::registry::FrameworkCapabilityRegistry;
use crate::selector::{FrameworkRecommendation, FrameworkSelector, Requirements};
use crate::store::{InMemoryJobStore, JobQuery, JobStore};
use crate::tracker::PerformanceTracker;

#[derive(Clone)]
struct JobFactories {
    model: Arc<dyn ModelFactory>,
    data: Arc<dyn DataFactory>,
}

/// Summary returned by [`Orchestrator::get_performance_report`].
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub per_key_stats: Vec<PerformanceRecord>,
    /// Framework of the most recently started job
    pub active_framework: Option<FrameworkType>,
    pub available_frameworks: Vec<FrameworkCapability>,
    pub configuration: OrchestratorConfig,
}

/// Coordinates jobs across the registered training backends.
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    tracker: Arc<PerformanceTracker>,
    registry: Arc<FrameworkCapabilityRegistry>,
    selector: FrameworkSelector,
    events: EventBus,
    metrics: Option<Arc<JobMetrics>>,
    factories: Arc<DashMap<String, JobFactories>>,
    cancellations: Arc<DashMap<String, watch::Sender<bool>>>,
    job_slots: Arc<Semaphore>,
    active_framework: RwLock<Option<FrameworkType>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("running", &self.cancellations.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn metrics(&self) -> Option<&Arc<JobMetrics>> {
        self.metrics.as_ref()
    }

    /// Receive every job event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub async fn register_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.events.register(handler).await;
    }

    /// Wait until every event published so far reached the handlers.
    pub async fn flush_events(&self) {
        self.events.flush().await;
    }

    /// Validate and store a new `Pending` job. Nothing runs yet.
    pub async fn create_job(
        &self,
        scenario_type: ScenarioType,
        num_clients: usize,
        model_factory: Arc<dyn ModelFactory>,
        data_factory: Arc<dyn DataFactory>,
        config: JobConfig,
    ) -> FedResult<String> {
        if num_clients == 0 {
            return Err(FedError::Configuration(
                "num_clients must be greater than 0".to_string(),
            ));
        }
        config.validate(num_clients)?;

        let job = Job::new(scenario_type, num_clients, config);
        let job_id = job.id.clone();
        self.store.insert(job).await?;
        self.factories.insert(
            job_id.clone(),
            JobFactories {
                model: model_factory,
                data: data_factory,
            },
        );

        info!(job_id = %job_id, %scenario_type, num_clients, "Job created");
        self.events.publish(JobEvent::JobCreated {
            job_id: job_id.clone(),
            scenario_type,
            num_clients,
        });
        Ok(job_id)
    }

    /// Run a pending job to completion and return its terminal result.
    ///
    /// At most `max_concurrent_jobs` jobs run at once; callers beyond that
    /// wait with their job still `Pending`.
    pub async fn execute_job(&self, job_id: &str) -> FedResult<JobResult> {
        let started = Instant::now();
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| FedError::JobNotFound(job_id.to_string()))?;
        if job.status != JobStatus::Pending {
            return Err(FedError::Configuration(format!(
                "job {job_id} is {} and cannot be executed",
                job.status
            )));
        }
        let factories = self
            .factories
            .get(job_id)
            .map(|f| f.clone())
            .ok_or_else(|| FedError::Internal(format!("factories missing for job {job_id}")))?;

        let data = partition_clients(job.scenario_type, job.num_clients)?;
        let framework = self.selector.select(
            job.scenario_type,
            job.num_clients,
            job.framework_preference(),
        )?;
        let mut adapter = self.registry.create(framework).ok_or_else(|| {
            FedError::Configuration(format!("framework {framework} is not registered"))
        })?;

        let _slot = Arc::clone(&self.job_slots)
            .acquire_owned()
            .await
            .map_err(|_| FedError::Internal("job slots closed".to_string()))?;

        // Registered before the job is visible as Running so a cancel
        // arriving right after `start` always finds its sender.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        match self.cancellations.entry(job_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(FedError::Configuration(format!(
                    "job {job_id} is already executing"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(cancel_tx);
            }
        }
        let mut guard = RunGuard {
            job_id: job_id.to_string(),
            framework,
            started,
            store: Arc::clone(&self.store),
            factories: Arc::clone(&self.factories),
            cancellations: Arc::clone(&self.cancellations),
            events: self.events.clone(),
            metrics: self.metrics.clone(),
            running: false,
            armed: true,
        };
        // On error the guard only releases the cancellation entry.
        let job = self.store.start(job_id, framework).await?;
        guard.running = true;
        if let Some(metrics) = &self.metrics {
            metrics.record_job_started();
        }

        *self.active_framework.write().await = Some(framework);
        info!(
            job_id,
            %framework,
            scenario = %job.scenario_type,
            num_clients = job.num_clients,
            rounds = job.num_rounds(),
            "Job started"
        );
        self.events.publish(JobEvent::JobStarted {
            job_id: job_id.to_string(),
            framework,
        });
        let hook = JobHook {
            job_id,
            cancel: cancel_rx,
            events: &self.events,
            metrics: self.metrics.as_deref(),
        };
        let outcome = match adapter
            .initialize(Arc::clone(&factories.model), Arc::clone(&factories.data))
            .await
        {
            Ok(()) => {
                adapter
                    .run_scenario(job.scenario_type, &data, &job.config, &hook)
                    .await
            }
            Err(e) => Err(e),
        };
        self.cancellations.remove(job_id);

        let duration = started.elapsed().as_secs_f64();
        let result = match outcome {
            Ok(metrics) => JobResult::completed(job_id, framework, metrics, duration),
            Err(err) => {
                error!(
                    job_id,
                    %framework,
                    error_code = err.error_code(),
                    error = %err,
                    "Job failed"
                );
                JobResult::failed(job_id, Some(framework), &err, duration)
            }
        };

        let finalized = self.store.finalize(result.clone()).await;
        guard.disarm();
        if !finalized? {
            let stored = self.store.get_result(job_id).await?.ok_or_else(|| {
                FedError::Internal(format!("job {job_id} left running without a result"))
            })?;
            info!(
                job_id,
                status = %stored.status,
                discarded = %result.status,
                "Adapter finished after job was cancelled"
            );
            self.factories.remove(job_id);
            return Ok(stored);
        }
        self.factories.remove(job_id);

        let success = result.status == JobStatus::Completed;
        self.tracker.record(
            job_id,
            framework,
            job.scenario_type,
            result.metrics.as_ref(),
            success,
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_job_finished(result.status.as_str(), framework.as_str(), duration);
        }

        match &result.metrics {
            Some(training) if success => {
                info!(
                    job_id,
                    %framework,
                    duration_seconds = duration,
                    rounds = training.convergence_rounds,
                    dropped_rounds = training.dropped_rounds,
                    final_loss = training.final_loss(),
                    "Job completed"
                );
                self.events.publish(JobEvent::JobCompleted {
                    job_id: job_id.to_string(),
                    duration_seconds: duration,
                    rounds: training.convergence_rounds,
                });
            }
            _ => {
                self.events.publish(JobEvent::JobFailed {
                    job_id: job_id.to_string(),
                    error_code: result.error_code.clone().unwrap_or_default(),
                    error_message: result.error_message.clone().unwrap_or_default(),
                });
            }
        }
        Ok(result)
    }

    /// Run `execute_job` on its own Tokio task.
    ///
    /// The job keeps running if the returned handle is dropped.
    pub fn spawn_job(self: &Arc<Self>, job_id: impl Into<String>) -> JoinHandle<FedResult<JobResult>> {
        let orchestrator = Arc::clone(self);
        let job_id = job_id.into();
        tokio::spawn(async move { orchestrator.execute_job(&job_id).await })
    }

    /// Cancel a running job.
    ///
    /// Returns `false` and changes nothing when the job is unknown, still
    /// pending or already terminal. The adapter stops at its next round
    /// boundary.
    pub async fn cancel_job(&self, job_id: &str) -> bool {
        let job = match self.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(e) => {
                warn!(job_id, error = %e, "Cancel lookup failed");
                return false;
            }
        };
        if job.status != JobStatus::Running {
            debug!(job_id, status = %job.status, "Cancel ignored for job that is not running");
            return false;
        }

        let duration = job
            .started_at
            .map(|t| (Utc::now() - t).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or_default();
        let result = JobResult::cancelled(job_id, job.framework_used, duration);
        match self.store.finalize(result).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                warn!(job_id, error = %e, "Cancel could not be recorded");
                return false;
            }
        }

        if let Some(sender) = self.cancellations.get(job_id) {
            let _ = sender.send(true);
        }
        if let (Some(metrics), Some(framework)) = (&self.metrics, job.framework_used) {
            metrics.record_job_finished(JobStatus::Cancelled.as_str(), framework.as_str(), duration);
        }
        info!(job_id, framework = ?job.framework_used, "Job cancelled");
        self.events.publish(JobEvent::JobCancelled {
            job_id: job_id.to_string(),
        });
        true
    }

    pub async fn get_job_status(&self, job_id: &str) -> FedResult<Option<JobStatusSnapshot>> {
        self.store.snapshot(job_id).await
    }

    /// Snapshots of matching jobs, newest first unless the query says otherwise.
    pub async fn list_jobs(&self, query: Option<&JobQuery>) -> FedResult<Vec<JobStatusSnapshot>> {
        match query {
            Some(query) => self.store.list(query).await,
            None => self.store.list(&JobQuery::new()).await,
        }
    }

    /// Serialize the terminal result of a job (`"json"` or `"pretty"`).
    pub async fn export_job_results(&self, job_id: &str, format: &str) -> FedResult<String> {
        let format: ExportFormat = format.parse()?;
        if self.store.get(job_id).await?.is_none() {
            return Err(FedError::JobNotFound(job_id.to_string()));
        }
        let result = self
            .store
            .get_result(job_id)
            .await?
            .ok_or_else(|| FedError::NoResultsAvailable(job_id.to_string()))?;
        format.render(&ExportedJobResult::from(&result))
    }

    pub fn get_framework_recommendations(
        &self,
        scenario: ScenarioType,
        num_clients: usize,
        requirements: Option<&Requirements>,
    ) -> FedResult<FrameworkRecommendation> {
        self.selector.recommend(scenario, num_clients, requirements)
    }

    pub async fn get_performance_report(&self) -> PerformanceReport {
        PerformanceReport {
            per_key_stats: self.tracker.snapshot(),
            active_framework: *self.active_framework.read().await,
            available_frameworks: self.registry.capabilities(),
            configuration: self.config.clone(),
        }
    }
}

/// Cleans up after an `execute_job` future that was dropped or returned early.
///
/// Always releases the cancellation entry. Once the job is `Running`,
/// dropping it armed also writes a `Failed` result from a spawned task,
/// since the store is async. Disarmed after the real outcome is handed to
/// the store.
struct RunGuard {
    job_id: String,
    framework: FrameworkType,
    started: Instant,
    store: Arc<dyn JobStore>,
    factories: Arc<DashMap<String, JobFactories>>,
    cancellations: Arc<DashMap<String, watch::Sender<bool>>>,
    events: EventBus,
    metrics: Option<Arc<JobMetrics>>,
    running: bool,
    armed: bool,
}

impl RunGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cancellations.remove(&self.job_id);
        if !self.running {
            return;
        }
        self.factories.remove(&self.job_id);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(job_id = %self.job_id, "Execution abandoned outside a runtime; job left running");
            return;
        };
        let job_id = std::mem::take(&mut self.job_id);
        let framework = self.framework;
        let duration = self.started.elapsed().as_secs_f64();
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let metrics = self.metrics.take();

        runtime.spawn(async move {
            let err = FedError::Internal("execution abandoned before completion".to_string());
            let result = JobResult::failed(&job_id, Some(framework), &err, duration);
            match store.finalize(result.clone()).await {
                Ok(true) => {
                    warn!(job_id = %job_id, %framework, "Job execution abandoned by caller");
                    if let Some(metrics) = &metrics {
                        metrics.record_job_finished(
                            JobStatus::Failed.as_str(),
                            framework.as_str(),
                            duration,
                        );
                    }
                    events.publish(JobEvent::JobFailed {
                        job_id,
                        error_code: result.error_code.unwrap_or_default(),
                        error_message: result.error_message.unwrap_or_default(),
                    });
                }
                Ok(false) => debug!(job_id = %job_id, "Abandoned job already finalized"),
                Err(e) => error!(job_id = %job_id, error = %e, "Could not fail abandoned job"),
            }
        });
    }
}

/// Bridges adapter round reports to events and metrics.
struct JobHook<'a> {
    job_id: &'a str,
    cancel: watch::Receiver<bool>,
    events: &'a EventBus,
    metrics: Option<&'a JobMetrics>,
}

#[async_trait]
impl RoundHook for JobHook<'_> {
    async fn on_round(&self, report: &RoundReport) {
        if self.is_cancelled() {
            return;
        }
        let (event, outcome) = match &report.outcome {
            RoundOutcome::Aggregated { loss, accuracy } => (
                JobEvent::RoundCompleted {
                    job_id: self.job_id.to_string(),
                    round: report.round,
                    participants: report.participants,
                    loss: *loss,
                    accuracy: *accuracy,
                },
                "aggregated",
            ),
            RoundOutcome::Dropout { reason } => (
                JobEvent::RoundDropped {
                    job_id: self.job_id.to_string(),
                    round: report.round,
                    participants: report.participants,
                    reason: reason.clone(),
                },
                "dropped",
            ),
        };
        if let Some(metrics) = self.metrics {
            metrics.record_round(outcome);
        }
        self.events.publish(event);
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles an [`Orchestrator`] from injected components.
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: Option<OrchestratorConfig>,
    store: Option<Arc<dyn JobStore>>,
    tracker: Option<Arc<PerformanceTracker>>,
    registry: Option<FrameworkCapabilityRegistry>,
    metrics: Option<Arc<JobMetrics>>,
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share performance history between orchestrators.
    pub fn with_tracker(mut self, tracker: Arc<PerformanceTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_registry(mut self, registry: FrameworkCapabilityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<JobMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Build the orchestrator. Must run inside a Tokio runtime, which hosts
    /// the event dispatcher.
    pub fn build(self) -> FedResult<Orchestrator> {
        let config = self.config.unwrap_or_default();
        if config.max_concurrent_jobs == 0 {
            return Err(FedError::Configuration(
                "max_concurrent_jobs must be greater than 0".to_string(),
            ));
        }
        let registry = Arc::new(
            self.registry
                .unwrap_or_else(FrameworkCapabilityRegistry::with_defaults),
        );
        if registry.is_empty() {
            return Err(FedError::Configuration(
                "at least one framework must be registered".to_string(),
            ));
        }
        let tracker = self.tracker.unwrap_or_default();
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()));

        let selector = FrameworkSelector::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            config.cross_silo_threshold,
        );
        let events = EventBus::with_handlers(
            self.handlers,
            config.event_buffer_size,
            config.event_handler_timeout,
        );

        info!(
            frameworks = ?registry.frameworks(),
            cross_silo_threshold = config.cross_silo_threshold,
            max_concurrent_jobs = config.max_concurrent_jobs,
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            job_slots: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
            store,
            tracker,
            registry,
            selector,
            events,
            metrics: self.metrics,
            factories: Arc::new(DashMap::new()),
            cancellations: Arc::new(DashMap::new()),
            active_framework: RwLock::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedloom_core::ConvergenceCriterion;
    use fedloom_frameworks::{SimulationProfile, SyntheticDataFactory, SyntheticModelFactory};
    use std::time::Duration;

    fn orchestrator() -> Orchestrator {
        Orchestrator::builder().build().unwrap()
    }

    fn factories(profile: SimulationProfile) -> (Arc<dyn ModelFactory>, Arc<dyn DataFactory>) {
        (
            Arc::new(SyntheticModelFactory::new(4).with_profile(profile)),
            Arc::new(SyntheticDataFactory::new(4).with_seed(1)),
        )
    }

    fn config(rounds: u32) -> JobConfig {
        JobConfig::default()
            .with_rounds(rounds)
            .with_seed(42)
            .with_convergence(ConvergenceCriterion::disabled())
    }

    async fn create(
        orch: &Orchestrator,
        scenario: ScenarioType,
        clients: usize,
        profile: SimulationProfile,
        config: JobConfig,
    ) -> String {
        let (model, data) = factories(profile);
        orch.create_job(scenario, clients, model, data, config)
            .await
            .unwrap()
    }

    async fn wait_for_status(orch: &Orchestrator, job_id: &str, status: JobStatus) {
        for _ in 0..200 {
            let snapshot = orch.get_job_status(job_id).await.unwrap().unwrap();
            if snapshot.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} never reached {status}");
    }

    #[tokio::test]
    async fn test_create_job_validation() {
        let orch = orchestrator();
        let (model, data) = factories(SimulationProfile::new());

        let err = orch
            .create_job(ScenarioType::CrossSilo, 0, model.clone(), data.clone(), config(3))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");

        let err = orch
            .create_job(
                ScenarioType::CrossSilo,
                3,
                model,
                data,
                config(3).with_min_clients_per_round(5),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert!(orch.list_jobs(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cross_silo_job_completes() {
        let orch = orchestrator();
        let job_id = create(
            &orch,
            ScenarioType::CrossSilo,
            5,
            SimulationProfile::new(),
            config(4),
        )
        .await;

        let pending = orch.get_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(pending.status, JobStatus::Pending);
        assert!(pending.framework_used.is_none());

        let result = orch.execute_job(&job_id).await.unwrap();
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(result.framework_used, Some(FrameworkType::Consortium));
        assert!(result.error_message.is_none());
        let metrics = result.metrics.as_ref().unwrap();
        assert_eq!(metrics.loss_history.len(), 4);

        let status = orch.get_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.framework_used, Some(FrameworkType::Consortium));
        assert!(status.duration_seconds.is_some());

        let record = orch
            .tracker()
            .get(FrameworkType::Consortium, ScenarioType::CrossSilo)
            .unwrap();
        assert_eq!(record.runs, 1);
        assert_eq!(record.success_rate, 1.0);
        assert_eq!(record.avg_convergence_rounds, 4.0);

        let exported: serde_json::Value =
            serde_json::from_str(&orch.export_job_results(&job_id, "json").await.unwrap())
                .unwrap();
        assert_eq!(exported["status"], "completed");
        assert_eq!(exported["framework_used"], "consortium");
        assert!(exported["metrics"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let orch = orchestrator();
        let err = orch.execute_job("nope").await.unwrap_err();
        assert!(matches!(err, FedError::JobNotFound(_)));
        assert!(orch.get_job_status("nope").await.unwrap().is_none());
        assert!(!orch.cancel_job("nope").await);
        let err = orch.export_job_results("nope", "json").await.unwrap_err();
        assert!(matches!(err, FedError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_vertical_single_client_stays_pending() {
        let orch = orchestrator();
        let job_id = create(
            &orch,
            ScenarioType::Vertical,
            1,
            SimulationProfile::new(),
            config(3).with_min_clients_per_round(1),
        )
        .await;

        let err = orch.execute_job(&job_id).await.unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");

        let status = orch.get_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(status.status, JobStatus::Pending);
        assert!(orch.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_job_cannot_run_again() {
        let orch = orchestrator();
        let job_id = create(
            &orch,
            ScenarioType::CrossSilo,
            3,
            SimulationProfile::new(),
            config(2),
        )
        .await;
        orch.execute_job(&job_id).await.unwrap();

        let err = orch.execute_job(&job_id).await.unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert!(!orch.cancel_job(&job_id).await);

        let result = orch
            .store
            .get_result(&job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(orch.tracker().snapshot()[0].runs, 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_is_noop() {
        let orch = orchestrator();
        let job_id = create(
            &orch,
            ScenarioType::CrossSilo,
            3,
            SimulationProfile::new(),
            config(2),
        )
        .await;

        assert!(!orch.cancel_job(&job_id).await);
        let status = orch.get_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(status.status, JobStatus::Pending);
        let err = orch.export_job_results(&job_id, "json").await.unwrap_err();
        assert!(matches!(err, FedError::NoResultsAvailable(_)));
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let orch = Arc::new(orchestrator());
        let mut events = orch.subscribe();
        let job_id = create(
            &orch,
            ScenarioType::CrossSilo,
            3,
            SimulationProfile::new().with_latency(Duration::from_millis(20)),
            config(200),
        )
        .await;

        let handle = orch.spawn_job(job_id.clone());
        wait_for_status(&orch, &job_id, JobStatus::Running).await;

        assert!(orch.cancel_job(&job_id).await);
        assert!(!orch.cancel_job(&job_id).await);

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, JobStatus::Cancelled);
        assert!(result.metrics.is_none());
        assert!(result.error_message.is_none());

        let status = orch.get_job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(status.status, JobStatus::Cancelled);
        assert!(orch.tracker().is_empty());

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert_eq!(names.first(), Some(&"job_created"));
        assert!(names.contains(&"job_cancelled"));
        assert!(!names.contains(&"job_completed"));
    }

    #[tokio::test]
    async fn test_dropped_execution_fails_job() {
        let metrics = Arc::new(JobMetrics::new("dropped").unwrap());
        let orch = Orchestrator::builder()
            .with_metrics(Arc::clone(&metrics))
            .build()
            .unwrap();
        let mut events = orch.subscribe();
        let job_id = create(
            &orch,
            ScenarioType::CrossSilo,
            3,
            SimulationProfile::new().with_latency(Duration::from_millis(20)),
            config(50),
        )
        .await;

        let timed_out =
            tokio::time::timeout(Duration::from_millis(60), orch.execute_job(&job_id)).await;
        assert!(timed_out.is_err());

        wait_for_status(&orch, &job_id, JobStatus::Failed).await;
        let result = orch.store.get_result(&job_id).await.unwrap().unwrap();
        assert_eq!(result.error_code.as_deref(), Some("INTERNAL_ERROR"));
        assert!(result.error_message.is_some());
        assert!(orch.cancellations.is_empty());
        assert!(orch.factories.is_empty());
        assert_eq!(metrics.jobs_active(), 0);
        assert_eq!(metrics.jobs_total("failed"), 1.0);

        let err = orch.execute_job(&job_id).await.unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert!(!orch.cancel_job(&job_id).await);

        orch.flush_events().await;
        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert_eq!(names.last(), Some(&"job_failed"));
    }

    #[tokio::test]
    async fn test_participation_collapse_fails_job() {
        let orch = orchestrator();
        let job_id = create(
            &orch,
            ScenarioType::CrossSilo,
            4,
            SimulationProfile::new().with_offline_rounds(1..=10),
            config(10),
        )
        .await;

        let result = orch.execute_job(&job_id).await.unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(
            result.error_code.as_deref(),
            Some("INSUFFICIENT_PARTICIPANTS")
        );
        assert!(!result.error_message.as_deref().unwrap_or_default().is_empty());
        assert!(result.metrics.is_none());

        let exported: serde_json::Value =
            serde_json::from_str(&orch.export_job_results(&job_id, "json").await.unwrap())
                .unwrap();
        assert_eq!(exported["status"], "failed");
        assert!(!exported["error_message"].as_str().unwrap().is_empty());

        let record = orch
            .tracker()
            .get(FrameworkType::Consortium, ScenarioType::CrossSilo)
            .unwrap();
        assert_eq!(record.runs, 1);
        assert_eq!(record.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_event_order_for_job() {
        let orch = orchestrator();
        let mut events = orch.subscribe();
        let job_id = create(
            &orch,
            ScenarioType::CrossSilo,
            3,
            SimulationProfile::new().with_offline_rounds([2]),
            config(3),
        )
        .await;
        orch.execute_job(&job_id).await.unwrap();

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.job_id(), job_id);
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec![
                "job_created",
                "job_started",
                "round_completed",
                "round_dropped",
                "round_completed",
                "job_completed",
            ]
        );
    }

    struct PanickingHandler;

    #[async_trait]
    impl EventHandler for PanickingHandler {
        async fn handle(&self, _event: &JobEvent) -> FedResult<()> {
            panic!("observer bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_affect_job() {
        let orch = Orchestrator::builder()
            .with_event_handler(Arc::new(PanickingHandler))
            .build()
            .unwrap();
        let job_id = create(
            &orch,
            ScenarioType::Horizontal,
            4,
            SimulationProfile::new(),
            config(3),
        )
        .await;

        let result = orch.execute_job(&job_id).await.unwrap();
        orch.flush_events().await;
        assert_eq!(result.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_metrics_and_report() {
        let metrics = Arc::new(JobMetrics::new("test").unwrap());
        let orch = Orchestrator::builder()
            .with_metrics(Arc::clone(&metrics))
            .build()
            .unwrap();

        let report = orch.get_performance_report().await;
        assert!(report.active_framework.is_none());
        assert_eq!(report.available_frameworks.len(), 2);

        let job_id = create(
            &orch,
            ScenarioType::CrossDevice,
            20,
            SimulationProfile::new(),
            config(2).with_framework(FrameworkType::Swarm),
        )
        .await;
        let result = orch.execute_job(&job_id).await.unwrap();
        assert_eq!(result.framework_used, Some(FrameworkType::Swarm));

        assert_eq!(metrics.jobs_total("completed"), 1.0);
        assert_eq!(metrics.rounds_total("aggregated"), 2.0);
        assert_eq!(metrics.jobs_active(), 0);

        let report = orch.get_performance_report().await;
        assert_eq!(report.active_framework, Some(FrameworkType::Swarm));
        assert_eq!(report.per_key_stats.len(), 1);
        assert_eq!(report.configuration.cross_silo_threshold, 1000);
    }

    #[tokio::test]
    async fn test_excess_jobs_wait_pending() {
        let config_one = OrchestratorConfig {
            max_concurrent_jobs: 1,
            ..OrchestratorConfig::default()
        };
        let orch = Arc::new(Orchestrator::builder().with_config(config_one).build().unwrap());
        let slow = SimulationProfile::new().with_latency(Duration::from_millis(30));
        let first = create(&orch, ScenarioType::CrossSilo, 3, slow.clone(), config(4)).await;
        let second = create(&orch, ScenarioType::CrossSilo, 3, slow, config(2)).await;

        let first_handle = orch.spawn_job(first.clone());
        wait_for_status(&orch, &first, JobStatus::Running).await;
        let second_handle = orch.spawn_job(second.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiting = orch.get_job_status(&second).await.unwrap().unwrap();
        assert_eq!(waiting.status, JobStatus::Pending);

        assert_eq!(
            first_handle.await.unwrap().unwrap().status,
            JobStatus::Completed
        );
        assert_eq!(
            second_handle.await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_list_jobs_filters() {
        let orch = orchestrator();
        let done = create(
            &orch,
            ScenarioType::CrossSilo,
            3,
            SimulationProfile::new(),
            config(2),
        )
        .await;
        create(
            &orch,
            ScenarioType::CrossDevice,
            3,
            SimulationProfile::new(),
            config(2),
        )
        .await;
        orch.execute_job(&done).await.unwrap();

        let completed = orch
            .list_jobs(Some(&JobQuery::new().with_status(JobStatus::Completed)))
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].job_id, done);
        assert_eq!(orch.list_jobs(None).await.unwrap().len(), 2);
    }
}
