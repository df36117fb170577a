//! Authoritative job storage.
//!
//! The store owns every [`Job`] and its single [`JobResult`]. All status
//! changes go through it so that the lifecycle rules hold under concurrent
//! execution and cancellation:
//!
//! - `start` only moves a job out of `Pending`
//! - `finalize` only moves a job out of `Running`, writing the result once
//! - nothing leaves a terminal state

use async_trait::async_trait;
use fedloom_core::{
    FedError, FedResult, FrameworkType, Job, JobResult, JobStatus, JobStatusSnapshot,
    ScenarioType,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

// ============================================================================
// Job Query
// ============================================================================

/// Filter for job listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    /// Any of these statuses (OR)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario_type: Option<ScenarioType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<FrameworkType>,
    #[serde(default)]
    pub terminal_only: bool,
    #[serde(default)]
    pub active_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Sort order (true = newest first)
    #[serde(default = "JobQuery::default_newest_first")]
    pub newest_first: bool,
}

impl JobQuery {
    fn default_newest_first() -> bool {
        true
    }

    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<JobStatus>) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn with_scenario(mut self, scenario: ScenarioType) -> Self {
        self.scenario_type = Some(scenario);
        self
    }

    /// Jobs that ran (or are running) on `framework`.
    pub fn with_framework(mut self, framework: FrameworkType) -> Self {
        self.framework = Some(framework);
        self
    }

    pub fn terminal_only(mut self) -> Self {
        self.terminal_only = true;
        self.active_only = false;
        self
    }

    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self.terminal_only = false;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    fn without_limit(mut self) -> Self {
        self.limit = None;
        self
    }

    /// Check if a job matches this query.
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(status) = self.status
            && job.status != status
        {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&job.status) {
            return false;
        }
        if self.scenario_type.is_some_and(|s| s != job.scenario_type) {
            return false;
        }
        if self
            .framework
            .is_some_and(|f| job.framework_used != Some(f))
        {
            return false;
        }
        if self.terminal_only && !job.is_terminal() {
            return false;
        }
        if self.active_only && job.is_terminal() {
            return false;
        }
        true
    }
}

// ============================================================================
// Job Store Trait
// ============================================================================

/// Async interface over job persistence.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a new job. Fails if the id is already taken.
    async fn insert(&self, job: Job) -> FedResult<()>;

    async fn get(&self, job_id: &str) -> FedResult<Option<Job>>;

    /// Move a `Pending` job to `Running`, recording its framework.
    async fn start(&self, job_id: &str, framework: FrameworkType) -> FedResult<Job>;

    /// Write the terminal result of a `Running` job.
    ///
    /// Returns `false` and leaves everything untouched when the job is no
    /// longer running (for example because it was cancelled).
    async fn finalize(&self, result: JobResult) -> FedResult<bool>;

    async fn get_result(&self, job_id: &str) -> FedResult<Option<JobResult>>;

    async fn snapshot(&self, job_id: &str) -> FedResult<Option<JobStatusSnapshot>>;

    async fn list(&self, query: &JobQuery) -> FedResult<Vec<JobStatusSnapshot>>;

    /// Count jobs matching a query.
    async fn count(&self, query: &JobQuery) -> FedResult<usize> {
        Ok(self.list(&query.clone().without_limit()).await?.len())
    }
}

// ============================================================================
// In-Memory Job Store
// ============================================================================

#[derive(Debug)]
struct JobEntry {
    job: Job,
    result: Option<JobResult>,
}

/// Job store backed by a `RwLock`-guarded map.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, JobEntry>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> FedResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(FedError::Internal(format!("duplicate job id {}", job.id)));
        }
        debug!(job_id = %job.id, "Job stored");
        jobs.insert(job.id.clone(), JobEntry { job, result: None });
        Ok(())
    }

    async fn get(&self, job_id: &str) -> FedResult<Option<Job>> {
        Ok(self.jobs.read().await.get(job_id).map(|e| e.job.clone()))
    }

    async fn start(&self, job_id: &str, framework: FrameworkType) -> FedResult<Job> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| FedError::JobNotFound(job_id.to_string()))?;
        if entry.job.status != JobStatus::Pending {
            return Err(FedError::Configuration(format!(
                "job {job_id} is {} and cannot be executed",
                entry.job.status
            )));
        }
        entry.job.transition(JobStatus::Running)?;
        entry.job.framework_used = Some(framework);
        Ok(entry.job.clone())
    }

    async fn finalize(&self, result: JobResult) -> FedResult<bool> {
        if !result.status.is_terminal() {
            return Err(FedError::Internal(format!(
                "result for job {} is not terminal",
                result.job_id
            )));
        }
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&result.job_id)
            .ok_or_else(|| FedError::JobNotFound(result.job_id.clone()))?;
        if entry.job.status != JobStatus::Running || entry.result.is_some() {
            debug!(
                job_id = %result.job_id,
                current = %entry.job.status,
                attempted = %result.status,
                "Ignoring result for job that is no longer running"
            );
            return Ok(false);
        }
        entry.job.transition(result.status)?;
        entry.result = Some(result);
        Ok(true)
    }

    async fn get_result(&self, job_id: &str) -> FedResult<Option<JobResult>> {
        Ok(self
            .jobs
            .read()
            .await
            .get(job_id)
            .and_then(|e| e.result.clone()))
    }

    async fn snapshot(&self, job_id: &str) -> FedResult<Option<JobStatusSnapshot>> {
        Ok(self
            .jobs
            .read()
            .await
            .get(job_id)
            .map(|e| JobStatusSnapshot::from_parts(&e.job, e.result.as_ref())))
    }

    async fn list(&self, query: &JobQuery) -> FedResult<Vec<JobStatusSnapshot>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<&JobEntry> =
            jobs.values().filter(|e| query.matches(&e.job)).collect();

        matching.sort_by(|a, b| {
            let order = a
                .job
                .created_at
                .cmp(&b.job.created_at)
                .then_with(|| a.job.id.cmp(&b.job.id));
            if query.newest_first {
                order.reverse()
            } else {
                order
            }
        });

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .take(limit)
            .map(|e| JobStatusSnapshot::from_parts(&e.job, e.result.as_ref()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedloom_core::{JobConfig, TrainingMetrics};

    fn job(scenario: ScenarioType) -> Job {
        Job::new(scenario, 4, JobConfig::default())
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemoryJobStore::new();
        let job = job(ScenarioType::CrossSilo);
        let id = job.id.clone();
        store.insert(job).await.unwrap();

        let loaded = store.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert!(store.get("missing").await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_start_only_from_pending() {
        let store = InMemoryJobStore::new();
        let job = job(ScenarioType::CrossSilo);
        let id = job.id.clone();
        store.insert(job).await.unwrap();

        let started = store.start(&id, FrameworkType::Consortium).await.unwrap();
        assert_eq!(started.status, JobStatus::Running);
        assert_eq!(started.framework_used, Some(FrameworkType::Consortium));
        assert!(started.started_at.is_some());

        let err = store.start(&id, FrameworkType::Swarm).await.unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.framework_used, Some(FrameworkType::Consortium));

        let err = store.start("missing", FrameworkType::Swarm).await.unwrap_err();
        assert!(matches!(err, FedError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_finalize_written_once() {
        let store = InMemoryJobStore::new();
        let job = job(ScenarioType::CrossSilo);
        let id = job.id.clone();
        store.insert(job).await.unwrap();

        let early = JobResult::cancelled(&id, None, 0.0);
        assert!(!store.finalize(early).await.unwrap());

        store.start(&id, FrameworkType::Consortium).await.unwrap();
        assert!(
            store
                .finalize(JobResult::cancelled(&id, Some(FrameworkType::Consortium), 0.1))
                .await
                .unwrap()
        );

        let late = JobResult::completed(
            &id,
            FrameworkType::Consortium,
            TrainingMetrics::new(),
            1.0,
        );
        assert!(!store.finalize(late).await.unwrap());

        let result = store.get_result(&id).await.unwrap().unwrap();
        assert_eq!(result.status, JobStatus::Cancelled);
        let snapshot = store.snapshot(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert_eq!(snapshot.duration_seconds, Some(0.1));
    }

    #[tokio::test]
    async fn test_query_filters() {
        let store = InMemoryJobStore::new();
        let a = job(ScenarioType::CrossSilo);
        let b = job(ScenarioType::CrossDevice);
        let c = job(ScenarioType::CrossDevice);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        for j in [a, b, c] {
            store.insert(j).await.unwrap();
        }
        store.start(&a_id, FrameworkType::Consortium).await.unwrap();
        store.start(&b_id, FrameworkType::Swarm).await.unwrap();
        store
            .finalize(JobResult::completed(
                &b_id,
                FrameworkType::Swarm,
                TrainingMetrics::new(),
                2.0,
            ))
            .await
            .unwrap();

        let all = store.list(&JobQuery::new()).await.unwrap();
        assert_eq!(all.len(), 3);

        let device = JobQuery::new().with_scenario(ScenarioType::CrossDevice);
        assert_eq!(store.count(&device).await.unwrap(), 2);

        let running = store
            .list(&JobQuery::new().with_status(JobStatus::Running))
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].job_id, a_id);

        let swarm = store
            .list(&JobQuery::new().with_framework(FrameworkType::Swarm))
            .await
            .unwrap();
        assert_eq!(swarm.len(), 1);

        assert_eq!(
            store
                .count(&JobQuery::new().terminal_only())
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store.count(&JobQuery::new().active_only()).await.unwrap(),
            2
        );
        assert_eq!(
            store
                .list(&JobQuery::new().with_limit(2))
                .await
                .unwrap()
                .len(),
            2
        );
        let pending_or_done = JobQuery::new()
            .with_statuses(vec![JobStatus::Pending, JobStatus::Completed]);
        assert_eq!(store.count(&pending_or_done).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_order() {
        let store = InMemoryJobStore::new();
        let mut first = job(ScenarioType::Horizontal);
        first.created_at -= chrono::Duration::seconds(10);
        let second = job(ScenarioType::Horizontal);
        let (first_id, second_id) = (first.id.clone(), second.id.clone());
        store.insert(first).await.unwrap();
        store.insert(second).await.unwrap();

        let newest = store.list(&JobQuery::new()).await.unwrap();
        assert_eq!(newest[0].job_id, second_id);
        let oldest = store.list(&JobQuery::new().oldest_first()).await.unwrap();
        assert_eq!(oldest[0].job_id, first_id);
    }
}
