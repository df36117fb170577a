//! Per (framework, scenario) running statistics fed back into selection.

use dashmap::{DashMap, DashSet};
use fedloom_core::{FrameworkType, PerformanceRecord, ScenarioType, TrainingMetrics};
use tracing::debug;

type RecordKey = (FrameworkType, ScenarioType);

/// Thread-safe performance history.
///
/// Each job contributes at most once; updates for one key are applied under
/// the map's entry lock so readers never observe a half-updated record.
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    records: DashMap<RecordKey, PerformanceRecord>,
    recorded_jobs: DashSet<String>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one job outcome into the history.
    ///
    /// Returns `false` when `job_id` already contributed.
    pub fn record(
        &self,
        job_id: &str,
        framework: FrameworkType,
        scenario: ScenarioType,
        metrics: Option<&TrainingMetrics>,
        success: bool,
    ) -> bool {
        if !self.recorded_jobs.insert(job_id.to_string()) {
            debug!(job_id, "Performance already recorded for job");
            return false;
        }

        let mut record = self
            .records
            .entry((framework, scenario))
            .or_insert_with(|| PerformanceRecord::new(framework, scenario));
        record.observe(metrics, success);

        debug!(
            job_id,
            %framework,
            %scenario,
            runs = record.runs,
            success_rate = record.success_rate,
            "Performance recorded"
        );
        true
    }

    pub fn get(&self, framework: FrameworkType, scenario: ScenarioType) -> Option<PerformanceRecord> {
        self.records.get(&(framework, scenario)).map(|r| r.clone())
    }

    /// All records, ordered by framework then scenario.
    pub fn snapshot(&self) -> Vec<PerformanceRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| (r.framework_type, r.scenario_type));
        records
    }

    /// Number of (framework, scenario) pairs with history.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
