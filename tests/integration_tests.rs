//! Integration Tests for End-to-End Job Scenarios
//!
//! These tests drive the public facade the way an embedding application
//! would: create jobs, run them to a terminal state, observe lifecycle
//! events and read back exports, history and recommendations.

use async_trait::async_trait;
use fedloom::prelude::*;
use fedloom::{ConvergenceCriterion, EventHandler, JobEvent, PerformanceTracker};
use rstest::rstest;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn job_config(rounds: u32) -> JobConfig {
    JobConfig::default()
        .with_rounds(rounds)
        .with_seed(3)
        .with_convergence(ConvergenceCriterion::disabled())
}

async fn create(
    orchestrator: &Orchestrator,
    scenario: ScenarioType,
    clients: usize,
    config: JobConfig,
) -> FedResult<String> {
    orchestrator
        .create_job(
            scenario,
            clients,
            Arc::new(SyntheticModelFactory::new(4)),
            Arc::new(SyntheticDataFactory::new(4).with_seed(9)),
            config,
        )
        .await
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl EventHandler for EventLog {
    fn name(&self) -> &str {
        "event_log"
    }

    async fn handle(&self, event: &JobEvent) -> FedResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:{}", event.job_id(), event.name()));
        Ok(())
    }
}

/// Create, execute and export a small cross-silo job.
#[tokio::test]
async fn test_cross_silo_lifecycle() {
    let orchestrator = Orchestrator::builder().build().unwrap();
    let job_id = create(&orchestrator, ScenarioType::CrossSilo, 5, job_config(6))
        .await
        .unwrap();

    let result = orchestrator.execute_job(&job_id).await.unwrap();
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.framework_used, Some(FrameworkType::Consortium));
    let metrics = result.metrics.as_ref().unwrap();
    assert_eq!(metrics.loss_history.len(), 6);
    assert_eq!(metrics.accuracy_history.len(), 6);

    let pretty = orchestrator
        .export_job_results(&job_id, "pretty")
        .await
        .unwrap();
    assert!(pretty.contains('\n'));
    let exported: serde_json::Value = serde_json::from_str(&pretty).unwrap();
    assert_eq!(exported["job_id"], job_id.as_str());
    assert_eq!(exported["metrics"]["convergence_rounds"], 6);
    assert_eq!(
        exported["metrics"]["loss_history"].as_array().unwrap().len(),
        6
    );
    assert!(exported["error_message"].is_null());
}

/// Scenario, scale and preference decide the backend a job runs on.
#[rstest]
#[case::small_cross_silo(ScenarioType::CrossSilo, 5, None, FrameworkType::Consortium)]
#[case::large_cross_device(ScenarioType::CrossDevice, 2_000, None, FrameworkType::Swarm)]
#[case::horizontal_at_threshold(ScenarioType::Horizontal, 1_000, None, FrameworkType::Consortium)]
#[case::vertical(ScenarioType::Vertical, 3, None, FrameworkType::Consortium)]
#[case::preference(
    ScenarioType::CrossSilo,
    4,
    Some(FrameworkType::Swarm),
    FrameworkType::Swarm
)]
#[tokio::test]
async fn test_job_runs_on_selected_backend(
    #[case] scenario: ScenarioType,
    #[case] clients: usize,
    #[case] preference: Option<FrameworkType>,
    #[case] expected: FrameworkType,
) {
    let orchestrator = Orchestrator::builder().build().unwrap();
    let mut config = job_config(2);
    config.framework_preference = preference;
    let job_id = create(&orchestrator, scenario, clients, config)
        .await
        .unwrap();

    let result = orchestrator.execute_job(&job_id).await.unwrap();
    assert_eq!(result.status, JobStatus::Completed);
    assert_eq!(result.framework_used, Some(expected));
}

/// A job that meets its participation floor exactly still completes.
#[tokio::test]
async fn test_job_meeting_participation_floor_completes() {
    let orchestrator = Orchestrator::builder().build().unwrap();
    let profile = fedloom::frameworks::SimulationProfile::new().with_offline_rounds([2, 3]);
    let job_id = orchestrator
        .create_job(
            ScenarioType::CrossSilo,
            4,
            Arc::new(SyntheticModelFactory::new(4).with_profile(profile)),
            Arc::new(SyntheticDataFactory::new(4)),
            job_config(10).with_participation_floor(0.8),
        )
        .await
        .unwrap();

    let result = orchestrator.execute_job(&job_id).await.unwrap();
    assert_eq!(result.status, JobStatus::Completed);
    let metrics = result.metrics.unwrap();
    assert_eq!(metrics.dropped_rounds, 2);
    assert_eq!(metrics.loss_history.len(), 8);
}

/// Vertical partitioning needs a label party and at least one feature party.
#[tokio::test]
async fn test_vertical_single_client_is_rejected_at_execution() {
    let orchestrator = Orchestrator::builder().build().unwrap();
    let job_id = create(
        &orchestrator,
        ScenarioType::Vertical,
        1,
        job_config(2).with_min_clients_per_round(1),
    )
    .await
    .unwrap();

    let err = orchestrator.execute_job(&job_id).await.unwrap_err();
    assert!(matches!(err, FedError::Configuration(_)));
    let snapshot = orchestrator.get_job_status(&job_id).await.unwrap().unwrap();
    assert_eq!(snapshot.status, JobStatus::Pending);
}

/// Several jobs run concurrently and each lands in the tracker exactly once.
#[tokio::test]
async fn test_concurrent_jobs_update_history() {
    let orchestrator = Arc::new(Orchestrator::builder().build().unwrap());

    let mut handles = Vec::new();
    for _ in 0..6 {
        let job_id = create(&orchestrator, ScenarioType::CrossSilo, 3, job_config(3))
            .await
            .unwrap();
        handles.push(orchestrator.spawn_job(job_id));
    }
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, JobStatus::Completed);
    }

    let tracker: &Arc<PerformanceTracker> = orchestrator.tracker();
    let record = tracker
        .get(FrameworkType::Consortium, ScenarioType::CrossSilo)
        .unwrap();
    assert_eq!(record.runs, 6);
    assert_eq!(record.success_rate, 1.0);
    assert_eq!(record.avg_convergence_rounds, 3.0);

    let terminal = orchestrator
        .list_jobs(Some(&JobQuery::new().terminal_only()))
        .await
        .unwrap();
    assert_eq!(terminal.len(), 6);

    let recommendation = orchestrator
        .get_framework_recommendations(ScenarioType::CrossSilo, 3, None)
        .unwrap();
    assert_eq!(recommendation.primary, FrameworkType::Consortium);
    let prediction = &recommendation.performance_predictions[&FrameworkType::Consortium];
    assert_eq!(prediction.runs, 6);
    assert!(
        recommendation
            .reasoning
            .iter()
            .any(|line| line.contains("past cross_silo runs"))
    );
}

/// Cancellation of a running job wins over its eventual outcome.
#[tokio::test]
async fn test_cancel_running_job() {
    let orchestrator = Arc::new(Orchestrator::builder().build().unwrap());
    let config = job_config(200).with_round_timeout(Duration::from_secs(5));
    let job_id = orchestrator
        .create_job(
            ScenarioType::CrossSilo,
            3,
            Arc::new(
                SyntheticModelFactory::new(4).with_profile(
                    fedloom::frameworks::SimulationProfile::new()
                        .with_latency(Duration::from_millis(5)),
                ),
            ),
            Arc::new(SyntheticDataFactory::new(4)),
            config,
        )
        .await
        .unwrap();

    let handle = orchestrator.spawn_job(job_id.clone());
    for _ in 0..200 {
        let snapshot = orchestrator.get_job_status(&job_id).await.unwrap().unwrap();
        if snapshot.status == JobStatus::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(orchestrator.cancel_job(&job_id).await);
    assert!(!orchestrator.cancel_job(&job_id).await);

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.status, JobStatus::Cancelled);
    let exported: serde_json::Value = serde_json::from_str(
        &orchestrator
            .export_job_results(&job_id, "json")
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(exported["status"], "cancelled");
    assert!(orchestrator.tracker().is_empty());
}

/// Registered handlers see each job's events in lifecycle order.
#[tokio::test]
async fn test_event_handler_sees_lifecycle() {
    let log = Arc::new(EventLog::default());
    let orchestrator = Orchestrator::builder()
        .with_event_handler(log.clone())
        .build()
        .unwrap();

    let job_id = create(&orchestrator, ScenarioType::Horizontal, 4, job_config(2))
        .await
        .unwrap();
    orchestrator.execute_job(&job_id).await.unwrap();
    orchestrator.flush_events().await;

    let events = log.events.lock().unwrap().clone();
    let expected: Vec<String> = [
        "job_created",
        "job_started",
        "round_completed",
        "round_completed",
        "job_completed",
    ]
    .iter()
    .map(|name| format!("{job_id}:{name}"))
    .collect();
    assert_eq!(events, expected);
}

/// Broadcast subscribers receive serializable events.
#[tokio::test]
async fn test_subscriber_receives_serializable_events() {
    let orchestrator = Orchestrator::builder().build().unwrap();
    let mut receiver = orchestrator.subscribe();

    let job_id = create(&orchestrator, ScenarioType::CrossSilo, 2, job_config(1))
        .await
        .unwrap();
    orchestrator.execute_job(&job_id).await.unwrap();
    orchestrator.flush_events().await;

    let first = receiver.recv().await.unwrap();
    let value = serde_json::to_value(&first).unwrap();
    assert_eq!(value["event"], "job_created");
    assert_eq!(value["job_id"], job_id.as_str());
    assert_eq!(value["num_clients"], 2);
}

/// The performance report reflects history and the last backend started.
#[tokio::test]
async fn test_performance_report() {
    let orchestrator = Orchestrator::builder().build().unwrap();
    let report = orchestrator.get_performance_report().await;
    assert!(report.per_key_stats.is_empty());
    assert!(report.active_framework.is_none());
    assert_eq!(report.available_frameworks.len(), 2);

    let job_id = create(&orchestrator, ScenarioType::CrossSilo, 3, job_config(2))
        .await
        .unwrap();
    orchestrator.execute_job(&job_id).await.unwrap();

    let report = orchestrator.get_performance_report().await;
    assert_eq!(report.per_key_stats.len(), 1);
    assert_eq!(report.active_framework, Some(FrameworkType::Consortium));
    assert_eq!(report.configuration.cross_silo_threshold, 1000);
}
