//! Job lifecycle notifications.
//!
//! Publishing never waits: events go onto an unbounded queue drained by a
//! single dispatcher task, which calls each registered [`EventHandler`] in
//! turn. Every handler call runs in its own task so a panic or a stuck
//! handler is contained and logged. The same events are mirrored onto a
//! `broadcast` channel for pull-style consumers.

use async_trait::async_trait;
use fedloom_core::{FedResult, FrameworkType, ScenarioType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, mpsc, oneshot};
use tracing::{debug, error, warn};

// ============================================================================
// Events
// ============================================================================

/// A lifecycle event of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    JobCreated {
        job_id: String,
        scenario_type: ScenarioType,
        num_clients: usize,
    },
    JobStarted {
        job_id: String,
        framework: FrameworkType,
    },
    RoundCompleted {
        job_id: String,
        round: u32,
        participants: usize,
        loss: f64,
        accuracy: f64,
    },
    RoundDropped {
        job_id: String,
        round: u32,
        participants: usize,
        reason: String,
    },
    JobCompleted {
        job_id: String,
        duration_seconds: f64,
        rounds: u32,
    },
    JobFailed {
        job_id: String,
        error_code: String,
        error_message: String,
    },
    JobCancelled {
        job_id: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::JobCreated { job_id, .. }
            | JobEvent::JobStarted { job_id, .. }
            | JobEvent::RoundCompleted { job_id, .. }
            | JobEvent::RoundDropped { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. }
            | JobEvent::JobCancelled { job_id } => job_id,
        }
    }

    /// Stable snake_case name, matching the serialized tag.
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::JobCreated { .. } => "job_created",
            JobEvent::JobStarted { .. } => "job_started",
            JobEvent::RoundCompleted { .. } => "round_completed",
            JobEvent::RoundDropped { .. } => "round_dropped",
            JobEvent::JobCompleted { .. } => "job_completed",
            JobEvent::JobFailed { .. } => "job_failed",
            JobEvent::JobCancelled { .. } => "job_cancelled",
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Observer of job events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "event_handler"
    }

    async fn handle(&self, event: &JobEvent) -> FedResult<()>;
}

// ============================================================================
// Event Bus
// ============================================================================

enum Message {
    Event(JobEvent),
    Flush(oneshot::Sender<()>),
}

type Handlers = Arc<RwLock<Vec<Arc<dyn EventHandler>>>>;

/// FIFO event dispatcher.
///
/// Must be created inside a Tokio runtime. Clones share one queue; the
/// dispatcher task stops once every clone is dropped and the queue is
/// drained.
#[derive(Clone)]
pub struct EventBus {
    queue: mpsc::UnboundedSender<Message>,
    stream: broadcast::Sender<JobEvent>,
    handlers: Handlers,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.stream.receiver_count())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new(buffer_size: usize, handler_timeout: Duration) -> Self {
        Self::with_handlers(Vec::new(), buffer_size, handler_timeout)
    }

    pub fn with_handlers(
        handlers: Vec<Arc<dyn EventHandler>>,
        buffer_size: usize,
        handler_timeout: Duration,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let (stream, _) = broadcast::channel(buffer_size.max(1));
        let handlers: Handlers = Arc::new(RwLock::new(handlers));
        tokio::spawn(dispatch(rx, Arc::clone(&handlers), handler_timeout));
        Self {
            queue,
            stream,
            handlers,
        }
    }

    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        debug!(handler = handler.name(), "Event handler registered");
        self.handlers.write().await.push(handler);
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.stream.subscribe()
    }

    pub fn publish(&self, event: JobEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.stream.send(event.clone());
        if self.queue.send(Message::Event(event)).is_err() {
            warn!("Event dispatcher stopped, event dropped");
        }
    }

    /// Wait until every event published before this call was dispatched.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.queue.send(Message::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Message>,
    handlers: Handlers,
    handler_timeout: Duration,
) {
    while let Some(message) = rx.recv().await {
        let event = match message {
            Message::Event(event) => event,
            Message::Flush(ack) => {
                let _ = ack.send(());
                continue;
            }
        };

        let current = handlers.read().await.clone();
        for handler in current {
            let name = handler.name().to_string();
            let delivered = event.clone();
            let mut task = tokio::spawn(async move { handler.handle(&delivered).await });

            match tokio::time::timeout(handler_timeout, &mut task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!(
                    handler = %name,
                    event = event.name(),
                    job_id = event.job_id(),
                    error = %e,
                    "Event handler failed"
                ),
                Ok(Err(join_error)) if join_error.is_panic() => error!(
                    handler = %name,
                    event = event.name(),
                    job_id = event.job_id(),
                    "Event handler panicked"
                ),
                Ok(Err(join_error)) => warn!(
                    handler = %name,
                    error = %join_error,
                    "Event handler task cancelled"
                ),
                Err(_) => {
                    task.abort();
                    warn!(
                        handler = %name,
                        event = event.name(),
                        timeout_ms = handler_timeout.as_millis() as u64,
                        "Event handler timed out"
                    );
                }
            }
        }
    }
    debug!("Event dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedloom_core::FedError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn handle(&self, event: &JobEvent) -> FedResult<()> {
            self.seen.lock().unwrap().push(event.name().to_string());
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl EventHandler for Panicking {
        async fn handle(&self, _event: &JobEvent) -> FedResult<()> {
            panic!("handler bug");
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: &JobEvent) -> FedResult<()> {
            Err(FedError::Internal("sink unavailable".to_string()))
        }
    }

    struct Stuck;

    #[async_trait]
    impl EventHandler for Stuck {
        async fn handle(&self, _event: &JobEvent) -> FedResult<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn lifecycle(job_id: &str) -> Vec<JobEvent> {
        vec![
            JobEvent::JobCreated {
                job_id: job_id.to_string(),
                scenario_type: ScenarioType::CrossSilo,
                num_clients: 3,
            },
            JobEvent::JobStarted {
                job_id: job_id.to_string(),
                framework: FrameworkType::Consortium,
            },
            JobEvent::RoundCompleted {
                job_id: job_id.to_string(),
                round: 1,
                participants: 3,
                loss: 0.5,
                accuracy: 0.6,
            },
            JobEvent::JobCompleted {
                job_id: job_id.to_string(),
                duration_seconds: 0.1,
                rounds: 1,
            },
        ]
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let recorder = Arc::new(Recorder::default());
        let bus = EventBus::new(16, Duration::from_secs(1));
        bus.register(recorder.clone()).await;

        for event in lifecycle("job-1") {
            bus.publish(event);
        }
        bus.flush().await;

        assert_eq!(
            recorder.seen(),
            vec!["job_created", "job_started", "round_completed", "job_completed"]
        );
    }

    #[tokio::test]
    async fn test_misbehaving_handlers_are_contained() {
        let recorder = Arc::new(Recorder::default());
        let bus = EventBus::with_handlers(
            vec![
                Arc::new(Panicking),
                Arc::new(Failing),
                Arc::new(Stuck),
                recorder.clone(),
            ],
            16,
            Duration::from_millis(20),
        );

        for event in lifecycle("job-2") {
            bus.publish(event);
        }
        bus.flush().await;

        assert_eq!(recorder.seen().len(), 4);
    }

    #[tokio::test]
    async fn test_broadcast_subscription() {
        let bus = EventBus::new(16, Duration::from_secs(1));
        let mut rx = bus.subscribe();

        bus.publish(JobEvent::JobCancelled {
            job_id: "job-3".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id(), "job-3");
        assert_eq!(event.name(), "job_cancelled");
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = JobEvent::RoundDropped {
            job_id: "j".to_string(),
            round: 2,
            participants: 1,
            reason: "too few".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "round_dropped");
        assert_eq!(json["round"], 2);
    }
}
