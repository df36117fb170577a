//! Prometheus metrics for training jobs.
//!
//! Label sets are closed: `status` is a terminal job status, `outcome` is
//! `aggregated` or `dropped`, `framework` is a registered backend name.

use crate::JOB_DURATION_BUCKETS;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Job counters and timings backed by a private registry.
#[derive(Debug, Clone)]
pub struct JobMetrics {
    registry: Registry,
    jobs_total: CounterVec,           // cardinality: 3 (status)
    rounds_total: CounterVec,         // cardinality: 2 (outcome)
    job_duration_seconds: HistogramVec, // cardinality: ≤ registered frameworks
    jobs_active: IntGauge,
}

impl JobMetrics {
    pub fn new(namespace: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let jobs_total = CounterVec::new(
            Opts::new(
                format!("{namespace}_jobs_total"),
                "Jobs that reached a terminal state",
            ),
            &["status"],
        )?;
        let rounds_total = CounterVec::new(
            Opts::new(
                format!("{namespace}_rounds_total"),
                "Training rounds by outcome",
            ),
            &["outcome"],
        )?;
        let job_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("{namespace}_job_duration_seconds"),
                "Wall-clock job duration",
            )
            .buckets(JOB_DURATION_BUCKETS.to_vec()),
            &["framework"],
        )?;
        let jobs_active = IntGauge::new(
            format!("{namespace}_jobs_active"),
            "Jobs currently running",
        )?;

        registry.register(Box::new(jobs_total.clone()))?;
        registry.register(Box::new(rounds_total.clone()))?;
        registry.register(Box::new(job_duration_seconds.clone()))?;
        registry.register(Box::new(jobs_active.clone()))?;

        Ok(Self {
            registry,
            jobs_total,
            rounds_total,
            job_duration_seconds,
            jobs_active,
        })
    }

    pub fn record_job_started(&self) {
        self.jobs_active.inc();
    }

    /// A running job reached `status` after `duration_seconds`.
    pub fn record_job_finished(&self, status: &str, framework: &str, duration_seconds: f64) {
        self.jobs_active.dec();
        self.jobs_total.with_label_values(&[status]).inc();
        self.job_duration_seconds
            .with_label_values(&[framework])
            .observe(duration_seconds);
    }

    pub fn record_round(&self, outcome: &str) {
        self.rounds_total.with_label_values(&[outcome]).inc();
    }

    pub fn jobs_active(&self) -> i64 {
        self.jobs_active.get()
    }

    pub fn jobs_total(&self, status: &str) -> f64 {
        self.jobs_total.with_label_values(&[status]).get()
    }

    pub fn rounds_total(&self, outcome: &str) -> f64 {
        self.rounds_total.with_label_values(&[outcome]).get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
