//! fedloom observability
//!
//! Structured logging setup and Prometheus metrics for training jobs.
//! Nothing here is global except the tracing subscriber itself: each
//! [`JobMetrics`] owns its own registry.

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(feature = "tracing")]
pub mod trace;

#[cfg(feature = "metrics")]
pub use metrics::JobMetrics;

#[cfg(feature = "tracing")]
pub use trace::init_tracing;

/// Job duration buckets, from sub-second simulations to hour-long runs.
pub const JOB_DURATION_BUCKETS: &[f64] = &[
    0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0,
];

/// Log line encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Observability configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
    pub tracing_enabled: bool,
    pub log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Metrics namespace prefix
    pub namespace: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            tracing_enabled: true,
            log_format: LogFormat::Json,
            default_filter: "info".to_string(),
            namespace: "fedloom".to_string(),
        }
    }
}

/// Handles produced by [`init_observability`].
#[derive(Debug, Default)]
pub struct Observability {
    #[cfg(feature = "metrics")]
    pub metrics: Option<std::sync::Arc<JobMetrics>>,
}

/// Install the tracing subscriber and build job metrics, as configured.
pub fn init_observability(config: ObservabilityConfig) -> Result<Observability, ObservabilityError> {
    #[cfg(feature = "tracing")]
    if config.tracing_enabled {
        trace::init_tracing(&config)?;
    }

    #[cfg(feature = "metrics")]
    let metrics = if config.metrics_enabled {
        Some(std::sync::Arc::new(JobMetrics::new(&config.namespace)?))
    } else {
        None
    };

    Ok(Observability {
        #[cfg(feature = "metrics")]
        metrics,
    })
}

/// Observability framework errors
#[derive(thiserror::Error, Debug)]
pub enum ObservabilityError {
    #[error("Tracing initialization failed: {0}")]
    TracingInit(String),

    #[cfg(feature = "metrics")]
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
