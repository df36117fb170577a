//! Serialized form of terminal job results.

use fedloom_core::{FedError, FedResult, FrameworkType, JobResult, JobStatus};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Output encodings for [`export_job_results`](crate::Orchestrator::export_job_results).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    /// Indented JSON for humans
    PrettyJson,
}

impl FromStr for ExportFormat {
    type Err = FedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "pretty" | "json_pretty" | "pretty_json" => Ok(ExportFormat::PrettyJson),
            other => Err(FedError::Configuration(format!(
                "unsupported export format '{other}'"
            ))),
        }
    }
}

impl ExportFormat {
    pub fn render(&self, result: &ExportedJobResult) -> FedResult<String> {
        let rendered = match self {
            ExportFormat::Json => serde_json::to_string(result)?,
            ExportFormat::PrettyJson => serde_json::to_string_pretty(result)?,
        };
        Ok(rendered)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedMetrics {
    pub convergence_rounds: u32,
    pub final_loss: Option<f64>,
    pub final_accuracy: Option<f64>,
    pub loss_history: Vec<f64>,
    pub accuracy_history: Vec<f64>,
}

/// Export document. Absent values serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedJobResult {
    pub job_id: String,
    pub status: JobStatus,
    pub duration_seconds: f64,
    pub framework_used: Option<FrameworkType>,
    pub error_message: Option<String>,
    pub metrics: Option<ExportedMetrics>,
}

impl From<&JobResult> for ExportedJobResult {
    fn from(result: &JobResult) -> Self {
        Self {
            job_id: result.job_id.clone(),
            status: result.status,
            duration_seconds: result.duration_seconds,
            framework_used: result.framework_used,
            error_message: result.error_message.clone(),
            metrics: result.metrics.as_ref().map(|m| ExportedMetrics {
                convergence_rounds: m.convergence_rounds,
                final_loss: m.final_loss(),
                final_accuracy: m.final_accuracy(),
                loss_history: m.loss_history.clone(),
                accuracy_history: m.accuracy_history.clone(),
            }),
        }
    }
}
