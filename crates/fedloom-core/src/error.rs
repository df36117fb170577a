//! Error taxonomy shared by every fedloom component.
//!
//! Only these kinds cross component boundaries. Raw causes are logged where
//! they occur; callers see [`FedError::user_message`].

use thiserror::Error;

/// Errors that can occur while creating, executing or inspecting jobs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FedError {
    /// Invalid job parameters or adapter usage.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No job with the given id exists.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Adapter used before `initialize`.
    #[error("Framework '{0}' used before initialization")]
    NotInitialized(String),

    /// A single round fell below the per-round participant minimum.
    #[error("Client dropout in round {round}: {active} active, {required} required")]
    ClientDropout {
        round: u32,
        active: usize,
        required: usize,
    },

    /// The job-wide participation floor was breached.
    #[error(
        "Insufficient participants: {dropped_rounds} of {attempted_rounds} rounds below minimum (budget {allowed_dropouts})"
    )]
    InsufficientParticipants {
        attempted_rounds: u32,
        dropped_rounds: u32,
        allowed_dropouts: u32,
    },

    /// Aggregation failed.
    #[error("Aggregation error: {0}")]
    Aggregation(String),

    /// Export requested before the job reached a terminal state.
    #[error("No results available for job: {0}")]
    NoResultsAvailable(String),

    /// Encoding failure while exporting.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Broken internal invariant.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FedError {
    /// Check if this error may clear up on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FedError::Aggregation(_) | FedError::ClientDropout { .. }
        )
    }

    /// Check if this error terminates a running job.
    pub fn is_job_fatal(&self) -> bool {
        !matches!(self, FedError::ClientDropout { .. })
    }

    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            FedError::Configuration(_) => "CONFIGURATION_ERROR",
            FedError::JobNotFound(_) => "JOB_NOT_FOUND",
            FedError::NotInitialized(_) => "NOT_INITIALIZED",
            FedError::ClientDropout { .. } => "CLIENT_DROPOUT",
            FedError::InsufficientParticipants { .. } => "INSUFFICIENT_PARTICIPANTS",
            FedError::Aggregation(_) => "AGGREGATION_ERROR",
            FedError::NoResultsAvailable(_) => "NO_RESULTS_AVAILABLE",
            FedError::Serialization(_) => "SERIALIZATION_ERROR",
            FedError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Human-readable message safe to place in a `JobResult`.
    ///
    /// Never empty. Collaborator and internal details are replaced with a
    /// generic description; they are only ever logged.
    pub fn user_message(&self) -> String {
        match self {
            FedError::Configuration(msg) => format!("invalid job configuration: {msg}"),
            FedError::JobNotFound(id) => format!("job {id} not found"),
            FedError::NotInitialized(framework) => {
                format!("framework {framework} was not initialized")
            }
            FedError::ClientDropout {
                round,
                active,
                required,
            } => format!("round {round} had {active} of {required} required participants"),
            FedError::InsufficientParticipants {
                attempted_rounds,
                dropped_rounds,
                ..
            } => format!(
                "too few participants: {dropped_rounds} of {attempted_rounds} rounds fell below the per-round minimum"
            ),
            FedError::Aggregation(_) => "aggregation failed after repeated attempts".to_string(),
            FedError::NoResultsAvailable(id) => format!("job {id} has no results yet"),
            FedError::Serialization(_) => "failed to encode job results".to_string(),
            FedError::Internal(_) => "internal error during job execution".to_string(),
        }
    }
}

/// Result type for fedloom operations.
pub type FedResult<T> = Result<T, FedError>;

impl From<serde_json::Error> for FedError {
    fn from(err: serde_json::Error) -> Self {
        FedError::Serialization(err.to_string())
    }
}

/// Errors raised by a single client during local training.
///
/// These never fail a job directly; the round engine counts the client as
/// dropped for that round.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("Client unavailable: {0}")]
    Unavailable(String),

    #[error("Local training failed: {0}")]
    Training(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FedError::JobNotFound("abc".to_string());
        assert_eq!(err.to_string(), "Job not found: abc");

        let err = FedError::ClientDropout {
            round: 3,
            active: 1,
            required: 2,
        };
        assert_eq!(
            err.to_string(),
            "Client dropout in round 3: 1 active, 2 required"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(FedError::Aggregation("nan".to_string()).is_retryable());
        assert!(
            FedError::ClientDropout {
                round: 1,
                active: 0,
                required: 1
            }
            .is_retryable()
        );
        assert!(!FedError::JobNotFound("x".to_string()).is_retryable());
    }

    #[test]
    fn test_job_fatal() {
        assert!(
            !FedError::ClientDropout {
                round: 1,
                active: 0,
                required: 1
            }
            .is_job_fatal()
        );
        assert!(
            FedError::InsufficientParticipants {
                attempted_rounds: 4,
                dropped_rounds: 4,
                allowed_dropouts: 2
            }
            .is_job_fatal()
        );
    }

    #[test]
    fn test_error_code() {
        assert_eq!(
            FedError::NotInitialized("swarm".to_string()).error_code(),
            "NOT_INITIALIZED"
        );
        assert_eq!(
            FedError::NoResultsAvailable("1".to_string()).error_code(),
            "NO_RESULTS_AVAILABLE"
        );
    }

    #[test]
    fn test_user_message_hides_internal_details() {
        let err = FedError::Aggregation("weights sum to NaN at index 7".to_string());
        let msg = err.user_message();
        assert!(!msg.is_empty());
        assert!(!msg.contains("NaN"));

        let err = FedError::Internal("lock poisoned".to_string());
        assert!(!err.user_message().contains("poisoned"));
    }
}
