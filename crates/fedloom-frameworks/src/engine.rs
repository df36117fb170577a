//! Round loop shared by the reference adapters.
//!
//! One round: sample participants, fan out local training under a
//! concurrency bound and a round deadline, filter, aggregate with retries,
//! add noise, report. Round boundaries are the only points where
//! cancellation is observed.

use fedloom_core::{
    ClientError, ClientUpdate, DataFactory, DataPartition, Dataset, FedError, FedResult,
    FrameworkType, JobConfig, ModelFactory, ModelParameters, PartitionRole, PartitionedData,
    RoundHook, RoundOutcome, RoundReport, ScenarioType, SecurityLevel, StopReason,
    TrainingMetrics,
};
use futures::future::join_all;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::collaborators::CollaboratorSet;

/// Factories handed over by `initialize`.
#[derive(Clone)]
pub(crate) struct Factories {
    pub model: Arc<dyn ModelFactory>,
    pub data: Arc<dyn DataFactory>,
}

impl std::fmt::Debug for Factories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factories").finish_non_exhaustive()
    }
}

/// Backend-specific knobs for the shared loop.
#[derive(Debug, Clone)]
pub(crate) struct EngineProfile {
    pub framework: FrameworkType,
    /// Fraction of clients sampled per round, before the per-round minimum
    pub sample_fraction: f64,
    pub max_concurrency: usize,
    /// Lowest security level at which updates are filtered
    pub filter_from: SecurityLevel,
    /// Vertical rounds without the label party are dropouts
    pub require_label_party: bool,
}

struct Participant {
    partition: DataPartition,
    dataset: Arc<dyn Dataset>,
}

pub(crate) struct RoundEngine<'a> {
    pub profile: &'a EngineProfile,
    pub collaborators: &'a CollaboratorSet,
    pub factories: &'a Factories,
    pub scenario: ScenarioType,
    pub config: &'a JobConfig,
    pub hook: &'a dyn RoundHook,
}

impl RoundEngine<'_> {
    pub async fn run(&self, data: &PartitionedData) -> FedResult<TrainingMetrics> {
        let participants = data
            .partitions()
            .into_iter()
            .map(|partition| -> FedResult<Participant> {
                Ok(Participant {
                    dataset: self.factories.data.load(partition)?,
                    partition: partition.clone(),
                })
            })
            .collect::<FedResult<Vec<_>>>()?;

        let mut global = self.factories.model.create()?.parameters();
        let mut rng = StdRng::seed_from_u64(self.config.seed.unwrap_or_else(rand::random));
        let mut metrics = TrainingMetrics::new();
        let allowed_dropouts = self.config.allowed_dropout_rounds();

        info!(
            framework = %self.profile.framework,
            scenario = %self.scenario,
            clients = participants.len(),
            rounds = self.config.num_rounds,
            allowed_dropouts,
            "Starting training rounds"
        );

        for round in 1..=self.config.num_rounds {
            if self.hook.is_cancelled() {
                info!(framework = %self.profile.framework, round, "Cancellation observed at round boundary");
                metrics.stop_reason = StopReason::Cancelled;
                return Ok(metrics);
            }

            let started = Instant::now();
            let selected = self.select_participants(&mut rng, participants.len());
            let outcome = self
                .train_round(round, &selected, &participants, &global)
                .await;

            let (updates, reason) = match outcome {
                Ok(updates) => (updates, None),
                Err(elapsed) => (
                    Vec::new(),
                    Some(format!("round timed out after {elapsed:?}")),
                ),
            };

            match self.aggregate_round(round, updates, reason).await {
                Ok(Aggregated {
                    parameters,
                    participants: count,
                    loss,
                    accuracy,
                }) => {
                    global = parameters;
                    metrics.record_round(loss, accuracy);
                    metrics.push_series("participants", count as f64);
                    metrics.push_series("selected", selected.len() as f64);
                    metrics.push_series("round_seconds", started.elapsed().as_secs_f64());

                    debug!(round, participants = count, loss, accuracy, "Round aggregated");
                    self.hook
                        .on_round(&RoundReport {
                            round,
                            selected: selected.len(),
                            participants: count,
                            outcome: RoundOutcome::Aggregated { loss, accuracy },
                            duration: started.elapsed(),
                        })
                        .await;

                    if self.config.convergence.is_converged(&metrics.loss_history) {
                        info!(round, loss, "Training converged");
                        metrics.stop_reason = StopReason::Converged;
                        return Ok(metrics);
                    }
                }
                Err(RoundFailure::Dropout(err)) => {
                    metrics.dropped_rounds += 1;
                    metrics.push_series("dropped_round", f64::from(round));
                    warn!(
                        framework = %self.profile.framework,
                        error_code = err.error_code(),
                        error = %err,
                        dropped_rounds = metrics.dropped_rounds,
                        allowed_dropouts,
                        "Round dropped"
                    );
                    let active = match &err {
                        FedError::ClientDropout { active, .. } => *active,
                        _ => 0,
                    };
                    self.hook
                        .on_round(&RoundReport {
                            round,
                            selected: selected.len(),
                            participants: active,
                            outcome: RoundOutcome::Dropout {
                                reason: err.to_string(),
                            },
                            duration: started.elapsed(),
                        })
                        .await;

                    if metrics.dropped_rounds > allowed_dropouts {
                        return Err(FedError::InsufficientParticipants {
                            attempted_rounds: round,
                            dropped_rounds: metrics.dropped_rounds,
                            allowed_dropouts,
                        });
                    }
                }
                Err(RoundFailure::Fatal(err)) => return Err(err),
            }
        }

        if metrics.loss_history.is_empty() {
            return Err(FedError::InsufficientParticipants {
                attempted_rounds: self.config.num_rounds,
                dropped_rounds: metrics.dropped_rounds,
                allowed_dropouts,
            });
        }
        Ok(metrics)
    }

    /// Indices of the clients asked to train this round.
    fn select_participants(&self, rng: &mut StdRng, total: usize) -> Vec<usize> {
        if self.scenario == ScenarioType::Vertical && self.profile.require_label_party {
            return (0..total).collect();
        }
        let sampled = (total as f64 * self.profile.sample_fraction).ceil() as usize;
        let target = sampled.max(self.config.min_clients_per_round).min(total);
        if target >= total {
            return (0..total).collect();
        }
        let mut indices = rand::seq::index::sample(rng, total, target).into_vec();
        indices.sort_unstable();
        indices
    }

    /// Fan out local training. `Err` carries the round deadline on timeout.
    async fn train_round(
        &self,
        round: u32,
        selected: &[usize],
        participants: &[Participant],
        global: &ModelParameters,
    ) -> Result<Vec<(PartitionRole, ClientUpdate)>, Duration> {
        let semaphore = Semaphore::new(self.profile.max_concurrency.max(1));
        let local_epochs = self.config.local_epochs;

        let tasks = selected.iter().map(|&idx| {
            let participant = &participants[idx];
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| ClientError::Unavailable("round closed".to_string()))?;
                let mut model = self
                    .factories
                    .model
                    .create()
                    .map_err(|e| ClientError::Training(e.to_string()))?;
                model.set_parameters(global)?;
                let fit = model
                    .fit(participant.dataset.as_ref(), round, local_epochs)
                    .await?;
                if fit.parameters.len() != global.len() || !fit.parameters.is_finite() {
                    return Err(ClientError::Training(
                        "malformed parameter update".to_string(),
                    ));
                }
                Ok::<_, ClientError>((
                    participant.partition.role,
                    ClientUpdate::from_fit(participant.partition.client_id.clone(), fit),
                ))
            }
        });

        let results = tokio::time::timeout(self.config.round_timeout, join_all(tasks))
            .await
            .map_err(|_| self.config.round_timeout)?;

        let mut updates = Vec::with_capacity(results.len());
        for (idx, result) in selected.iter().zip(results) {
            match result {
                Ok(update) => updates.push(update),
                Err(e) => debug!(
                    round,
                    client = %participants[*idx].partition.client_id,
                    error = %e,
                    "Client dropped from round"
                ),
            }
        }
        Ok(updates)
    }

    async fn aggregate_round(
        &self,
        round: u32,
        updates: Vec<(PartitionRole, ClientUpdate)>,
        timeout_reason: Option<String>,
    ) -> Result<Aggregated, RoundFailure> {
        let required = self.config.min_clients_per_round;
        let dropout = |active: usize| {
            RoundFailure::Dropout(FedError::ClientDropout {
                round,
                active,
                required,
            })
        };

        if let Some(reason) = timeout_reason {
            debug!(round, %reason, "Treating round as mass dropout");
            return Err(dropout(0));
        }
        if self.scenario == ScenarioType::Vertical
            && self.profile.require_label_party
            && !updates.iter().any(|(role, _)| *role == PartitionRole::Labels)
        {
            debug!(round, "Label party missing from vertical round");
            return Err(dropout(updates.len()));
        }

        let mut updates: Vec<ClientUpdate> = updates.into_iter().map(|(_, u)| u).collect();
        if updates.len() < required {
            return Err(dropout(updates.len()));
        }

        if self.config.security_level >= self.profile.filter_from {
            updates = self.collaborators.security.filter_byzantine_updates(updates);
            if updates.len() < required {
                return Err(dropout(updates.len()));
            }
        }

        let mut parameters = self
            .aggregate_with_retry(round, &updates)
            .await
            .map_err(RoundFailure::Fatal)?;
        if let Some(epsilon) = self.config.privacy_budget {
            parameters = self
                .collaborators
                .privacy
                .apply_noise(parameters, round, epsilon, self.config.seed);
        }

        let total_examples: usize = updates.iter().map(|u| u.num_examples).sum();
        let (loss, accuracy) = if total_examples > 0 {
            let total = total_examples as f64;
            (
                updates
                    .iter()
                    .map(|u| u.loss * u.num_examples as f64)
                    .sum::<f64>()
                    / total,
                updates
                    .iter()
                    .map(|u| u.accuracy * u.num_examples as f64)
                    .sum::<f64>()
                    / total,
            )
        } else {
            let n = updates.len() as f64;
            (
                updates.iter().map(|u| u.loss).sum::<f64>() / n,
                updates.iter().map(|u| u.accuracy).sum::<f64>() / n,
            )
        };

        Ok(Aggregated {
            parameters,
            participants: updates.len(),
            loss,
            accuracy,
        })
    }

    /// One attempt plus up to `max_aggregation_retries` retries.
    async fn aggregate_with_retry(
        &self,
        round: u32,
        updates: &[ClientUpdate],
    ) -> FedResult<ModelParameters> {
        let parameter_sets: Vec<_> = updates.iter().map(|u| u.parameters.clone()).collect();
        let weights: Vec<f64> = updates.iter().map(|u| u.num_examples as f64).collect();
        let max_retries = self.config.max_aggregation_retries;

        let mut attempt = 0;
        loop {
            let error = match self
                .collaborators
                .optimizer
                .aggregate(&parameter_sets, &weights)
            {
                Ok(parameters) if parameters.is_finite() => return Ok(parameters),
                Ok(_) => "aggregate contains non-finite values".to_string(),
                Err(e) => e.to_string(),
            };

            if attempt >= max_retries {
                return Err(FedError::Aggregation(format!(
                    "round {round}: {error} (after {} attempts)",
                    attempt + 1
                )));
            }
            attempt += 1;
            warn!(round, attempt, max_retries, %error, "Aggregation failed, retrying");
            tokio::time::sleep(self.config.aggregation_backoff * attempt).await;
        }
    }
}

struct Aggregated {
    parameters: ModelParameters,
    participants: usize,
    loss: f64,
    accuracy: f64,
}

enum RoundFailure {
    Dropout(FedError),
    Fatal(FedError),
}
