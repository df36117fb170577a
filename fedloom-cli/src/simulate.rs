//! `fedloom simulate`: one synthetic job through the full orchestrator.

use crate::error::CliError;
use fedloom_core::{FrameworkType, JobConfig, OrchestratorConfig, ScenarioType, SecurityLevel};
use fedloom_frameworks::{SimulationProfile, SyntheticDataFactory, SyntheticModelFactory};
use fedloom_observability::JobMetrics;
use fedloom_orchestrator::{ExportFormat, Orchestrator};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SimulateArgs {
    pub scenario: ScenarioType,
    pub clients: usize,
    pub rounds: Option<u32>,
    pub framework: Option<FrameworkType>,
    pub config_path: Option<String>,
    pub privacy_budget: Option<f64>,
    pub security_level: Option<SecurityLevel>,
    pub dropout_rate: f64,
    pub dim: usize,
    pub seed: Option<u64>,
    pub format: String,
    pub print_metrics: bool,
}

pub async fn run_simulate(
    args: SimulateArgs,
    metrics: Option<Arc<JobMetrics>>,
) -> Result<(), CliError> {
    let output = simulate(&args, metrics).await?;
    println!("{}", output.result);
    if let Some(exposition) = output.metrics {
        print!("{exposition}");
    }
    Ok(())
}

#[derive(Debug)]
pub struct SimulationOutput {
    pub job_id: String,
    pub result: String,
    pub metrics: Option<String>,
}

pub async fn simulate(
    args: &SimulateArgs,
    metrics: Option<Arc<JobMetrics>>,
) -> Result<SimulationOutput, CliError> {
    // Reject a bad format before doing any work.
    args.format.parse::<ExportFormat>()?;

    let orchestrator_config = OrchestratorConfig::from_env()?;
    let base = match &args.config_path {
        Some(path) => load_job_config(path)?,
        None => orchestrator_config.job_defaults.clone(),
    };
    let job_config = apply_overrides(base, args);

    let mut builder = Orchestrator::builder().with_config(orchestrator_config);
    if let Some(metrics) = &metrics {
        builder = builder.with_metrics(Arc::clone(metrics));
    }
    let orchestrator = builder.build()?;

    let seed = job_config.seed.unwrap_or_default();
    let profile = SimulationProfile::new()
        .with_dropout_rate(args.dropout_rate)
        .with_seed(seed);
    let model_factory = SyntheticModelFactory::new(args.dim).with_profile(profile);
    let data_factory = SyntheticDataFactory::new(args.dim).with_seed(seed);

    let job_id = orchestrator
        .create_job(
            args.scenario,
            args.clients,
            Arc::new(model_factory),
            Arc::new(data_factory),
            job_config,
        )
        .await?;

    let result = orchestrator.execute_job(&job_id).await?;
    orchestrator.flush_events().await;
    tracing::info!(
        job_id = %job_id,
        status = %result.status,
        framework = ?result.framework_used,
        "Simulation finished"
    );

    let exported = orchestrator
        .export_job_results(&job_id, &args.format)
        .await?;
    let exposition = match (&metrics, args.print_metrics) {
        (Some(metrics), true) => Some(
            metrics
                .render()
                .map_err(|e| CliError::Metrics(e.to_string()))?,
        ),
        _ => None,
    };

    Ok(SimulationOutput {
        job_id,
        result: exported,
        metrics: exposition,
    })
}

fn load_job_config(path: &str) -> Result<JobConfig, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_string(),
        source,
    })?;
    Ok(serde_yaml::from_str(&raw)?)
}

/// Command-line flags win over the file or environment defaults.
fn apply_overrides(mut config: JobConfig, args: &SimulateArgs) -> JobConfig {
    if let Some(rounds) = args.rounds {
        config.num_rounds = rounds;
    }
    if let Some(framework) = args.framework {
        config.framework_preference = Some(framework);
    }
    if let Some(epsilon) = args.privacy_budget {
        config.privacy_budget = Some(epsilon);
    }
    if let Some(level) = args.security_level {
        config.security_level = level;
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    config
}
