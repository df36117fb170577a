use clap::{Parser, Subcommand, ValueEnum};

mod error;
mod recommend;
mod simulate;

use error::CliError;
use fedloom_core::{FrameworkType, OrchestratorConfig, ScenarioType, SecurityLevel};
use fedloom_observability::{LogFormat, ObservabilityConfig, init_observability};
use recommend::{RecommendArgs, run_recommend};
use simulate::{SimulateArgs, run_simulate};

#[derive(Parser, Debug)]
#[command(name = "fedloom", version)]
#[command(about = "fedloom CLI - run and inspect simulated federated training jobs")]
struct Cli {
    /// Log line encoding
    #[arg(long, global = true, value_enum, default_value = "json")]
    log_format: LogFormatArg,
    /// Log at info level instead of warn (RUST_LOG overrides both)
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a synthetic job end to end and print its exported result
    Simulate {
        /// Scenario (cross_device, cross_silo, horizontal, vertical, auto)
        #[arg(long, default_value = "cross_silo", value_parser = parse_scenario)]
        scenario: ScenarioType,
        /// Number of simulated clients
        #[arg(long, default_value_t = 5)]
        clients: usize,
        /// Rounds to train (overrides the config file)
        #[arg(long)]
        rounds: Option<u32>,
        /// Backend to use, or "auto" to let the selector decide
        #[arg(long, default_value = "auto")]
        framework: String,
        /// YAML job configuration file
        #[arg(long)]
        config: Option<String>,
        /// Differential-privacy epsilon
        #[arg(long)]
        privacy_budget: Option<f64>,
        #[arg(long, value_enum)]
        security_level: Option<SecurityArg>,
        /// Probability that a client misses a round
        #[arg(long, default_value_t = 0.0)]
        dropout_rate: f64,
        /// Model dimension
        #[arg(long, default_value_t = 8)]
        dim: usize,
        #[arg(long)]
        seed: Option<u64>,
        /// Export format (json, pretty)
        #[arg(long, default_value = "pretty")]
        format: String,
        /// Also print Prometheus metrics after the result
        #[arg(long)]
        metrics: bool,
    },
    /// Recommend a backend for a scenario and client count
    Recommend {
        #[arg(long, value_parser = parse_scenario)]
        scenario: ScenarioType,
        #[arg(long)]
        clients: usize,
        /// Require enterprise-ready backends
        #[arg(long)]
        enterprise_ready: bool,
        #[arg(long)]
        privacy_budget: Option<f64>,
        #[arg(long, value_enum)]
        security_level: Option<SecurityArg>,
    },
    /// Print the effective orchestrator configuration as YAML
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogFormatArg {
    Json,
    Pretty,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Pretty => LogFormat::Pretty,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SecurityArg {
    Basic,
    Standard,
    High,
}

impl From<SecurityArg> for SecurityLevel {
    fn from(arg: SecurityArg) -> Self {
        match arg {
            SecurityArg::Basic => SecurityLevel::Basic,
            SecurityArg::Standard => SecurityLevel::Standard,
            SecurityArg::High => SecurityLevel::High,
        }
    }
}

fn parse_scenario(raw: &str) -> Result<ScenarioType, fedloom_core::FedError> {
    raw.parse()
}

fn parse_framework(raw: &str) -> Result<Option<FrameworkType>, CliError> {
    if raw.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    Ok(Some(raw.parse()?))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let observability = match init_observability(ObservabilityConfig {
        log_format: cli.log_format.into(),
        default_filter: if cli.verbose { "info" } else { "warn" }.to_string(),
        ..ObservabilityConfig::default()
    }) {
        Ok(observability) => observability,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            std::process::exit(1);
        }
    };

    let outcome = match cli.command {
        Commands::Simulate {
            scenario,
            clients,
            rounds,
            framework,
            config,
            privacy_budget,
            security_level,
            dropout_rate,
            dim,
            seed,
            format,
            metrics,
        } => match parse_framework(&framework) {
            Ok(framework) => {
                let args = SimulateArgs {
                    scenario,
                    clients,
                    rounds,
                    framework,
                    config_path: config,
                    privacy_budget,
                    security_level: security_level.map(Into::into),
                    dropout_rate,
                    dim,
                    seed,
                    format,
                    print_metrics: metrics,
                };
                run_simulate(args, observability.metrics.clone()).await
            }
            Err(e) => Err(e),
        },
        Commands::Recommend {
            scenario,
            clients,
            enterprise_ready,
            privacy_budget,
            security_level,
        } => run_recommend(RecommendArgs {
            scenario,
            clients,
            enterprise_ready,
            privacy_budget,
            security_level: security_level.map(Into::into),
        }),
        Commands::Config => show_config(),
    };

    if let Err(e) = outcome {
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn show_config() -> Result<(), CliError> {
    let config = OrchestratorConfig::from_env()?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
