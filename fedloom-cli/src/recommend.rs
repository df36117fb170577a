//! `fedloom recommend`: advisory backend choice, printed as JSON.

use crate::error::CliError;
use fedloom_core::{ScenarioType, SecurityLevel};
use fedloom_orchestrator::{FrameworkRecommendation, Orchestrator, Requirements};

#[derive(Debug, Clone)]
pub struct RecommendArgs {
    pub scenario: ScenarioType,
    pub clients: usize,
    pub enterprise_ready: bool,
    pub privacy_budget: Option<f64>,
    pub security_level: Option<SecurityLevel>,
}

impl RecommendArgs {
    fn requirements(&self) -> Option<Requirements> {
        if !self.enterprise_ready && self.privacy_budget.is_none() && self.security_level.is_none()
        {
            return None;
        }
        let mut requirements = Requirements::new();
        if self.enterprise_ready {
            requirements = requirements.enterprise_ready();
        }
        if let Some(epsilon) = self.privacy_budget {
            requirements = requirements.with_privacy_budget(epsilon);
        }
        if let Some(level) = self.security_level {
            requirements = requirements.with_security_level(level);
        }
        Some(requirements)
    }
}

pub fn run_recommend(args: RecommendArgs) -> Result<(), CliError> {
    let recommendation = recommend(&args)?;
    println!("{}", serde_json::to_string_pretty(&recommendation)?);
    Ok(())
}

fn recommend(args: &RecommendArgs) -> Result<FrameworkRecommendation, CliError> {
    let config = fedloom_core::OrchestratorConfig::from_env()?;
    let orchestrator = Orchestrator::builder().with_config(config).build()?;
    let recommendation = orchestrator.get_framework_recommendations(
        args.scenario,
        args.clients,
        args.requirements().as_ref(),
    )?;
    Ok(recommendation)
}
