//! Framework selection and advisory recommendations.
//!
//! Selection is a pure function of the scenario, client count, preference
//! and registry contents. Performance history only shapes the
//! recommendations, never the choice itself.

use fedloom_core::{
    FedError, FedResult, FrameworkType, ScenarioType, SecurityLevel,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::registry::FrameworkCapabilityRegistry;
use crate::tracker::PerformanceTracker;

/// Constraints a caller wants reflected in a recommendation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub enterprise_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_budget: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_level: Option<SecurityLevel>,
}

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enterprise_ready(mut self) -> Self {
        self.enterprise_ready = true;
        self
    }

    pub fn with_privacy_budget(mut self, epsilon: f64) -> Self {
        self.privacy_budget = Some(epsilon);
        self
    }

    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = Some(level);
        self
    }
}

/// Expected behaviour of a framework, taken from past runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub success_rate: f64,
    pub avg_convergence_rounds: f64,
    pub avg_accuracy: f64,
    pub runs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkRecommendation {
    pub primary: FrameworkType,
    pub alternatives: Vec<FrameworkType>,
    pub reasoning: Vec<String>,
    pub performance_predictions: BTreeMap<FrameworkType, Prediction>,
}

/// Chooses a backend for a job.
#[derive(Debug, Clone)]
pub struct FrameworkSelector {
    registry: Arc<FrameworkCapabilityRegistry>,
    tracker: Arc<PerformanceTracker>,
    cross_silo_threshold: usize,
}

impl FrameworkSelector {
    pub fn new(
        registry: Arc<FrameworkCapabilityRegistry>,
        tracker: Arc<PerformanceTracker>,
        cross_silo_threshold: usize,
    ) -> Self {
        Self {
            registry,
            tracker,
            cross_silo_threshold,
        }
    }

    pub fn cross_silo_threshold(&self) -> usize {
        self.cross_silo_threshold
    }

    /// Pick the framework for a job.
    ///
    /// An explicit preference is returned unchanged; mismatches with the
    /// declared capabilities are logged, not rejected.
    pub fn select(
        &self,
        scenario: ScenarioType,
        num_clients: usize,
        preference: Option<FrameworkType>,
    ) -> FedResult<FrameworkType> {
        if let Some(preferred) = preference {
            self.check_preference(preferred, scenario, num_clients);
            return Ok(preferred);
        }

        let choice = self.table_choice(scenario, num_clients);
        if self.registry.contains(choice) {
            debug!(%scenario, num_clients, framework = %choice, "Framework selected");
            return Ok(choice);
        }

        let (fallback, declares_scenario) = self.fallback(scenario)?;
        if declares_scenario {
            warn!(
                %scenario,
                table_choice = %choice,
                fallback = %fallback,
                "Table choice not registered, falling back to a backend declaring the scenario"
            );
        } else {
            warn!(
                %scenario,
                table_choice = %choice,
                fallback = %fallback,
                "Table choice not registered and no registered backend declares the scenario, \
                 falling back to the first registered backend"
            );
        }
        Ok(fallback)
    }

    /// First registered backend declaring `scenario`, else the first
    /// registered one. The flag tells which case applied.
    fn fallback(&self, scenario: ScenarioType) -> FedResult<(FrameworkType, bool)> {
        if let Some(capability) = self
            .registry
            .capabilities()
            .into_iter()
            .find(|c| c.supports_scenario(scenario))
        {
            return Ok((capability.framework_type, true));
        }
        self.registry
            .frameworks()
            .into_iter()
            .next()
            .map(|framework| (framework, false))
            .ok_or_else(|| FedError::Configuration("no frameworks are registered".to_string()))
    }

    /// Decision table over scenario and scale. Ties at the threshold go to
    /// the enterprise backend.
    fn table_choice(&self, scenario: ScenarioType, num_clients: usize) -> FrameworkType {
        let large = num_clients > self.cross_silo_threshold;
        match scenario {
            ScenarioType::Vertical => FrameworkType::Consortium,
            ScenarioType::CrossDevice
            | ScenarioType::CrossSilo
            | ScenarioType::Horizontal
            | ScenarioType::Auto => {
                if large {
                    FrameworkType::Swarm
                } else {
                    FrameworkType::Consortium
                }
            }
        }
    }

    fn check_preference(&self, preferred: FrameworkType, scenario: ScenarioType, num_clients: usize) {
        let Some(capability) = self.registry.capability(preferred) else {
            warn!(framework = %preferred, "Preferred framework is not registered");
            return;
        };
        if !capability.supports_scenario(scenario) {
            warn!(
                framework = %preferred,
                %scenario,
                "Preferred framework does not declare this scenario"
            );
        }
        if num_clients > capability.max_clients {
            warn!(
                framework = %preferred,
                num_clients,
                max_clients = capability.max_clients,
                "Preferred framework is over its declared client limit"
            );
        }
    }

    /// Advisory recommendation. `primary` is always the no-preference
    /// selection.
    pub fn recommend(
        &self,
        scenario: ScenarioType,
        num_clients: usize,
        requirements: Option<&Requirements>,
    ) -> FedResult<FrameworkRecommendation> {
        let primary = self.select(scenario, num_clients, None)?;

        let performance_predictions: BTreeMap<FrameworkType, Prediction> = self
            .registry
            .frameworks()
            .into_iter()
            .filter_map(|framework| {
                self.tracker.get(framework, scenario).map(|record| {
                    (
                        framework,
                        Prediction {
                            success_rate: record.success_rate,
                            avg_convergence_rounds: record.avg_convergence_rounds,
                            avg_accuracy: record.avg_accuracy,
                            runs: record.runs,
                        },
                    )
                })
            })
            .collect();

        let mut alternatives: Vec<FrameworkType> = self
            .registry
            .frameworks()
            .into_iter()
            .filter(|f| *f != primary)
            .collect();
        alternatives.sort_by(|a, b| {
            let rate = |f: &FrameworkType| performance_predictions.get(f).map(|p| p.success_rate);
            rate(b)
                .partial_cmp(&rate(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.as_str().cmp(b.as_str()))
        });

        let mut reasoning = vec![self.rule_reason(scenario, num_clients, primary)];
        for framework in std::iter::once(primary).chain(alternatives.iter().copied()) {
            let Some(capability) = self.registry.capability(framework) else {
                continue;
            };
            if !capability.supports_scenario(scenario) {
                reasoning.push(format!("{framework} does not declare {scenario} support"));
            }
            if num_clients > capability.max_clients {
                reasoning.push(format!(
                    "{framework} supports at most {} clients",
                    capability.max_clients
                ));
            }
            if let Some(requirements) = requirements
                && requirements.enterprise_ready
                && !capability.enterprise_ready
            {
                reasoning.push(format!("{framework} is not enterprise-ready"));
            }
        }
        if let Some(requirements) = requirements {
            if let Some(epsilon) = requirements.privacy_budget {
                reasoning.push(format!(
                    "privacy budget {epsilon} adds noise to every aggregate"
                ));
            }
            if requirements.security_level == Some(SecurityLevel::High) {
                reasoning.push("high security filters updates on every backend".to_string());
            }
        }
        if let Some(prediction) = performance_predictions.get(&primary) {
            reasoning.push(format!(
                "{primary} succeeded in {:.0}% of {} past {scenario} runs",
                prediction.success_rate * 100.0,
                prediction.runs
            ));
        }

        Ok(FrameworkRecommendation {
            primary,
            alternatives,
            reasoning,
            performance_predictions,
        })
    }

    fn rule_reason(&self, scenario: ScenarioType, num_clients: usize, chosen: FrameworkType) -> String {
        let threshold = self.cross_silo_threshold;
        match scenario {
            ScenarioType::Vertical => {
                format!("{chosen} chosen: vertical training needs feature alignment")
            }
            _ if num_clients > threshold => {
                format!("{chosen} chosen: {num_clients} clients exceeds {threshold}")
            }
            _ => format!("{chosen} chosen: {num_clients} clients is within {threshold}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedloom_core::{AdapterFactory, TrainingMetrics};
    use fedloom_frameworks::SwarmFactory;
    use rstest::rstest;

    fn selector() -> FrameworkSelector {
        FrameworkSelector::new(
            Arc::new(FrameworkCapabilityRegistry::with_defaults()),
            Arc::new(PerformanceTracker::new()),
            1000,
        )
    }

    #[rstest]
    #[case(ScenarioType::CrossSilo, 5, FrameworkType::Consortium)]
    #[case(ScenarioType::CrossSilo, 5_000, FrameworkType::Swarm)]
    #[case(ScenarioType::CrossDevice, 20_000, FrameworkType::Swarm)]
    #[case(ScenarioType::CrossDevice, 50, FrameworkType::Consortium)]
    #[case(ScenarioType::Horizontal, 1_001, FrameworkType::Swarm)]
    #[case(ScenarioType::Horizontal, 1_000, FrameworkType::Consortium)]
    #[case(ScenarioType::Vertical, 3, FrameworkType::Consortium)]
    #[case(ScenarioType::Vertical, 100_000, FrameworkType::Consortium)]
    #[case(ScenarioType::Auto, 10, FrameworkType::Consortium)]
    #[case(ScenarioType::Auto, 10_000, FrameworkType::Swarm)]
    fn test_decision_table(
        #[case] scenario: ScenarioType,
        #[case] clients: usize,
        #[case] expected: FrameworkType,
    ) {
        assert_eq!(selector().select(scenario, clients, None).unwrap(), expected);
    }

    #[rstest]
    #[case(FrameworkType::Swarm, ScenarioType::Vertical, 3)]
    #[case(FrameworkType::Consortium, ScenarioType::CrossDevice, 50_000)]
    fn test_preference_wins(
        #[case] preferred: FrameworkType,
        #[case] scenario: ScenarioType,
        #[case] clients: usize,
    ) {
        assert_eq!(
            selector().select(scenario, clients, Some(preferred)).unwrap(),
            preferred
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        let selector = selector();
        for scenario in ScenarioType::ALL {
            for clients in [1, 999, 1_000, 1_001, 250_000] {
                let first = selector.select(scenario, clients, None).unwrap();
                let second = selector.select(scenario, clients, None).unwrap();
                assert_eq!(first, second);
            }
        }
    }

    #[test]
    fn test_fallback_when_choice_unregistered() {
        let mut registry = FrameworkCapabilityRegistry::new();
        registry.register(Arc::new(SwarmFactory::default()) as Arc<dyn AdapterFactory>);
        let selector =
            FrameworkSelector::new(Arc::new(registry), Arc::new(PerformanceTracker::new()), 1000);

        assert_eq!(
            selector.select(ScenarioType::CrossSilo, 5, None).unwrap(),
            FrameworkType::Swarm
        );
        // Nothing registered declares Vertical, so any registered backend.
        assert_eq!(
            selector.select(ScenarioType::Vertical, 5, None).unwrap(),
            FrameworkType::Swarm
        );
    }

    #[test]
    fn test_fallback_reports_scenario_support() {
        let mut registry = FrameworkCapabilityRegistry::new();
        registry.register(Arc::new(SwarmFactory::default()) as Arc<dyn AdapterFactory>);
        let selector =
            FrameworkSelector::new(Arc::new(registry), Arc::new(PerformanceTracker::new()), 1000);

        assert_eq!(
            selector.fallback(ScenarioType::CrossSilo).unwrap(),
            (FrameworkType::Swarm, true)
        );
        assert_eq!(
            selector.fallback(ScenarioType::Vertical).unwrap(),
            (FrameworkType::Swarm, false)
        );

        let empty = FrameworkSelector::new(
            Arc::new(FrameworkCapabilityRegistry::new()),
            Arc::new(PerformanceTracker::new()),
            1000,
        );
        assert!(empty.fallback(ScenarioType::CrossSilo).is_err());
    }

    #[test]
    fn test_empty_registry_is_configuration_error() {
        let selector = FrameworkSelector::new(
            Arc::new(FrameworkCapabilityRegistry::new()),
            Arc::new(PerformanceTracker::new()),
            1000,
        );
        let err = selector
            .select(ScenarioType::CrossSilo, 5, None)
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_recommendation_without_history() {
        let rec = selector()
            .recommend(ScenarioType::CrossSilo, 5, None)
            .unwrap();
        assert_eq!(rec.primary, FrameworkType::Consortium);
        assert_eq!(rec.alternatives, vec![FrameworkType::Swarm]);
        assert!(rec.performance_predictions.is_empty());
        assert!(!rec.reasoning.is_empty());
    }

    #[test]
    fn test_recommendation_uses_history() {
        let tracker = Arc::new(PerformanceTracker::new());
        let mut metrics = TrainingMetrics::new();
        metrics.record_round(0.1, 0.9);
        tracker.record(
            "j1",
            FrameworkType::Consortium,
            ScenarioType::CrossDevice,
            Some(&metrics),
            true,
        );
        tracker.record("j2", FrameworkType::Swarm, ScenarioType::CrossDevice, None, false);

        let selector = FrameworkSelector::new(
            Arc::new(FrameworkCapabilityRegistry::with_defaults()),
            tracker,
            1000,
        );
        let rec = selector
            .recommend(ScenarioType::CrossDevice, 20_000, None)
            .unwrap();

        // History never changes the primary choice.
        assert_eq!(rec.primary, FrameworkType::Swarm);
        assert_eq!(rec.alternatives, vec![FrameworkType::Consortium]);
        assert_eq!(rec.performance_predictions.len(), 2);
        assert_eq!(
            rec.performance_predictions[&FrameworkType::Consortium].success_rate,
            1.0
        );
        assert!(
            rec.reasoning
                .iter()
                .any(|r| r.contains("consortium supports at most 1000 clients"))
        );
    }

    #[test]
    fn test_requirements_add_reasoning() {
        let requirements = Requirements::new()
            .enterprise_ready()
            .with_privacy_budget(1.0)
            .with_security_level(SecurityLevel::High);
        let rec = selector()
            .recommend(ScenarioType::CrossDevice, 20_000, Some(&requirements))
            .unwrap();
        assert_eq!(rec.primary, FrameworkType::Swarm);
        assert!(rec.reasoning.iter().any(|r| r == "swarm is not enterprise-ready"));
        assert!(rec.reasoning.iter().any(|r| r.contains("privacy budget")));
        assert!(rec.reasoning.iter().any(|r| r.contains("high security")));
    }
}
