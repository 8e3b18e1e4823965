use std::collections::BTreeMap;

use rama::error::{BoxError, ErrorContext as _, ErrorExt as _};
use serde::Deserialize;

use super::scenario::{RawScenario, ScenarioSpec};

/// Run configuration as found in the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRunConfig {
    #[serde(default)]
    pub scenarios: BTreeMap<String, RawScenario>,
    /// Metric name to threshold expressions, e.g. `"iteration_failed": ["rate<0.1"]`.
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,
}

/// Validated run configuration: one or more scenarios
/// which run concurrently, plus optional thresholds.
#[derive(Debug, Clone)]
pub struct RunConfig {
    scenarios: Vec<ScenarioSpec>,
    thresholds: Vec<(String, String)>,
}

impl RunConfig {
    /// Create a run configuration from already validated scenarios.
    pub fn new(scenarios: Vec<ScenarioSpec>) -> Result<Self, BoxError> {
        if scenarios.is_empty() {
            return Err(BoxError::from("at least one scenario is required"));
        }

        for (index, spec) in scenarios.iter().enumerate() {
            if scenarios[..index]
                .iter()
                .any(|other| other.name() == spec.name())
            {
                return Err(BoxError::from("duplicate scenario name")
                    .context_debug_field("name", spec.name().clone()));
            }
        }

        Ok(Self {
            scenarios,
            thresholds: Vec::new(),
        })
    }

    /// Add a threshold expression for the given metric.
    ///
    /// Expressions are only parsed once the run starts.
    pub fn with_threshold(mut self, metric: impl Into<String>, expression: impl Into<String>) -> Self {
        self.thresholds.push((metric.into(), expression.into()));
        self
    }

    pub fn try_from_raw(raw: RawRunConfig) -> Result<Self, BoxError> {
        let scenarios = raw
            .scenarios
            .into_iter()
            .map(|(name, scenario)| {
                ScenarioSpec::try_from_raw(&name, scenario)
                    .context("validate scenario")
                    .context_debug_field("scenario", name)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut config = Self::new(scenarios)?;
        config.thresholds = raw
            .thresholds
            .into_iter()
            .flat_map(|(metric, expressions)| {
                expressions
                    .into_iter()
                    .map(move |expression| (metric.clone(), expression))
            })
            .collect();
        Ok(config)
    }

    pub fn from_json_slice(data: &[u8]) -> Result<Self, BoxError> {
        let raw: RawRunConfig =
            serde_json::from_slice(data).context("json decode run configuration")?;
        Self::try_from_raw(raw)
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self, BoxError> {
        let raw: RawRunConfig =
            serde_json::from_value(value).context("json decode run configuration")?;
        Self::try_from_raw(raw)
    }

    pub fn scenarios(&self) -> &[ScenarioSpec] {
        &self.scenarios
    }

    /// `(metric, expression)` pairs, in configuration order.
    pub fn thresholds(&self) -> &[(String, String)] {
        &self.thresholds
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ExecutorKind;

    #[test]
    fn multiple_scenarios_with_thresholds() {
        let config = RunConfig::from_json_value(serde_json::json!({
            "scenarios": {
                "ramping_phase": {
                    "executor": "ramping-vus",
                    "startVUs": 0,
                    "stages": [
                        { "duration": "5s", "target": 10 },
                        { "duration": "10s", "target": 0 },
                    ],
                },
                "constant_phase": {
                    "executor": "constant-vus",
                    "vus": 5,
                    "duration": "15s",
                    "startTime": "20s",
                },
            },
            "thresholds": {
                "iteration_failed": ["rate<0.1"],
                "iteration_duration": ["p(95)<500", "avg<200"],
            },
        }))
        .unwrap();

        let kinds: Vec<_> = config.scenarios().iter().map(|s| s.kind()).collect();
        // scenarios are keyed by name and thus ordered alphabetically
        assert_eq!(kinds, [ExecutorKind::ConstantVus, ExecutorKind::RampingVus]);
        assert_eq!(config.scenarios()[0].start_time(), Duration::from_secs(20));
        assert_eq!(config.thresholds().len(), 3);
    }

    #[test]
    fn empty_scenarios_are_rejected() {
        assert!(RunConfig::from_json_slice(br#"{"scenarios": {}}"#).is_err());
        assert!(RunConfig::from_json_slice(b"{}").is_err());
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        assert!(
            RunConfig::from_json_value(serde_json::json!({
                "scenarios": {
                    "s": { "executor": "constant-vus", "duration": "1s" },
                },
                "options": {},
            }))
            .is_err()
        );
    }

    #[test]
    fn invalid_scenario_fails_whole_config() {
        assert!(
            RunConfig::from_json_value(serde_json::json!({
                "scenarios": {
                    "good": { "executor": "constant-vus", "duration": "1s" },
                    "bad": { "executor": "constant-arrival-rate", "rate": 0, "duration": "1s", "preAllocatedVUs": 1 },
                },
            }))
            .is_err()
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let config = RunConfig::from_json_value(serde_json::json!({
            "scenarios": {
                "s": { "executor": "constant-vus", "duration": "1s" },
            },
        }))
        .unwrap();
        let spec = config.scenarios()[0].clone();
        assert!(RunConfig::new(vec![spec.clone(), spec]).is_err());
    }
}
