//! Scenario hydration boundary.
//!
//! Turns the opaque scenario payload and alignment target carried by a
//! [`crate::ipc::ConfigurationSnapshot`] into the probe representation the
//! decision backends consume. Errors here propagate unchanged to the worker's
//! top-level handler, which converts them into failure responses.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// A hydrated scenario probe: the situation plus its candidate choices.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioProbe {
    #[serde(default)]
    pub probe_id: Option<String>,
    /// Free-text situation description.
    #[serde(default)]
    pub unstructured: String,
    #[serde(default)]
    pub characters: Vec<Character>,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub unstructured: String,
    #[serde(default)]
    pub intent: Option<String>,
}

/// One candidate action the decision algorithm can pick.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub unstructured: String,
    /// Value-dimension associations of this choice, keyed by KDMA name.
    #[serde(default)]
    pub kdma_association: BTreeMap<String, f64>,
}

/// The value priorities a decision should optimize toward.
#[derive(Debug, Clone, Deserialize)]
pub struct AlignmentTarget {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub kdma_values: Vec<KdmaValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KdmaValue {
    pub kdma: String,
    pub value: f64,
}

pub fn hydrate_scenario(scenario_input: &Value) -> Result<ScenarioProbe> {
    let probe: ScenarioProbe = serde_json::from_value(scenario_input.clone())
        .context("scenario input does not describe a probe")?;
    if probe.choices.is_empty() {
        bail!("scenario has no candidate choices");
    }
    Ok(probe)
}

pub fn hydrate_alignment_target(target: &Value) -> Result<AlignmentTarget> {
    serde_json::from_value(target.clone()).context("alignment target is not structured")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hydrates_a_full_probe() {
        let input = json!({
            "probe_id": "probe-7",
            "unstructured": "Two casualties, one med kit.",
            "characters": [
                {"name": "Alpha", "unstructured": "stable", "intent": "help"},
                {"name": "Bravo", "unstructured": "critical"},
            ],
            "choices": [
                {"unstructured": "Treat Alpha", "kdma_association": {"urgency": 0.2}},
                {"unstructured": "Treat Bravo", "kdma_association": {"urgency": 0.9}},
            ],
        });

        let probe = hydrate_scenario(&input).unwrap();
        assert_eq!(probe.probe_id.as_deref(), Some("probe-7"));
        assert_eq!(probe.characters.len(), 2);
        assert_eq!(probe.choices.len(), 2);
        assert_eq!(probe.choices[1].kdma_association["urgency"], 0.9);
    }

    #[test]
    fn rejects_probe_without_choices() {
        let input = json!({"unstructured": "nothing to decide", "choices": []});
        let err = hydrate_scenario(&input).unwrap_err();
        assert!(err.to_string().contains("no candidate choices"));
    }

    #[test]
    fn rejects_non_probe_input() {
        let err = hydrate_scenario(&json!("just a string")).unwrap_err();
        assert!(err.to_string().contains("does not describe a probe"));
    }

    #[test]
    fn hydrates_alignment_target() {
        let target = json!({
            "id": "maximize-urgency",
            "kdma_values": [{"kdma": "urgency", "value": 0.9}],
        });
        let target = hydrate_alignment_target(&target).unwrap();
        assert_eq!(target.kdma_values.len(), 1);
        assert_eq!(target.kdma_values[0].kdma, "urgency");
    }
}
