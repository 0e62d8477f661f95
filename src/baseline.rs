//! Built-in KDMA-distance baseline decider.
//!
//! Deterministic stand-in for the LLM-backed pipelines: scores every
//! candidate choice by its distance from the alignment target in KDMA space
//! and picks the closest. Lets the workbench (and the test suite) exercise
//! the full execution path without model weights on disk.

use anyhow::Result;
use serde_json::{json, Value};

use crate::decider::AlignedDecider;
use crate::hydration::{AlignmentTarget, ScenarioProbe};
use crate::ipc::{Decision, DecisionResult};

/// Current registry target for the baseline backend.
pub const TARGET: &str = "kdma_baseline";

/// Older configurations name the same backend under this target.
pub const LEGACY_TARGET: &str = "baseline";

/// Association assumed for a choice that does not declare a KDMA the target
/// asks about.
const UNDECLARED_ASSOCIATION: f64 = 0.0;

pub struct KdmaBaselineDecider {
    backbone: Option<String>,
}

/// Factory registered under [`TARGET`]. Reads an optional
/// `llm_backbone.model_name` purely for reporting.
pub fn factory(resolved_config: &Value) -> Result<Box<dyn AlignedDecider>> {
    let backbone = resolved_config
        .get("llm_backbone")
        .and_then(|b| b.get("model_name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(Box::new(KdmaBaselineDecider { backbone }))
}

impl KdmaBaselineDecider {
    /// Sum of absolute distances between the choice's associations and the
    /// target values. Lower is better aligned.
    fn distance(choice: &crate::hydration::Choice, target: &AlignmentTarget) -> f64 {
        target
            .kdma_values
            .iter()
            .map(|kv| {
                let association = choice
                    .kdma_association
                    .get(&kv.kdma)
                    .copied()
                    .unwrap_or(UNDECLARED_ASSOCIATION);
                (association - kv.value).abs()
            })
            .sum()
    }
}

impl AlignedDecider for KdmaBaselineDecider {
    fn choose_action(
        &mut self,
        probe: &ScenarioProbe,
        target: &AlignmentTarget,
        _inference_kwargs: &serde_json::Map<String, Value>,
    ) -> Result<DecisionResult> {
        // Hydration guarantees at least one choice; ties go to the earliest.
        let mut best_index = 0;
        let mut best_distance = f64::INFINITY;
        let mut scores = Vec::with_capacity(probe.choices.len());

        for (index, choice) in probe.choices.iter().enumerate() {
            let distance = Self::distance(choice, target);
            scores.push(json!({
                "choice": choice.unstructured,
                "distance": distance,
            }));
            if distance < best_distance {
                best_distance = distance;
                best_index = index;
            }
        }

        let chosen = &probe.choices[best_index];
        let target_label = target.id.clone().unwrap_or_else(|| "unnamed".to_string());

        let mut choice_info = serde_json::Map::new();
        choice_info.insert("scores".to_string(), Value::Array(scores));
        choice_info.insert("algorithm".to_string(), json!(TARGET));
        if let Some(ref backbone) = self.backbone {
            choice_info.insert("llm_backbone".to_string(), json!(backbone));
        }

        Ok(DecisionResult {
            decision: Decision {
                unstructured: chosen.unstructured.clone(),
                justification: format!(
                    "Closest to alignment target '{target_label}' (KDMA distance {best_distance:.3})"
                ),
            },
            choice_info,
        })
    }
}
