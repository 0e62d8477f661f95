//! Backend resolution, model instantiation, and the worker-local model cache.
//!
//! Instantiating a backend may take tens of seconds to minutes (model weights
//! load here), so loaded models are cached by configuration fingerprint for
//! the lifetime of the worker process. The cache never evicts; entries are
//! torn down only at worker shutdown.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::error::ExecError;
use crate::hydration::{hydrate_alignment_target, hydrate_scenario, AlignmentTarget, ScenarioProbe};
use crate::ipc::{ConfigurationSnapshot, DecisionResult};

/// A loaded, ready-to-run decision backend.
///
/// Implementations hold whatever model state they need; they are driven from
/// a single thread inside the worker process, never concurrently.
pub trait AlignedDecider: Send {
    /// Choose an action for the probe, optimizing toward the alignment
    /// target. `inference_kwargs` carries per-configuration algorithm
    /// parameters from the resolved config.
    fn choose_action(
        &mut self,
        probe: &ScenarioProbe,
        target: &AlignmentTarget,
        inference_kwargs: &serde_json::Map<String, Value>,
    ) -> Result<DecisionResult>;

    /// Release accelerator-resident state. Called at most once, right before
    /// the backend is dropped. Default: nothing to release.
    fn unload(&mut self) {}
}

/// Builds a backend from a resolved configuration.
pub type DeciderFactory = fn(&Value) -> Result<Box<dyn AlignedDecider>>;

/// Maps backend target names to factories.
///
/// Targets are looked up under their current name first, then under a legacy
/// alias, so configurations written against either naming convention keep
/// working.
pub struct BackendRegistry {
    factories: HashMap<String, DeciderFactory>,
    aliases: HashMap<String, String>,
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    pub fn register(&mut self, target: &str, factory: DeciderFactory) {
        self.factories.insert(target.to_string(), factory);
    }

    pub fn register_alias(&mut self, legacy: &str, target: &str) {
        self.aliases.insert(legacy.to_string(), target.to_string());
    }

    pub fn resolve(&self, target: &str) -> Option<DeciderFactory> {
        self.factories.get(target).copied().or_else(|| {
            self.aliases
                .get(target)
                .and_then(|current| self.factories.get(current))
                .copied()
        })
    }
}

impl Default for BackendRegistry {
    /// Registry with the built-in baseline backend under its current and
    /// legacy target names.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(crate::baseline::TARGET, crate::baseline::factory);
        registry.register_alias(crate::baseline::LEGACY_TARGET, crate::baseline::TARGET);
        registry
    }
}

/// An instantiated model: the compute entry point plus its teardown.
pub struct LoadedModel {
    backend: Box<dyn AlignedDecider>,
    inference_kwargs: serde_json::Map<String, Value>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("inference_kwargs", &self.inference_kwargs)
            .finish_non_exhaustive()
    }
}

impl LoadedModel {
    /// Run one decision. Hydrates the scenario and alignment target, then
    /// delegates to the backend's choose-action entry point.
    pub fn compute(&mut self, snapshot: &ConfigurationSnapshot) -> Result<DecisionResult> {
        let probe = hydrate_scenario(&snapshot.scenario_input)?;
        let target = hydrate_alignment_target(&snapshot.alignment_target)?;
        self.backend
            .choose_action(&probe, &target, &self.inference_kwargs)
    }

    /// Tear down the backend. Consumes the model, so it can only run once.
    pub fn cleanup(mut self) {
        self.backend.unload();
    }
}

/// Instantiate the backend a resolved configuration names.
///
/// Fails before any resource is allocated when the configuration is missing,
/// empty, or names no recognizable backend; those are caller bugs, reported
/// as [`ExecError::Configuration`].
pub fn instantiate(registry: &BackendRegistry, resolved_config: &Value) -> Result<LoadedModel> {
    let mapping = resolved_config
        .as_object()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ExecError::Configuration {
            reason: "resolved config is missing or empty".to_string(),
        })?;

    let target = mapping
        .get("instance")
        .and_then(|i| i.get("_target_"))
        .and_then(Value::as_str)
        .ok_or_else(|| ExecError::Configuration {
            reason: "resolved config names no decider (missing instance._target_)".to_string(),
        })?;

    let factory = registry.resolve(target).ok_or_else(|| ExecError::Configuration {
        reason: format!("unknown decider target: {target}"),
    })?;

    let backend = factory(resolved_config)?;

    let inference_kwargs = mapping
        .get("inference_kwargs")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    Ok(LoadedModel {
        backend,
        inference_kwargs,
    })
}

/// Worker-local cache of instantiated models, keyed by configuration
/// fingerprint. Owned and mutated exclusively by the worker process.
pub struct ModelCache {
    entries: HashMap<String, LoadedModel>,
    instantiations: HashMap<String, u64>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            instantiations: HashMap::new(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// How many times a model was instantiated for this key. Stays at one per
    /// worker lifetime unless the entry was torn down in between.
    pub fn instantiation_count(&self, key: &str) -> u64 {
        self.instantiations.get(key).copied().unwrap_or(0)
    }

    /// Return the cached model for `key`, instantiating it on first use.
    pub fn entry_or_instantiate(
        &mut self,
        key: &str,
        registry: &BackendRegistry,
        resolved_config: &Value,
    ) -> Result<&mut LoadedModel> {
        if !self.entries.contains_key(key) {
            let model = instantiate(registry, resolved_config)?;
            *self.instantiations.entry(key.to_string()).or_insert(0) += 1;
            self.entries.insert(key.to_string(), model);
        }
        self.entries
            .get_mut(key)
            .ok_or_else(|| anyhow!("cache entry vanished for key {key}"))
    }

    /// Tear down every cached model, best-effort: one panicking cleanup must
    /// not block the cleanup of the others.
    pub fn shutdown(&mut self) {
        for (key, model) in self.entries.drain() {
            let outcome = catch_unwind(AssertUnwindSafe(|| model.cleanup()));
            if outcome.is_err() {
                eprintln!("[WORKER] Cleanup failed for cached model {key}");
            }
        }
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::Decision;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_UNLOADS: AtomicU64 = AtomicU64::new(0);

    struct FixedDecider;

    impl AlignedDecider for FixedDecider {
        fn choose_action(
            &mut self,
            probe: &ScenarioProbe,
            _target: &AlignmentTarget,
            _inference_kwargs: &serde_json::Map<String, Value>,
        ) -> Result<DecisionResult> {
            Ok(DecisionResult {
                decision: Decision {
                    unstructured: probe.choices[0].unstructured.clone(),
                    justification: "first choice".to_string(),
                },
                choice_info: serde_json::Map::new(),
            })
        }

        fn unload(&mut self) {
            TEST_UNLOADS.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickyCleanup;

    impl AlignedDecider for PanickyCleanup {
        fn choose_action(
            &mut self,
            _probe: &ScenarioProbe,
            _target: &AlignmentTarget,
            _inference_kwargs: &serde_json::Map<String, Value>,
        ) -> Result<DecisionResult> {
            unreachable!("never computed in these tests")
        }

        fn unload(&mut self) {
            panic!("teardown exploded");
        }
    }

    fn fixed_factory(_config: &Value) -> Result<Box<dyn AlignedDecider>> {
        Ok(Box::new(FixedDecider))
    }

    fn panicky_factory(_config: &Value) -> Result<Box<dyn AlignedDecider>> {
        Ok(Box::new(PanickyCleanup))
    }

    fn test_registry() -> BackendRegistry {
        let mut registry = BackendRegistry::empty();
        registry.register("fixed", fixed_factory);
        registry.register_alias("fixed_legacy", "fixed");
        registry.register("panicky", panicky_factory);
        registry
    }

    #[test]
    fn instantiate_rejects_empty_config() {
        let registry = test_registry();
        let err = instantiate(&registry, &json!({})).unwrap_err();
        let exec = err.downcast_ref::<ExecError>().expect("typed error");
        assert!(matches!(exec, ExecError::Configuration { .. }));

        let err = instantiate(&registry, &Value::Null).unwrap_err();
        assert!(err.to_string().contains("missing or empty"));
    }

    #[test]
    fn instantiate_rejects_unknown_target() {
        let registry = test_registry();
        let config = json!({"instance": {"_target_": "does_not_exist"}});
        let err = instantiate(&registry, &config).unwrap_err();
        assert!(err.to_string().contains("unknown decider target"));
    }

    #[test]
    fn instantiate_rejects_config_without_target() {
        let registry = test_registry();
        let err = instantiate(&registry, &json!({"invalid": "config"})).unwrap_err();
        assert!(err.to_string().contains("names no decider"));
    }

    #[test]
    fn legacy_alias_resolves_to_current_target() {
        let registry = test_registry();
        let config = json!({"instance": {"_target_": "fixed_legacy"}});
        assert!(instantiate(&registry, &config).is_ok());
    }

    #[test]
    fn cache_instantiates_once_per_key() {
        let registry = test_registry();
        let config = json!({"instance": {"_target_": "fixed"}});
        let mut cache = ModelCache::new();

        for _ in 0..3 {
            cache
                .entry_or_instantiate("key-a", &registry, &config)
                .unwrap();
        }
        assert_eq!(cache.instantiation_count("key-a"), 1);
        assert!(cache.contains("key-a"));
        assert!(!cache.contains("key-b"));
    }

    #[test]
    fn shutdown_survives_a_panicking_cleanup() {
        let registry = test_registry();
        let mut cache = ModelCache::new();
        cache
            .entry_or_instantiate("boom", &registry, &json!({"instance": {"_target_": "panicky"}}))
            .unwrap();
        cache
            .entry_or_instantiate("calm", &registry, &json!({"instance": {"_target_": "fixed"}}))
            .unwrap();

        let before = TEST_UNLOADS.load(Ordering::SeqCst);
        cache.shutdown();
        assert_eq!(TEST_UNLOADS.load(Ordering::SeqCst), before + 1);
        assert!(!cache.contains("boom"));
        assert!(!cache.contains("calm"));
    }

    #[test]
    fn compute_runs_hydration_then_backend() {
        let registry = test_registry();
        let mut model =
            instantiate(&registry, &json!({"instance": {"_target_": "fixed"}})).unwrap();

        let snapshot = ConfigurationSnapshot {
            scenario_input: json!({"choices": [{"unstructured": "hold position"}]}),
            alignment_target: json!({"kdma_values": []}),
            resolved_config: json!({"instance": {"_target_": "fixed"}}),
        };
        let result = model.compute(&snapshot).unwrap();
        assert_eq!(result.decision.unstructured, "hold position");

        let bad = ConfigurationSnapshot {
            scenario_input: json!({"choices": []}),
            alignment_target: json!({"kdma_values": []}),
            resolved_config: json!({"instance": {"_target_": "fixed"}}),
        };
        assert!(model.compute(&bad).is_err());
    }
}
