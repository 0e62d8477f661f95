//! Configuration fingerprint derivation.
//!
//! Two configurations that share the same model identity must map to the same
//! key so the worker reuses the loaded model; configurations with no declared
//! model identity still need a stable, collision-resistant key.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Derive the cache key for a resolved configuration.
///
/// Emits `"{key}={value}"` for every name in `model_path_keys` that is
/// present under `llm_backbone`, joined with `_`. Falls back to a SHA-256
/// digest of the canonicalized configuration when no fragment was emitted.
///
/// The key is deliberately coarser than structural equality: fields outside
/// the declared model path (prompt text, `inference_kwargs`, dataset paths)
/// do not affect it, because the loaded model is a function of the model
/// identity alone.
pub fn derive_cache_key(resolved_config: &Value) -> String {
    let mut fragments = Vec::new();

    if let Some(keys) = resolved_config.get("model_path_keys").and_then(Value::as_array) {
        let backbone = resolved_config.get("llm_backbone");
        for key in keys.iter().filter_map(Value::as_str) {
            if let Some(value) = backbone.and_then(|b| b.get(key)) {
                fragments.push(format!("{key}={}", render_scalar(value)));
            }
        }
    }

    if fragments.is_empty() {
        content_hash(resolved_config)
    } else {
        fragments.join("_")
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// SHA-256 over a canonical rendering with sorted object keys, so the digest
/// does not depend on map insertion order.
fn content_hash(config: &Value) -> String {
    let mut canonical = String::new();
    canonicalize(config, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                canonicalize(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn declared_keys_produce_readable_fragments() {
        let config = json!({
            "model_path_keys": ["model_name", "device"],
            "llm_backbone": {"model_name": "mistral-7b", "device": "cuda:0"},
            "prompt_style": "verbose",
        });
        assert_eq!(derive_cache_key(&config), "model_name=mistral-7b_device=cuda:0");
    }

    #[test]
    fn undeclared_fields_do_not_change_the_key() {
        let a = json!({
            "model_path_keys": ["model_name"],
            "llm_backbone": {"model_name": "mistral-7b", "temperature": 0.7},
            "inference_kwargs": {"max_tokens": 512},
        });
        let b = json!({
            "model_path_keys": ["model_name"],
            "llm_backbone": {"model_name": "mistral-7b", "temperature": 0.1},
            "inference_kwargs": {"max_tokens": 8},
            "dataset_path": "/data/probes.json",
        });
        assert_eq!(derive_cache_key(&a), derive_cache_key(&b));
    }

    #[test]
    fn declared_key_missing_from_backbone_is_skipped() {
        let config = json!({
            "model_path_keys": ["model_name", "quantization"],
            "llm_backbone": {"model_name": "llama-13b"},
        });
        assert_eq!(derive_cache_key(&config), "model_name=llama-13b");
    }

    #[test]
    fn non_string_backbone_values_render_as_json() {
        let config = json!({
            "model_path_keys": ["gpu_layers"],
            "llm_backbone": {"gpu_layers": 32},
        });
        assert_eq!(derive_cache_key(&config), "gpu_layers=32");
    }

    #[test]
    fn fallback_hash_is_deterministic() {
        let config = json!({"algorithm": "random", "seed": 42});
        let first = derive_cache_key(&config);
        let second = derive_cache_key(&config);
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fallback_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": {"b": 2, "a": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": {"a": 3, "b": 2}, "x": 1}"#).unwrap();
        assert_eq!(derive_cache_key(&a), derive_cache_key(&b));
    }

    #[test]
    fn fallback_hash_separates_different_configs() {
        let a = json!({"algorithm": "random", "seed": 42});
        let b = json!({"algorithm": "random", "seed": 43});
        assert_ne!(derive_cache_key(&a), derive_cache_key(&b));
    }

    #[test]
    fn empty_model_path_keys_falls_back_to_hash() {
        let config = json!({
            "model_path_keys": [],
            "llm_backbone": {"model_name": "mistral-7b"},
        });
        let key = derive_cache_key(&config);
        assert_eq!(key.len(), 64);
    }
}
