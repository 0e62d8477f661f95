//! IPC protocol types for supervisor ↔ worker communication.
//!
//! Uses JSON Lines (one JSON object per line) over stdin/stdout pipes. Every
//! field is plain data and the payloads are `serde_json::Value`s, so nothing
//! that cannot survive the copy across the process boundary (live handles,
//! accelerator contexts) can end up in a message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Echoed as the response id when a request line could not be parsed at all.
pub const UNKNOWN_REQUEST_ID: &str = "unknown";

/// Everything one decision execution needs, bundled by the caller and
/// consumed once by the worker.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConfigurationSnapshot {
    /// Opaque scenario/probe description (characters, choices, environment).
    pub scenario_input: Value,
    /// Opaque description of the value priorities to optimize decisions for.
    pub alignment_target: Value,
    /// Fully resolved model configuration mapping. May carry a
    /// `model_path_keys` list and an `llm_backbone` sub-mapping used for
    /// cache-key extraction, and an `instance` block naming the backend.
    pub resolved_config: Value,
}

/// Request sent from supervisor to worker via stdin.
///
/// `request_id` is caller-assigned, unique per in-flight request, and used to
/// correlate replies.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum WorkerRequest {
    /// Compute one decision for the bundled configuration.
    Run {
        request_id: String,
        config: ConfigurationSnapshot,
    },
    /// Tear down cached models and exit the receive loop.
    Shutdown { request_id: String },
}

impl WorkerRequest {
    pub fn request_id(&self) -> &str {
        match self {
            WorkerRequest::Run { request_id, .. } => request_id,
            WorkerRequest::Shutdown { request_id } => request_id,
        }
    }
}

/// The decision proper, as the backend produced it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Decision {
    /// Free-text rendering of the chosen action.
    pub unstructured: String,
    /// Why the backend picked it.
    pub justification: String,
}

/// Decision plus backend-specific metadata, passed through unchanged.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DecisionResult {
    pub decision: Decision,
    /// Open mapping of algorithm-specific metadata (per-choice scores etc.).
    #[serde(default)]
    pub choice_info: serde_json::Map<String, Value>,
}

/// Response sent from worker to supervisor via stdout.
///
/// Exactly one of `result`/`error` is populated, according to `success`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerResponse {
    pub request_id: String,
    pub success: bool,
    pub result: Option<DecisionResult>,
    pub error: Option<String>,
}

impl WorkerResponse {
    pub fn ok(request_id: impl Into<String>, result: DecisionResult) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }
}
