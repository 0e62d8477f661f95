//! Application-facing facade over the execution subsystem.
//!
//! One `DecisionClient` per application, created where the application
//! lifecycle is owned and passed down explicitly. Cloning shares the
//! underlying supervisor, so every part of the UI talks to the same worker.
//! Call [`DecisionClient::close`] from the application's shutdown path; if
//! that never happens, dropping the last clone still force-kills any live
//! worker so a normal exit cannot orphan the child process.

use std::sync::Arc;

use serde_json::Value;

use crate::error::ExecError;
use crate::ipc::{ConfigurationSnapshot, DecisionResult};
use crate::settings::ExecSettings;
use crate::supervisor::WorkerSupervisor;

#[derive(Clone)]
pub struct DecisionClient {
    supervisor: Arc<WorkerSupervisor>,
}

impl DecisionClient {
    pub fn new(settings: ExecSettings) -> Self {
        log::debug!("decision client created");
        Self {
            supervisor: Arc::new(WorkerSupervisor::new(settings)),
        }
    }

    /// Compute one decision. Lazily starts the worker on first use and
    /// restarts it on next use after any crash.
    pub async fn get_decision(
        &self,
        snapshot: ConfigurationSnapshot,
    ) -> Result<DecisionResult, ExecError> {
        self.supervisor.get_decision(snapshot).await
    }

    /// Whether this configuration's model is already loaded in the worker.
    /// The UI uses this to decide whether to show a loading affordance.
    pub async fn is_model_cached(&self, resolved_config: &Value) -> bool {
        self.supervisor.is_model_cached(resolved_config).await
    }

    pub async fn is_worker_alive(&self) -> bool {
        self.supervisor.is_worker_alive().await
    }

    /// Graceful teardown: asks the worker to exit and escalates to kill
    /// after the grace period. Safe to call repeatedly.
    pub async fn close(&self) {
        log::info!("shutting down decision worker");
        self.supervisor.shutdown().await;
    }
}
