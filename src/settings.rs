//! Tunables for the execution subsystem.
//!
//! The application's configuration layer deserializes this from whatever
//! source it owns; everything has a sensible default so `ExecSettings::default()`
//! is a working setup.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// How long to wait for a graceful worker exit before escalating to kill.
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Interval for aliveness polls while waiting on the worker process.
const DEFAULT_ALIVENESS_POLL_MS: u64 = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecSettings {
    /// Grace period for a requested shutdown, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Aliveness poll interval while joining the worker, in milliseconds.
    pub aliveness_poll_ms: u64,
    /// Program to spawn as the worker. Defaults to the current executable,
    /// re-entered with `worker_args`.
    pub worker_program: Option<PathBuf>,
    /// Arguments passed to the worker program.
    pub worker_args: Vec<String>,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            aliveness_poll_ms: DEFAULT_ALIVENESS_POLL_MS,
            worker_program: None,
            worker_args: vec!["--worker".to_string()],
        }
    }
}

impl ExecSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn aliveness_poll(&self) -> Duration {
        Duration::from_millis(self.aliveness_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let settings = ExecSettings::default();
        assert_eq!(settings.shutdown_grace(), Duration::from_millis(5_000));
        assert_eq!(settings.aliveness_poll(), Duration::from_millis(100));
        assert!(settings.worker_program.is_none());
        assert_eq!(settings.worker_args, vec!["--worker".to_string()]);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let settings: ExecSettings =
            serde_json::from_str(r#"{"shutdown_grace_ms": 250}"#).unwrap();
        assert_eq!(settings.shutdown_grace_ms, 250);
        assert_eq!(settings.aliveness_poll_ms, 100);
        assert_eq!(settings.worker_args, vec!["--worker".to_string()]);
    }
}
